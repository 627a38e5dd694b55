//! Command Executor Module
//!
//! Runs a flow implemented as an external command. Each merged input record
//! is written to the child's stdin as one JSON line; the child answers with a
//! JSON object on stdout.

use super::FlowExecutor;
use crate::{
    BatchResult, LineResult, LineStatus, Record, RunMetadata, config::FlowConfig,
    error::ExecutionError,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a single line needs, shared between line workers
struct LineContext {
    command: String,
    args: Vec<String>,
    working_dir: PathBuf,
    run_id: String,
    output_dir: PathBuf,
    line_timeout: Duration,
}

/// Flow executor backed by an external command
///
/// Up to `worker_count` lines run at the same time. Results come back ordered
/// by line number regardless of completion order.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: FlowConfig,
    working_dir: PathBuf,
}

impl CommandExecutor {
    /// Creates a new command executor
    ///
    /// # Arguments
    /// * `config` - Flow command, arguments, declared inputs and limits
    ///
    /// # Returns
    /// An error if the command is empty, `worker_count` is zero or the working
    /// directory cannot be made absolute
    pub fn new(config: FlowConfig) -> Result<Self, ExecutionError> {
        if config.command.trim().is_empty() {
            return Err(ExecutionError::InvalidConfig("flow command is empty".to_string()));
        }
        if config.worker_count == 0 {
            return Err(ExecutionError::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }

        let working_dir = std::path::absolute(&config.working_dir).map_err(|e| {
            ExecutionError::InvalidConfig(format!(
                "cannot resolve working directory {}: {}",
                config.working_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            config,
            working_dir,
        })
    }
}

impl FlowExecutor for CommandExecutor {
    fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn flow_inputs(&self) -> &[String] {
        &self.config.inputs
    }

    async fn exec_bulk(
        &self,
        inputs: Vec<Record>,
        run_id: Option<String>,
        output_dir: &Path,
    ) -> Result<BatchResult, ExecutionError> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let start_time = Utc::now();
        let total = inputs.len();

        info!(
            "Run {} executing {} lines with up to {} workers",
            run_id, total, self.config.worker_count
        );

        let context = Arc::new(LineContext {
            command: self.config.command.clone(),
            args: self.config.args.clone(),
            working_dir: self.working_dir.clone(),
            run_id: run_id.clone(),
            output_dir: output_dir.to_path_buf(),
            line_timeout: Duration::from_millis(self.config.line_timeout_ms),
        });
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count));
        let mut workers = JoinSet::new();

        for (line_number, input) in inputs.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ExecutionError::Worker(e.to_string()))?;
            let context = context.clone();
            workers.spawn(async move {
                let result = run_line(&context, line_number, input).await;
                drop(permit);
                result
            });
        }

        let mut line_results = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next().await {
            let result = joined.map_err(|e| ExecutionError::Worker(e.to_string()))?;
            if let (LineStatus::Failed, Some(error)) = (result.status, &result.error) {
                warn!(
                    "Run {} line {} failed ({}): {}",
                    run_id, result.line_number, error.kind, error.message
                );
            }
            line_results.push(result);
        }
        line_results.sort_by_key(|line| line.line_number);

        let outputs = line_results
            .iter()
            .filter_map(|line| line.output.clone())
            .collect();
        let metadata = RunMetadata::from_lines(&line_results, start_time, Utc::now());

        info!(
            "Run {} finished: {} completed, {} failed",
            run_id, metadata.completed_lines, metadata.failed_lines
        );

        Ok(BatchResult {
            run_id,
            outputs,
            line_results,
            metadata,
        })
    }
}

/// Run the flow command for one line
async fn run_line(context: &LineContext, line_number: usize, input: Record) -> LineResult {
    let mut payload = match serde_json::to_string(&input) {
        Ok(payload) => payload,
        Err(e) => return LineResult::failed(line_number, "serialize", e.to_string()),
    };
    payload.push('\n');

    let spawned = Command::new(&context.command)
        .args(&context.args)
        .current_dir(&context.working_dir)
        .env("FLOWBATCH_RUN_ID", &context.run_id)
        .env("FLOWBATCH_LINE_NUMBER", line_number.to_string())
        .env("FLOWBATCH_OUTPUT_DIR", &context.output_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return LineResult::failed(
                line_number,
                "spawn",
                format!("failed to start '{}': {}", context.command, e),
            );
        }
    };

    // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!("Line {} stdin closed early: {}", line_number, e);
            }
        });
    }

    let output = match timeout(context.line_timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return LineResult::failed(line_number, "io", e.to_string()),
        Err(_) => {
            return LineResult::failed(
                line_number,
                "timeout",
                format!("line timed out after {} ms", context.line_timeout.as_millis()),
            );
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return LineResult::failed(
            line_number,
            "exit_status",
            format!("flow exited with {}: {}", output.status, stderr.trim()),
        );
    }

    match parse_output(&output.stdout) {
        Some(record) => LineResult::completed(line_number, record),
        None => LineResult::failed(
            line_number,
            "invalid_output",
            "flow did not print a JSON object on stdout".to_string(),
        ),
    }
}

/// Parse the whole stdout as a JSON object, falling back to its last line
fn parse_output(stdout: &[u8]) -> Option<Record> {
    let text = String::from_utf8_lossy(stdout);
    let parse = |s: &str| {
        serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .and_then(Record::from_json)
    };

    parse(text.trim()).or_else(|| {
        text.lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| parse(line.trim()))
    })
}
