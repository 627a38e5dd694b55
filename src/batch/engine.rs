//! Batch Engine Module
//!
//! This module runs a flow over a whole batch of input records.
//!
//! # Run Flow
//! 1. Load every input source and make its media references absolute
//! 2. Apply the input mapping to build one merged record per line
//! 3. Resolve the output directory
//! 4. Hand the merged records to the `FlowExecutor`
//! 5. Align outputs with input lines and persist them to `output.jsonl`
//!
//! Loading and mapping finish before any flow work starts. Persistence runs on
//! tokio's blocking pool so media copies do not stall the runtime.

use super::persister::OutputPersister;
use crate::{
    BatchResult, LineResult, LineStatus, Record, Value,
    data::{DataLoader, DirectoryLoader},
    error::{BatchError, DataSourceError, PersistenceError},
    executor::FlowExecutor,
    mapping::{DefaultInputMapper, InputMapper, InputsMapping, SourceRecords, complete_mapping},
    media::{LocalMediaHandler, MediaHandler},
    paths::resolve_dir,
};
use indexmap::IndexMap;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Input source name to the directory (or file) holding its records
pub type InputDirs = IndexMap<String, PathBuf>;

/// Key of the record written in place of a line that produced no output
pub const ERROR_MARKER_KEY: &str = "__error__";

/// Batch engine
///
/// Loads input data, applies the input mapping, delegates execution to a
/// `FlowExecutor` and persists the outputs. Holds no state between runs, so
/// concurrent runs are safe as long as they use different output directories.
pub struct BatchEngine<E: FlowExecutor> {
    /// Engine running the flow over the merged records
    executor: E,
    /// Loader for raw input sources
    loader: Box<dyn DataLoader>,
    /// Merges per-source records into flow inputs
    mapper: Box<dyn InputMapper>,
    /// Resolves input media references
    media: Arc<dyn MediaHandler>,
    /// Writes outputs and their media
    persister: OutputPersister,
}

impl<E: FlowExecutor> BatchEngine<E> {
    /// Creates a batch engine with the default loader, mapper and media handler
    ///
    /// # Arguments
    /// * `executor` - Execution engine used for every run
    pub fn new(executor: E) -> Self {
        let media: Arc<dyn MediaHandler> = Arc::new(LocalMediaHandler::new());
        Self {
            executor,
            loader: Box::new(DirectoryLoader::new()),
            mapper: Box::new(DefaultInputMapper::new()),
            persister: OutputPersister::new(media.clone()),
            media,
        }
    }

    pub fn with_loader(mut self, loader: impl DataLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    pub fn with_mapper(mut self, mapper: impl InputMapper + 'static) -> Self {
        self.mapper = Box::new(mapper);
        self
    }

    /// Replace the media handler for both input resolution and output persistence
    pub fn with_media(mut self, media: impl MediaHandler + 'static) -> Self {
        let media: Arc<dyn MediaHandler> = Arc::new(media);
        self.persister = OutputPersister::new(media.clone());
        self.media = media;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run the flow in batch mode
    ///
    /// # Arguments
    /// * `input_dirs` - Input source name to data directory
    /// * `inputs_mapping` - Flow input name to mapping expression
    /// * `output_dir` - Directory receiving `output.jsonl` and persisted media
    /// * `run_id` - Optional run identifier, passed through to the executor
    ///
    /// # Returns
    /// The executor's `BatchResult` whose `outputs` hold one record per input
    /// line, exactly as written to `output.jsonl`.
    ///
    /// # Errors
    /// Loading and mapping failures abort before the executor is invoked.
    /// Executor and persistence failures are returned unchanged.
    pub async fn run(
        &self,
        input_dirs: &InputDirs,
        inputs_mapping: &InputsMapping,
        output_dir: impl AsRef<Path>,
        run_id: Option<String>,
    ) -> Result<BatchResult, BatchError> {
        let inputs = self.input_records(input_dirs, inputs_mapping)?;
        let output_dir = resolve_dir(self.executor.working_dir(), output_dir);
        let total = inputs.len();

        info!(
            "Starting batch run over {} lines, output to {}",
            total,
            output_dir.display()
        );

        let mut result = self.executor.exec_bulk(inputs, run_id, &output_dir).await?;

        let outputs = align_outputs(std::mem::take(&mut result.outputs), &result.line_results, total);
        let persister = self.persister.clone();
        let persisted = tokio::task::spawn_blocking(move || persister.persist(outputs, &output_dir))
            .await
            .map_err(PersistenceError::from)?;
        result.outputs = persisted?;

        info!(
            "Batch run {} persisted {} outputs ({} failed lines)",
            result.run_id,
            result.outputs.len(),
            result.metadata.failed_lines
        );
        Ok(result)
    }

    /// Load the input sources and apply the input mapping
    fn input_records(
        &self,
        input_dirs: &InputDirs,
        inputs_mapping: &InputsMapping,
    ) -> Result<Vec<Record>, BatchError> {
        let sources = self.resolve_data(input_dirs)?;
        let mapping = complete_mapping(inputs_mapping, self.executor.flow_inputs(), &sources)?;
        Ok(self.mapper.apply_mapping(&sources, &mapping)?)
    }

    /// Load every input source, resolving media against the source's own directory
    fn resolve_data(&self, input_dirs: &InputDirs) -> Result<SourceRecords, DataSourceError> {
        let mut sources = SourceRecords::new();
        for (name, dir) in input_dirs {
            let dir = resolve_dir(self.executor.working_dir(), dir);
            let records = self.loader.load(&dir).map_err(|cause| DataSourceError {
                source_name: name.clone(),
                path: dir.clone(),
                cause,
            })?;
            debug!(
                "Loaded {} records for input source '{}' from {}",
                records.len(),
                name,
                dir.display()
            );

            let records = records
                .into_iter()
                .map(|record| self.resolve_media(&dir, record))
                .collect();
            sources.insert(name.clone(), records);
        }
        Ok(sources)
    }

    /// Resolve the media references held directly by a record's fields
    fn resolve_media(&self, base_dir: &Path, record: Record) -> Record {
        record
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::Sequence(items) => Value::Sequence(
                        items
                            .into_iter()
                            .map(|item| self.media.resolve_path(base_dir, item))
                            .collect(),
                    ),
                    Value::Mapping(_) => self.media.resolve_path(base_dir, value),
                    scalar @ Value::Scalar(_) => scalar,
                };
                (key, value)
            })
            .collect()
    }
}

/// Rebuild outputs so that output *i* belongs to input line *i*
///
/// Lines without a completed output get an error-marker record. When the
/// executor reports no line results the outputs are kept as they are.
fn align_outputs(outputs: Vec<Record>, line_results: &[LineResult], total: usize) -> Vec<Record> {
    if line_results.is_empty() {
        return outputs;
    }

    let by_line: HashMap<usize, &LineResult> = line_results
        .iter()
        .map(|line| (line.line_number, line))
        .collect();

    (0..total)
        .map(|line| match by_line.get(&line) {
            Some(LineResult {
                status: LineStatus::Completed,
                output: Some(output),
                ..
            }) => output.clone(),
            Some(result) => {
                let (kind, message) = result
                    .error
                    .as_ref()
                    .map(|e| (e.kind.as_str(), e.message.as_str()))
                    .unwrap_or(("failed", "line failed without error details"));
                error_marker(line, kind, message)
            }
            None => error_marker(line, "missing_result", "executor returned no result for this line"),
        })
        .collect()
}

fn error_marker(line: usize, kind: &str, message: &str) -> Record {
    let mut record = Record::new();
    record.insert(
        ERROR_MARKER_KEY,
        Value::from(json!({
            "line_number": line,
            "kind": kind,
            "message": message,
        })),
    );
    record
}
