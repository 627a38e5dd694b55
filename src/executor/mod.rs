//! Flow Execution Module
//!
//! The batch engine hands merged input records to a `FlowExecutor`, which runs
//! the flow once per record and reports per-line results. Scheduling,
//! concurrency and timeouts belong to the executor.
//!
//! `CommandExecutor` runs an external flow command per record.

mod command;


pub use command::CommandExecutor;

use crate::{BatchResult, Record, error::ExecutionError};
use std::future::Future;
use std::path::Path;

/// Execution engine contract
pub trait FlowExecutor: Send + Sync {
    /// Directory that relative input and output directories are resolved against
    fn working_dir(&self) -> &Path;

    /// Inputs the flow declares; empty when the flow accepts any mapping
    fn flow_inputs(&self) -> &[String] {
        &[]
    }

    /// Run the flow over every input record
    ///
    /// Per-line failures are reported in `BatchResult::line_results`; only a
    /// failure of the engine itself is an `Err`.
    fn exec_bulk(
        &self,
        inputs: Vec<Record>,
        run_id: Option<String>,
        output_dir: &Path,
    ) -> impl Future<Output = Result<BatchResult, ExecutionError>> + Send;
}
