//! This crate runs a flow over a batch of input records and persists one
//! output record per input. It includes modules for the record model, input
//! loading, input mapping, media handling, flow execution, batch
//! orchestration and configuration.

pub mod types; // Record value model and batch results.
pub mod error; // Error kinds of a batch run.
pub mod paths; // Resolution of run-relative paths.
pub mod data; // Loading of raw input records.
pub mod media; // Media references inside records.
pub mod mapping; // Merging input sources into flow inputs.
pub mod executor; // Execution engine contract and the command executor.
pub mod batch; // Batch orchestration and output persistence.
pub mod config; // Defines and loads run configuration.

// Re-export commonly used types for easier access.
pub use types::*;
pub use config::Config;
pub use error::BatchError;
pub use batch::BatchEngine;
