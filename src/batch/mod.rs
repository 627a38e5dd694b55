//! Batch Run Module
//!
//! This module orchestrates batch runs:
//! - BatchEngine: loads inputs, applies the mapping, runs the executor
//! - OutputPersister: writes outputs and their media to the output directory

mod engine;
mod persister;

#[cfg(test)]
mod tests;

pub use engine::{BatchEngine, ERROR_MARKER_KEY, InputDirs};
pub use persister::{OUTPUT_FILE_NAME, OutputPersister, dump_jsonl};
