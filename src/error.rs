//! Error Module
//!
//! One error type per failure kind of a batch run. `BatchError` is what
//! `BatchEngine::run` returns; callers match on its variant to tell a bad
//! input directory from a bad mapping, an engine failure or a disk failure.

use std::path::PathBuf;
use thiserror::Error;

/// Any fatal failure of a batch run
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failure of the raw data loader for one file or directory
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("path does not exist: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed data in {} at line {line}: {message}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// A declared input source could not be loaded
#[derive(Debug, Error)]
#[error("failed to load input source '{source_name}' from {}: {cause}", .path.display())]
pub struct DataSourceError {
    pub source_name: String,
    pub path: PathBuf,
    #[source]
    pub cause: LoadError,
}

/// The input mapping cannot be applied to the loaded sources
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("input '{input}' references unknown source '{source_name}'")]
    UnknownSource { input: String, source_name: String },
    #[error("input '{input}' has an invalid mapping expression '{expression}'")]
    InvalidExpression { input: String, expression: String },
    #[error("input mapping does not reference any data source")]
    NoSourceReferenced,
    #[error("source '{0}' has no records")]
    EmptySource(String),
    #[error("record counts differ between sources: {}", format_counts(.0))]
    CountMismatch(Vec<(String, usize)>),
    #[error("field '{field}' not found in source '{source_name}' at line {line}")]
    FieldNotFound {
        source_name: String,
        field: String,
        line: usize,
    },
}

fn format_counts(counts: &[(String, usize)]) -> String {
    counts
        .iter()
        .map(|(name, count)| format!("{name}={count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The execution engine failed as a whole
///
/// Per-line flow failures are not errors; they are reported in
/// `BatchResult::line_results`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),
    #[error("line worker failed: {0}")]
    Worker(String),
}

/// Media could not be decoded, copied or written
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid base64 payload for {mime_type}: {source}")]
    Decode {
        mime_type: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("failed to write media file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outputs could not be persisted
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to create output directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write output file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize output line {line}: {source}")]
    Serialize {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("persistence task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}
