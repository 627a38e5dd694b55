//! Configuration Module
//!
//! This module defines all configuration structures for a batch run.
//! Configuration is loaded from TOML files and parsed using serde.

use crate::mapping::InputsMapping;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Main configuration structure
///
/// Contains the flow to execute and the run to perform with it.
/// Loaded from a TOML file (e.g., config/default.toml).
///
/// # Example TOML
/// ```toml
/// [flow]
/// command = "python3"
/// args = ["flow.py"]
/// inputs = ["question"]
///
/// [run]
/// output_dir = "runs/latest"
///
/// [run.input_dirs]
/// docs = "data/docs"
///
/// [run.inputs_mapping]
/// question = "${docs.text}"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub flow: FlowConfig,
    pub run: RunConfig,
}

/// Flow command configuration
///
/// # Fields
/// - `command`: Program invoked once per input record
/// - `args`: Arguments passed to the program
/// - `working_dir`: Working directory of the flow; relative run paths are resolved against it
/// - `inputs`: Input names the flow declares (empty accepts any mapping)
/// - `worker_count`: Maximum number of records processed concurrently
/// - `line_timeout_ms`: Time limit for a single record, in milliseconds
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_line_timeout_ms")]
    pub line_timeout_ms: u64,
}

/// Batch run configuration
///
/// # Fields
/// - `input_dirs`: Input source name to directory (or file) holding its records
/// - `inputs_mapping`: Flow input name to mapping expression
/// - `output_dir`: Directory receiving `output.jsonl` and persisted media
/// - `run_id`: Optional identifier; a UUID is generated when absent
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub input_dirs: IndexMap<String, PathBuf>,
    #[serde(default)]
    pub inputs_mapping: InputsMapping,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub run_id: Option<String>,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_worker_count() -> usize {
    4
}

fn default_line_timeout_ms() -> u64 {
    600_000
}

impl FlowConfig {
    /// Flow configuration for `command` with every other field at its default
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: default_working_dir(),
            inputs: Vec::new(),
            worker_count: default_worker_count(),
            line_timeout_ms: default_line_timeout_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    /// * `Ok(Config)` if the file was successfully loaded and parsed
    /// * `Err` if the file couldn't be read or the TOML is invalid
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
