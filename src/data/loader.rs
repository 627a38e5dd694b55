//! Data Loader Module
//!
//! Reads the ordered sequence of flat records that make up one input source.

use crate::{Record, Value, error::LoadError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads the records of one input source
pub trait DataLoader: Send + Sync {
    /// Load every record under `path`, in on-disk order
    fn load(&self, path: &Path) -> Result<Vec<Record>, LoadError>;
}

/// Loader for JSON Lines, JSON, CSV and TSV files
///
/// A directory is read file by file in file-name order; only `.jsonl`,
/// `.json`, `.csv` and `.tsv` files are considered. A single file path is
/// loaded directly. Delimited files yield one record per row, keyed by the
/// header row, with every value a string.
#[derive(Debug, Clone, Default)]
pub struct DirectoryLoader;

impl DirectoryLoader {
    pub fn new() -> Self {
        Self
    }

    fn data_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LoadError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if data_format(&path).is_some() {
                files.push(path);
            } else {
                debug!("Skipping non-data file {}", path.display());
            }
        }
        files.sort();
        Ok(files)
    }

    fn load_file(path: &Path) -> Result<Vec<Record>, LoadError> {
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match data_format(path) {
            Some(DataFormat::Json) => parse_json(path, &content),
            Some(DataFormat::Csv) => parse_delimited(path, &content, b','),
            Some(DataFormat::Tsv) => parse_delimited(path, &content, b'\t'),
            // Unknown extensions only reach here when a file is named explicitly
            Some(DataFormat::JsonLines) | None => parse_json_lines(path, &content),
        }
    }
}

impl DataLoader for DirectoryLoader {
    fn load(&self, path: &Path) -> Result<Vec<Record>, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        if path.is_file() {
            return Self::load_file(path);
        }

        let mut records = Vec::new();
        for file in Self::data_files(path)? {
            let loaded = Self::load_file(&file)?;
            debug!("Loaded {} records from {}", loaded.len(), file.display());
            records.extend(loaded);
        }
        Ok(records)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    JsonLines,
    Json,
    Csv,
    Tsv,
}

fn data_format(path: &Path) -> Option<DataFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jsonl" => Some(DataFormat::JsonLines),
        "json" => Some(DataFormat::Json),
        "csv" => Some(DataFormat::Csv),
        "tsv" => Some(DataFormat::Tsv),
        _ => None,
    }
}

fn parse_json_lines(path: &Path, content: &str) -> Result<Vec<Record>, LoadError> {
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| LoadError::Malformed {
                path: path.to_path_buf(),
                line: index + 1,
                message: e.to_string(),
            })?;
        let record = Record::from_json(value).ok_or_else(|| LoadError::Malformed {
            path: path.to_path_buf(),
            line: index + 1,
            message: "expected a JSON object".to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

fn parse_json(path: &Path, content: &str) -> Result<Vec<Record>, LoadError> {
    let malformed = |message: String| LoadError::Malformed {
        path: path.to_path_buf(),
        line: 1,
        message,
    };

    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| LoadError::Malformed {
            path: path.to_path_buf(),
            line: e.line(),
            message: e.to_string(),
        })?;

    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                Record::from_json(item)
                    .ok_or_else(|| malformed(format!("array element {index} is not an object")))
            })
            .collect(),
        serde_json::Value::Object(_) => Ok(Record::from_json(value).into_iter().collect()),
        _ => Err(malformed(
            "expected a JSON object or an array of objects".to_string(),
        )),
    }
}

fn parse_delimited(path: &Path, content: &str, delimiter: u8) -> Result<Vec<Record>, LoadError> {
    let malformed = |e: csv::Error| LoadError::Malformed {
        path: path.to_path_buf(),
        line: e.position().map_or(1, |position| position.line() as usize),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());
    let headers = reader.headers().map_err(malformed)?.clone();

    reader
        .records()
        .map(|row| {
            let row = row.map_err(malformed)?;
            Ok::<Record, LoadError>(
                headers
                    .iter()
                    .zip(row.iter())
                    .map(|(header, field)| (header.to_string(), Value::string(field)))
                    .collect(),
            )
        })
        .collect()
}
