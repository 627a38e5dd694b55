//! Output Persister Module
//!
//! Writes the outputs of a batch run to disk: embedded media first, then the
//! records themselves as JSON Lines.

use crate::{Record, error::PersistenceError, media::MediaHandler};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// File name of the output records inside the output directory
pub const OUTPUT_FILE_NAME: &str = "output.jsonl";

/// Persists output records under an output directory
///
/// All work is blocking file-system I/O; async callers run it on the
/// blocking pool.
#[derive(Clone)]
pub struct OutputPersister {
    media: Arc<dyn MediaHandler>,
}

impl OutputPersister {
    pub fn new(media: Arc<dyn MediaHandler>) -> Self {
        Self { media }
    }

    /// Persist `outputs` under `output_dir`
    ///
    /// Media blobs are written as separate files and replaced by references
    /// relative to `output_dir`; the resulting records are written to
    /// `output.jsonl`, replacing any previous file. Returns the records exactly
    /// as written.
    pub fn persist(
        &self,
        outputs: Vec<Record>,
        output_dir: &Path,
    ) -> Result<Vec<Record>, PersistenceError> {
        fs::create_dir_all(output_dir).map_err(|source| PersistenceError::CreateDir {
            path: output_dir.to_path_buf(),
            source,
        })?;

        let outputs = outputs
            .into_iter()
            .map(|output| self.media.persist(output, output_dir))
            .collect::<Result<Vec<_>, _>>()?;

        let output_file = output_dir.join(OUTPUT_FILE_NAME);
        dump_jsonl(&output_file, &outputs)?;
        debug!("Wrote {} records to {}", outputs.len(), output_file.display());

        Ok(outputs)
    }
}

/// Write `records` as JSON Lines to `path`
///
/// The file is staged next to `path` and renamed into place, so an
/// interrupted write never leaves a truncated `path` behind. The staging file
/// is removed when any step fails.
pub fn dump_jsonl(path: &Path, records: &[Record]) -> Result<(), PersistenceError> {
    let staging = path.with_extension("jsonl.tmp");
    let written = write_lines(&staging, records).and_then(|()| {
        fs::rename(&staging, path).map_err(|source| PersistenceError::Write {
            path: path.to_path_buf(),
            source,
        })
    });

    if written.is_err() && staging.exists() {
        if let Err(e) = fs::remove_file(&staging) {
            warn!("Failed to remove staging file {}: {}", staging.display(), e);
        }
    }
    written
}

fn write_lines(staging: &Path, records: &[Record]) -> Result<(), PersistenceError> {
    let write_error = |source: std::io::Error| PersistenceError::Write {
        path: staging.to_path_buf(),
        source,
    };

    let file = File::create(staging).map_err(write_error)?;
    let mut writer = BufWriter::new(file);
    for (line, record) in records.iter().enumerate() {
        serde_json::to_writer(&mut writer, record)
            .map_err(|source| PersistenceError::Serialize { line, source })?;
        writer.write_all(b"\n").map_err(write_error)?;
    }
    writer.flush().map_err(write_error)
}
