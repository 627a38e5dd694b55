use super::{MediaHandler, MediaKind, MediaReference};
use crate::{Record, Value, error::MediaError};
use base64::{Engine, engine::general_purpose::STANDARD};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Media handler backed by the local file system
///
/// Persisted media files get a fresh UUID name, so blobs from different
/// records never collide inside the same output directory. Absolute paths
/// already under the output directory are rewritten relative to it; absolute
/// paths to missing files are kept as they are.
#[derive(Debug, Clone, Default)]
pub struct LocalMediaHandler;

impl LocalMediaHandler {
    pub fn new() -> Self {
        Self
    }

    fn persist_value(&self, value: Value, output_dir: &Path) -> Result<Value, MediaError> {
        if let Some(reference) = MediaReference::parse(&value) {
            return self.persist_reference(reference, value, output_dir);
        }

        match value {
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.persist_value(item, output_dir))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            Value::Mapping(record) => self.persist(record, output_dir).map(Value::Mapping),
            scalar => Ok(scalar),
        }
    }

    fn persist_reference(
        &self,
        reference: MediaReference,
        original: Value,
        output_dir: &Path,
    ) -> Result<Value, MediaError> {
        match reference.kind {
            MediaKind::Base64 => {
                let bytes = STANDARD
                    .decode(reference.data.as_bytes())
                    .map_err(|source| MediaError::Decode {
                        mime_type: reference.mime_type.clone(),
                        source,
                    })?;
                let file_name = media_file_name(&reference);
                write_file(&output_dir.join(&file_name), &bytes)?;
                debug!("Persisted {} bytes of {} as {}", bytes.len(), reference.mime_type, file_name);
                Ok(MediaReference::path(reference.mime_type, file_name).to_value())
            }
            MediaKind::Path => {
                let existing = PathBuf::from(&reference.data);
                if !existing.is_absolute() {
                    return Ok(original);
                }
                if let Ok(relative) = existing.strip_prefix(output_dir) {
                    let relative = relative.to_string_lossy();
                    return Ok(MediaReference::path(reference.mime_type, relative).to_value());
                }
                if !existing.is_file() {
                    warn!("Media file {} does not exist; keeping its reference", reference.data);
                    return Ok(original);
                }
                let file_name = media_file_name(&reference);
                let target = output_dir.join(&file_name);
                fs::copy(&existing, &target).map_err(|source| MediaError::Io {
                    path: target.clone(),
                    source,
                })?;
                debug!("Copied {} into output as {}", reference.data, file_name);
                Ok(MediaReference::path(reference.mime_type, file_name).to_value())
            }
            MediaKind::Url => Ok(original),
        }
    }
}

impl MediaHandler for LocalMediaHandler {
    fn resolve_path(&self, base_dir: &Path, value: Value) -> Value {
        match MediaReference::parse(&value) {
            Some(reference) if reference.kind == MediaKind::Path => {
                let path = Path::new(&reference.data);
                if path.is_absolute() {
                    return value;
                }
                let absolute = base_dir.join(path);
                MediaReference::path(reference.mime_type, absolute.to_string_lossy()).to_value()
            }
            _ => value,
        }
    }

    fn persist(&self, record: Record, output_dir: &Path) -> Result<Record, MediaError> {
        record
            .into_iter()
            .map(|(key, value)| {
                self.persist_value(value, output_dir)
                    .map(|value| (key, value))
            })
            .collect()
    }
}

fn media_file_name(reference: &MediaReference) -> String {
    format!("{}.{}", Uuid::new_v4(), reference.extension())
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), MediaError> {
    fs::write(path, bytes).map_err(|source| MediaError::Io {
        path: path.to_path_buf(),
        source,
    })
}
