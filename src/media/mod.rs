//! Media Module
//!
//! Handles media references embedded in records:
//! - MediaReference: recognition of the `data:<mime>;<kind>` convention
//! - MediaHandler: resolve input references / persist output media
//! - LocalMediaHandler: local file-system implementation

mod local;
mod reference;


pub use local::LocalMediaHandler;
pub use reference::{MediaKind, MediaReference};

use crate::{Record, Value, error::MediaError};
use std::path::Path;

/// Media utility contract used by the batch engine
pub trait MediaHandler: Send + Sync {
    /// Make any relative path reference in `value` absolute against `base_dir`
    ///
    /// Must be idempotent: already-absolute references are left as they are.
    fn resolve_path(&self, base_dir: &Path, value: Value) -> Value;

    /// Write embedded media of `record` under `output_dir` and return the
    /// record with durable, output-relative references
    fn persist(&self, record: Record, output_dir: &Path) -> Result<Record, MediaError>;
}
