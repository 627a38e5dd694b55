//! Input Mapping Module
//!
//! Turns per-source record sequences into one merged input record per line:
//! - MappingExpression: parsing of mapping values
//! - InputMapper: the contract the batch engine consumes
//! - DefaultInputMapper: positional merge with strict count validation
//! - complete_mapping: fills declared flow inputs from the `data` source

mod expression;
mod mapper;


pub use expression::MappingExpression;
pub use mapper::{DEFAULT_SOURCE, DefaultInputMapper, complete_mapping};

use crate::{Record, error::MappingError};
use indexmap::IndexMap;

/// Loaded records keyed by input source name
pub type SourceRecords = IndexMap<String, Vec<Record>>;

/// Flow input name to mapping expression
pub type InputsMapping = IndexMap<String, String>;

/// Input-mapping contract
pub trait InputMapper: Send + Sync {
    /// Build one merged record per line
    ///
    /// Records are matched across sources strictly by position.
    fn apply_mapping(
        &self,
        sources: &SourceRecords,
        mapping: &InputsMapping,
    ) -> Result<Vec<Record>, MappingError>;
}
