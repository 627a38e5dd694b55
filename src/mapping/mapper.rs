use super::{InputMapper, InputsMapping, MappingExpression, SourceRecords};
use crate::{Record, Value, error::MappingError};
use tracing::debug;

/// Source that undeclared-but-needed flow inputs are read from
pub const DEFAULT_SOURCE: &str = "data";

/// Default input mapper
///
/// Every source referenced by the mapping must hold the same, non-zero number
/// of records. Counts are never truncated or padded.
#[derive(Debug, Clone, Default)]
pub struct DefaultInputMapper;

impl DefaultInputMapper {
    pub fn new() -> Self {
        Self
    }

    fn line_count(
        sources: &SourceRecords,
        expressions: &[(String, MappingExpression)],
    ) -> Result<usize, MappingError> {
        check_sources(sources, expressions)?;

        let mut referenced: Vec<&str> = Vec::new();
        for source in expressions.iter().filter_map(|(_, e)| e.source()) {
            if !referenced.contains(&source) {
                referenced.push(source);
            }
        }

        if referenced.is_empty() {
            return Err(MappingError::NoSourceReferenced);
        }

        let counts: Vec<(String, usize)> = referenced
            .iter()
            .map(|name| (name.to_string(), sources[*name].len()))
            .collect();

        if let Some((name, _)) = counts.iter().find(|(_, count)| *count == 0) {
            return Err(MappingError::EmptySource(name.clone()));
        }

        let count = counts[0].1;
        if counts.iter().any(|(_, c)| *c != count) {
            return Err(MappingError::CountMismatch(counts));
        }
        Ok(count)
    }

    fn lookup(
        sources: &SourceRecords,
        source: &str,
        path: &[String],
        line: usize,
    ) -> Result<Value, MappingError> {
        let record = &sources[source][line];
        let not_found = || MappingError::FieldNotFound {
            source_name: source.to_string(),
            field: path.join("."),
            line,
        };

        let Some((first, rest)) = path.split_first() else {
            return Ok(Value::Mapping(record.clone()));
        };

        let mut current = record.get(first).ok_or_else(not_found)?;
        for segment in rest {
            current = current
                .as_mapping()
                .and_then(|nested| nested.get(segment))
                .ok_or_else(not_found)?;
        }
        Ok(current.clone())
    }
}

impl InputMapper for DefaultInputMapper {
    fn apply_mapping(
        &self,
        sources: &SourceRecords,
        mapping: &InputsMapping,
    ) -> Result<Vec<Record>, MappingError> {
        let expressions = parse_mapping(mapping)?;
        let count = Self::line_count(sources, &expressions)?;
        debug!("Merging {} lines for {} mapped inputs", count, expressions.len());

        (0..count)
            .map(|line| {
                expressions
                    .iter()
                    .map(|(input, expression)| {
                        let value = match expression {
                            MappingExpression::Literal(literal) => Value::string(literal.clone()),
                            MappingExpression::Reference { source, path } => {
                                Self::lookup(sources, source, path, line)?
                            }
                        };
                        Ok::<_, MappingError>((input.clone(), value))
                    })
                    .collect::<Result<Record, MappingError>>()
            })
            .collect()
    }
}

/// Complete `mapping` against the inputs a flow declares
///
/// Every entry of `mapping` is validated against `sources` first, including
/// entries for inputs the flow does not declare. Declared inputs missing from
/// the mapping are read from the `data` source; undeclared entries are then
/// dropped. An empty declaration keeps the mapping as is.
pub fn complete_mapping(
    mapping: &InputsMapping,
    flow_inputs: &[String],
    sources: &SourceRecords,
) -> Result<InputsMapping, MappingError> {
    check_sources(sources, &parse_mapping(mapping)?)?;

    if flow_inputs.is_empty() {
        return Ok(mapping.clone());
    }

    let mut completed = InputsMapping::new();
    for input in flow_inputs {
        let expression = match mapping.get(input) {
            Some(expression) => expression.clone(),
            None => format!("${{{DEFAULT_SOURCE}.{input}}}"),
        };
        completed.insert(input.clone(), expression);
    }

    for input in mapping.keys().filter(|key| !flow_inputs.contains(*key)) {
        debug!("Dropping mapping for undeclared flow input '{}'", input);
    }
    Ok(completed)
}

fn parse_mapping(mapping: &InputsMapping) -> Result<Vec<(String, MappingExpression)>, MappingError> {
    mapping
        .iter()
        .map(|(input, raw)| {
            MappingExpression::parse(raw)
                .map(|expression| (input.clone(), expression))
                .ok_or_else(|| MappingError::InvalidExpression {
                    input: input.clone(),
                    expression: raw.clone(),
                })
        })
        .collect()
}

/// Every referenced source must have been loaded
fn check_sources(
    sources: &SourceRecords,
    expressions: &[(String, MappingExpression)],
) -> Result<(), MappingError> {
    for (input, expression) in expressions {
        if let Some(source) = expression.source() {
            if !sources.contains_key(source) {
                return Err(MappingError::UnknownSource {
                    input: input.clone(),
                    source_name: source.to_string(),
                });
            }
        }
    }
    Ok(())
}
