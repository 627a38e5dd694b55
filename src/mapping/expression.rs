//! Mapping expressions
//!
//! A mapping value is either a reference into a loaded source or a literal:
//! - `${source}`: the whole record of `source`
//! - `${source.field.nested}`: a (possibly nested) field of `source`
//! - `source.field`: shorthand for `${source.field}` when every segment is an identifier
//! - anything else: a string literal
//!
//! Everything wrapped in `${...}` is a reference. Its field path is taken as
//! written, so `${docs.text-1}` reaches a field named `text-1`.

/// Parsed form of one mapping value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingExpression {
    Reference { source: String, path: Vec<String> },
    Literal(String),
}

impl MappingExpression {
    /// Parse a mapping value
    ///
    /// Returns `None` when a `${...}` wrapper holds no usable reference, such
    /// as `${}` or `${docs..text}`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();

        if let Some(inner) = trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            return Self::braced(inner.trim());
        }

        Some(
            Self::bare(trimmed).unwrap_or_else(|| MappingExpression::Literal(raw.to_string())),
        )
    }

    /// Name of the referenced source, if any
    pub fn source(&self) -> Option<&str> {
        match self {
            MappingExpression::Reference { source, .. } => Some(source),
            MappingExpression::Literal(_) => None,
        }
    }

    fn braced(inner: &str) -> Option<Self> {
        let (source, rest) = match inner.split_once('.') {
            Some((source, rest)) => (source, Some(rest)),
            None => (inner, None),
        };
        if source.is_empty() {
            return None;
        }

        let path: Vec<String> = match rest {
            Some(rest) => rest.split('.').map(str::to_string).collect(),
            None => Vec::new(),
        };
        if path.iter().any(|segment| segment.is_empty()) {
            return None;
        }

        Some(MappingExpression::Reference {
            source: source.to_string(),
            path,
        })
    }

    fn bare(dotted: &str) -> Option<Self> {
        let segments: Vec<&str> = dotted.split('.').collect();
        if segments.len() < 2 || !segments.iter().all(|s| is_identifier(s)) {
            return None;
        }
        Some(MappingExpression::Reference {
            source: segments[0].to_string(),
            path: segments[1..].iter().map(|s| s.to_string()).collect(),
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
