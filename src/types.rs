use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Leaf value inside a record
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

/// Field value: scalar, ordered sequence or nested mapping
///
/// Serialized through `serde_json::Value` so that anything JSON-shaped can be
/// loaded and written back without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Scalar(Scalar),
    Sequence(Vec<Value>),
    Mapping(Record),
}

impl Value {
    pub fn null() -> Self {
        Value::Scalar(Scalar::Null)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::String(s.into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Record> {
        match self {
            Value::Mapping(record) => Some(record),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Scalar(Scalar::Null),
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => Value::Scalar(Scalar::Number(n)),
            serde_json::Value::String(s) => Value::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Mapping(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Scalar(Scalar::Null) => serde_json::Value::Null,
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(b),
            Value::Scalar(Scalar::Number(n)) => serde_json::Value::Number(n),
            Value::Scalar(Scalar::String(s)) => serde_json::Value::String(s),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Mapping(record) => serde_json::Value::Object(
                record
                    .fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// One unit of input or output data
///
/// Field order is insertion order and is preserved on serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object, `None` for any other JSON shape
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match Value::from(value) {
            Value::Mapping(record) => Some(record),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        Value::Mapping(self.clone()).into()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Outcome of one flow invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStatus {
    Completed,
    Failed,
}

/// Error reported by the execution engine for a single line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineError {
    /// Short machine-readable category, e.g. `exit_status` or `timeout`
    pub kind: String,
    pub message: String,
}

/// Per-line result of a bulk run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResult {
    pub line_number: usize,
    pub status: LineStatus,
    pub output: Option<Record>,
    pub error: Option<LineError>,
}

impl LineResult {
    pub fn completed(line_number: usize, output: Record) -> Self {
        Self {
            line_number,
            status: LineStatus::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(line_number: usize, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line_number,
            status: LineStatus::Failed,
            output: None,
            error: Some(LineError {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}

/// Counters and timing of a bulk run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub total_lines: usize,
    pub completed_lines: usize,
    pub failed_lines: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl RunMetadata {
    /// Derive the counters from a set of line results
    pub fn from_lines(
        lines: &[LineResult],
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let completed_lines = lines
            .iter()
            .filter(|line| line.status == LineStatus::Completed)
            .count();
        Self {
            total_lines: lines.len(),
            completed_lines,
            failed_lines: lines.len() - completed_lines,
            start_time,
            end_time,
        }
    }
}

/// Result of one batch run
///
/// `outputs` is replaced by the orchestrator with the persisted form, which is
/// exactly what ends up in `output.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: String,
    pub outputs: Vec<Record>,
    pub line_results: Vec<LineResult>,
    pub metadata: RunMetadata,
}
