//! Media reference convention
//!
//! A media reference is a single-key mapping `{"data:<mime>;<kind>": "<data>"}`
//! where `<kind>` is one of `path`, `base64` or `url`.

use crate::{Record, Value};

const DATA_PREFIX: &str = "data:";

/// How the media content is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Path,
    Base64,
    Url,
}

impl MediaKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(MediaKind::Path),
            "base64" => Some(MediaKind::Base64),
            "url" => Some(MediaKind::Url),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Path => "path",
            MediaKind::Base64 => "base64",
            MediaKind::Url => "url",
        }
    }
}

/// A recognized media reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub mime_type: String,
    pub kind: MediaKind,
    pub data: String,
}

impl MediaReference {
    pub fn path(mime_type: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            kind: MediaKind::Path,
            data: path.into(),
        }
    }

    /// Recognize a media reference, `None` if `value` is anything else
    pub fn parse(value: &Value) -> Option<Self> {
        let record = value.as_mapping()?;
        if record.len() != 1 {
            return None;
        }
        let (key, data) = record.iter().next()?;
        let data = data.as_str()?;

        let (mime_type, kind) = key.strip_prefix(DATA_PREFIX)?.split_once(';')?;
        let (top, sub) = mime_type.split_once('/')?;
        if top.is_empty() || sub.is_empty() {
            return None;
        }

        Some(Self {
            mime_type: mime_type.to_string(),
            kind: MediaKind::parse(kind)?,
            data: data.to_string(),
        })
    }

    /// File extension used when the media is written to disk
    ///
    /// Derived from the MIME subtype without its structured-syntax suffix
    /// (`svg+xml` gives `svg`), restricted to `[a-z0-9._-]`. Falls back to
    /// `bin`.
    pub fn extension(&self) -> String {
        let sub = self
            .mime_type
            .split_once('/')
            .map_or("", |(_, sub)| sub)
            .split(['+', ';'])
            .next()
            .unwrap_or_default();
        let extension: String = sub
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            .collect::<String>()
            .trim_matches('.')
            .to_ascii_lowercase();

        if extension.is_empty() {
            "bin".to_string()
        } else {
            extension
        }
    }

    pub fn to_value(&self) -> Value {
        let mut record = Record::new();
        record.insert(
            format!("{DATA_PREFIX}{};{}", self.mime_type, self.kind.as_str()),
            Value::string(self.data.clone()),
        );
        Value::Mapping(record)
    }
}
