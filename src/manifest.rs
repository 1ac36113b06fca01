//! Manifest line codec and recording records.
//!
//! A manifest is a text file with one record per line. A line is either a
//! JSON object or tab-separated `key:value` pairs; records are always written
//! back as compact JSON with non-ASCII text kept as-is.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Refused to write a manifest with no lines.
    #[error("Refusing to write an empty manifest to {path}")]
    EmptyWrite { path: PathBuf },
    /// The file has no records where at least one is required.
    #[error("Manifest {path} has no records")]
    Empty { path: PathBuf },
    #[error("Invalid JSON record {line:?}: {source}")]
    Json {
        line: String,
        source: serde_json::Error,
    },
    #[error("Record is a JSON {kind}, expected an object: {line:?}")]
    NotAnObject { kind: &'static str, line: String },
    #[error("Record {record} is missing field {field}")]
    MissingField { field: &'static str, record: String },
    #[error("Record {record} has invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        record: String,
        reason: String,
    },
}

/// One decoded manifest line with its fields kept in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Decode a JSON line or a tab-separated `key:value` line.
    pub fn parse(line: &str) -> Result<Self, ManifestError> {
        let line = line.trim();
        if line.starts_with('{') {
            let value: Value = serde_json::from_str(line).map_err(|source| ManifestError::Json {
                line: line.to_string(),
                source,
            })?;
            return match value {
                Value::Object(map) => Ok(Self(map)),
                other => Err(ManifestError::NotAnObject {
                    kind: json_kind(&other),
                    line: line.to_string(),
                }),
            };
        }
        let mut map = Map::new();
        for field in line.split('\t') {
            let (name, value) = field.split_once(':').unwrap_or((field, ""));
            let name = name.trim();
            let value = if name == "len" {
                value
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|err| ManifestError::InvalidField {
                        field: "len",
                        record: line.to_string(),
                        reason: err.to_string(),
                    })?
            } else {
                Value::String(value.to_string())
            };
            map.insert(name.to_string(), value);
        }
        Ok(Self(map))
    }

    /// Encode as a compact JSON line.
    pub fn to_line(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    fn require(&self, field: &'static str) -> Result<&Value, ManifestError> {
        self.0.get(field).ok_or_else(|| ManifestError::MissingField {
            field,
            record: self.to_line(),
        })
    }

    /// Read a field as text; numbers are rendered in their JSON form.
    pub fn text(&self, field: &'static str) -> Result<String, ManifestError> {
        match self.require(field)? {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            other => Err(self.invalid(field, format!("expected text, found {}", json_kind(other)))),
        }
    }

    /// Read a numeric field; numeric strings (TSV lines) are accepted.
    pub fn number(&self, field: &'static str) -> Result<f64, ManifestError> {
        let value = match self.require(field)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        };
        match value {
            Some(value) if value.is_finite() => Ok(value),
            _ => Err(self.invalid(field, "expected a finite number".to_string())),
        }
    }

    fn invalid(&self, field: &'static str, reason: String) -> ManifestError {
        ManifestError::InvalidField {
            field,
            record: self.to_line(),
            reason,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Song identity used as ranking ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recording as listed in an input manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub key: String,
    pub label: Label,
    pub duration_s: f64,
    /// The full source record, carried into chunk manifests.
    pub record: Record,
}

impl Recording {
    /// Requires `rec`, `song_id` and one of `dur_s` / `dur_ms`.
    pub fn from_record(record: Record) -> Result<Self, ManifestError> {
        let key = record.text("rec")?;
        let label = Label::new(record.text("song_id")?);
        let duration_s = if record.contains("dur_s") {
            record.number("dur_s")?
        } else if record.contains("dur_ms") {
            record.number("dur_ms")? / 1000.0
        } else {
            return Err(ManifestError::MissingField {
                field: "dur_s",
                record: record.to_line(),
            });
        };
        Ok(Self {
            key,
            label,
            duration_s,
            record,
        })
    }

    /// Path of the feature array when the manifest carries one.
    pub fn feature_path(&self) -> Result<PathBuf, ManifestError> {
        self.record.text("feat").map(PathBuf::from)
    }
}

/// Read non-blank lines, trimmed.
pub fn read_lines(path: &Path) -> Result<Vec<String>, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.replace(' ', "").is_empty())
        .map(str::to_string)
        .collect())
}

/// Write one line per entry; an empty list is an error.
pub fn write_lines(path: &Path, lines: &[String]) -> Result<(), ManifestError> {
    if lines.is_empty() {
        return Err(ManifestError::EmptyWrite {
            path: path.to_path_buf(),
        });
    }
    let mut text = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    std::fs::write(path, text).map_err(|source| ManifestError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Read every recording from a manifest, in file order.
pub fn read_recordings(path: &Path) -> Result<Vec<Recording>, ManifestError> {
    read_lines(path)?
        .iter()
        .map(|line| Record::parse(line).and_then(Recording::from_record))
        .collect()
}

/// Read the `query_in_ref` pairs from the first line of an exclusion file.
///
/// Indices are not bounds-checked here; see `ExclusionSet::from_pairs`.
pub fn read_exclusion_pairs(path: &Path) -> Result<Vec<(usize, usize)>, ManifestError> {
    let lines = read_lines(path)?;
    let first = lines.first().ok_or_else(|| ManifestError::Empty {
        path: path.to_path_buf(),
    })?;
    let record = Record::parse(first)?;
    let raw = record
        .get("query_in_ref")
        .ok_or_else(|| ManifestError::MissingField {
            field: "query_in_ref",
            record: record.to_line(),
        })?;
    let parsed;
    let raw = match raw {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).map_err(|source| ManifestError::Json {
                line: text.clone(),
                source,
            })?;
            &parsed
        }
        other => other,
    };
    let bad = |reason: String| ManifestError::InvalidField {
        field: "query_in_ref",
        record: record.to_line(),
        reason,
    };
    let Value::Array(items) = raw else {
        return Err(bad("expected a list of index pairs".to_string()));
    };
    items
        .iter()
        .enumerate()
        .map(|(pos, item)| match item.as_array().map(Vec::as_slice) {
            Some([query, reference]) => match (query.as_u64(), reference.as_u64()) {
                (Some(query), Some(reference)) => Ok((query as usize, reference as usize)),
                _ => Err(bad(format!("pair {pos} is not two non-negative integers"))),
            },
            _ => Err(bad(format!("entry {pos} is not a pair"))),
        })
        .collect()
}
