//! Typed cell values and rows.

use std::collections::BTreeMap;
use std::fmt;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;
use uuid::Uuid;

use crate::catalog::ColumnType;

/// A row payload: column name to value.
pub type Row = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Json(serde_json::Value),
    Timestamp(OffsetDateTime),
}

/// Namespace for UUIDs derived from non-UUID seed keys.
fn seed_namespace() -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"warehouse.local/seed")
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Coerces a seed-file JSON value into the declared column type.
    ///
    /// UUID columns accept arbitrary keys, which are mapped to a stable v5
    /// UUID. Unparsable float values degrade to NULL.
    pub fn from_json(json: &serde_json::Value, column_type: ColumnType) -> Result<Value, String> {
        use serde_json::Value as J;

        if json.is_null() {
            return Ok(Value::Null);
        }

        match column_type {
            ColumnType::Text => match json {
                J::String(s) => Ok(Value::Text(s.clone())),
                J::Number(n) => Ok(Value::Text(n.to_string())),
                J::Bool(b) => Ok(Value::Text(b.to_string())),
                other => Err(format!("expected text, got {other}")),
            },
            ColumnType::Uuid => Ok(Value::Uuid(match json {
                J::String(s) => {
                    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::new_v5(&seed_namespace(), s.as_bytes()))
                }
                other => Uuid::new_v5(&seed_namespace(), other.to_string().as_bytes()),
            })),
            ColumnType::Integer => match json {
                J::Number(n) => n
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| format!("expected integer, got {n}")),
                other => Err(format!("expected integer, got {other}")),
            },
            ColumnType::Float => {
                let parsed = match json {
                    J::Number(n) => n.as_f64(),
                    J::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                Ok(match parsed {
                    Some(f) => Value::Float(f),
                    None => {
                        warn!("Unparsable float {json}, storing NULL");
                        Value::Null
                    }
                })
            }
            ColumnType::Boolean => match json {
                J::Bool(b) => Ok(Value::Bool(*b)),
                other => Err(format!("expected boolean, got {other}")),
            },
            ColumnType::Json => Ok(Value::Json(match json {
                J::String(s) => serde_json::from_str(s).unwrap_or_else(|_| json.clone()),
                other => other.clone(),
            })),
            ColumnType::Timestamp => match json {
                J::String(s) => OffsetDateTime::parse(s, &Rfc3339)
                    .map(Value::Timestamp)
                    .map_err(|e| format!("invalid timestamp {s:?}: {e}")),
                other => Err(format!("expected RFC 3339 timestamp, got {other}")),
            },
        }
    }

    /// Stable text form used to compare keys across rows.
    pub(crate) fn canonical(&self) -> String {
        match self {
            Value::Null => "\u{0}null".to_string(),
            Value::Timestamp(ts) => ts.unix_timestamp_nanos().to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Json(j) => write!(f, "{j}"),
            Value::Timestamp(ts) => match ts.format(&Rfc3339) {
                Ok(s) => write!(f, "{s}"),
                Err(_) => write!(f, "{ts}"),
            },
        }
    }
}

/// Extracts the values of `columns` from a row; absent columns read as NULL.
pub fn key_of(row: &Row, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Joins key values into a single comparable string.
pub(crate) fn canonical_key(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::canonical)
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Renders a key for reports, e.g. `user_id=usr_01`.
pub fn describe_key(columns: &[String], values: &[Value]) -> String {
    columns
        .iter()
        .zip(values)
        .map(|(c, v)| format!("{c}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
