use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the append-only registry table holding every allocated cluster identifier.
pub const REGISTRY_TABLE: &str = "backbone_index";
/// Primary key column of [`REGISTRY_TABLE`].
pub const REGISTRY_KEY: &str = "idx";
/// Every provider dataset lives in a table named `bi_<provider>`.
pub const PROVIDER_TABLE_PREFIX: &str = "bi_";

pub const CLUSTER_ID: &str = "cluster_id";
pub const LINK_SCORE: &str = "link_score";
pub const CLUSTER_ID_FROM_DB: &str = "cluster_id_from_db";
pub const LINK_SCORE_FROM_DB: &str = "link_score_from_db";
pub const JURISDICTION: &str = "jurisdiction";

/// A cluster identifier. Matcher-local ids and global backbone ids share this numeric space;
/// an id becomes global once it is registered in [`REGISTRY_TABLE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub i64);

impl ClusterId {
    pub fn get(self) -> i64 { self.0 }
    pub fn next(self) -> ClusterId { ClusterId(self.0 + 1) }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A single cell. CSV input arrives as `Text`; typed variants come from the database or from
/// matcher annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Empty CSV cells are nulls, everything else is kept verbatim.
    pub fn from_cell(cell: &str) -> Value {
        if cell.is_empty() { Value::Null } else { Value::Text(cell.to_string()) }
    }

    pub fn is_null(&self) -> bool { matches!(self, Value::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Text(s) => {
                let t = s.trim();
                t.parse::<i64>().ok().or_else(|| {
                    t.parse::<f64>().ok().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Null => None,
        }
    }

    /// Textual form used for CSV output and as a comparison key. `None` for nulls.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            // Debug keeps the trailing ".0" so floats stay floats when re-read
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// SQL column type chosen for a dataset column when a provider table is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType { BigInt, Double, Varchar }

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Varchar => "VARCHAR(500)",
        }
    }
}
