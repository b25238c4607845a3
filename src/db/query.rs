//! Shared query result types used by all database drivers

use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

/// Represents a cell value in the result set
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{:.6}", v),
            CellValue::Decimal(v) => write!(f, "{}", v),
            CellValue::String(v) => write!(f, "{}", v),
            CellValue::DateTime(v) => write!(f, "{}", v),
            CellValue::Binary(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

/// Cells serialize as plain JSON scalars; decimals and binaries as strings.
impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_unit(),
            CellValue::Bool(v) => serializer.serialize_bool(*v),
            CellValue::Int(v) => serializer.serialize_i64(*v),
            CellValue::Float(v) => serializer.serialize_f64(*v),
            CellValue::Decimal(v) => Serialize::serialize(v, serializer),
            CellValue::String(v) | CellValue::DateTime(v) => serializer.serialize_str(v),
            CellValue::Binary(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// One row: ordered, heterogeneously typed cells.
pub type Row = Vec<CellValue>;

/// Event produced lazily by a driver while a script runs.
///
/// `Columns` opens a new result set; the `Row`s after it belong to that set
/// until the next `Columns`.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryItem {
    Columns(Vec<String>),
    Row(Row),
}

/// A fully materialized result set
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub meta: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(meta: Vec<String>) -> Self {
        Self {
            meta,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One unit delivered to a streaming callback.
///
/// Exactly one field is set: `meta` opens a result set, `rows` carries a
/// window of its rows, and `resolve` ends the whole query.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Chunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve: Option<bool>,
}

impl Chunk {
    pub fn meta(columns: Vec<String>) -> Self {
        Self {
            meta: Some(columns),
            ..Self::default()
        }
    }

    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows: Some(rows),
            ..Self::default()
        }
    }

    pub fn resolve() -> Self {
        Self {
            resolve: Some(true),
            ..Self::default()
        }
    }

    pub fn is_resolve(&self) -> bool {
        self.resolve == Some(true)
    }
}

/// Outcome of a non-query script
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NonQueryResult {
    pub rowcount: u64,
}

// Helper for hex encoding binary data
mod hex {
    pub fn encode(data: &[u8]) -> String {
        data.iter().map(|b| format!("{:02X}", b)).collect()
    }
}
