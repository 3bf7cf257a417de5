//! VOTable reader.
//!
//! Reads the first (or a chosen) `TABLE` of a VOTable document into an
//! in-memory [`Table`]: ordered [`Field`]s plus rows of [`Cell`]s. Missing
//! values stay explicit as [`Cell::Masked`] until a [`MaskFill`] policy turns
//! them into concrete JSON.
//!
//! Supported serializations are `TABLEDATA`, `BINARY` and `BINARY2` with an
//! inline base64 `STREAM`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sourcecat::votable::{read_votable, MaskFill};
//!
//! let table = read_votable("gaia.vot")?;
//! println!("{} rows, columns: {:?}", table.len(), table.column_names().collect::<Vec<_>>());
//! let first = table.row_json(0, MaskFill::Null);
//! ```

mod binary;
pub mod field;
mod reader;
mod tabledata;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use crate::error::TableResult;

pub use field::{ArraySize, Datatype, Field};
pub use reader::{decode_document, VoTableReader};

/// One table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Missing value: empty TD, null sentinel, NaN, or a BINARY2 null flag.
    Masked,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Array-valued cell (numeric arrays, bit arrays, complex pairs).
    Array(Vec<Cell>),
}

impl Cell {
    pub fn is_masked(&self) -> bool {
        matches!(self, Cell::Masked)
    }

    /// Materialize this cell as JSON, filling masked values per `fill`.
    pub fn to_json(&self, field: &Field, fill: MaskFill) -> Value {
        match self {
            Cell::Masked => fill.fill_value(field, false),
            Cell::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Cell::Masked => fill.fill_value(field, true),
                        other => other.to_json(field, fill),
                    })
                    .collect(),
            ),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Int(i) => json!(i),
            Cell::Float(f) => float_json(*f),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Non-finite floats have no JSON representation and become `null`.
pub(crate) fn float_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// How masked cells are materialized before JSON conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskFill {
    /// Masked cells become `null`.
    #[default]
    Null,
    /// Masked cells become the datatype's zero: `0`, `false` or `""`.
    Zero,
}

impl MaskFill {
    fn fill_value(self, field: &Field, element: bool) -> Value {
        if self == MaskFill::Null {
            return Value::Null;
        }
        // A whole masked array cell fills as an empty array.
        if !element && field.is_array() {
            return Value::Array(Vec::new());
        }
        match field.datatype {
            Datatype::Boolean | Datatype::Bit => Value::Bool(false),
            Datatype::Char | Datatype::UnicodeChar => Value::String(String::new()),
            Datatype::UnsignedByte | Datatype::Short | Datatype::Int | Datatype::Long => json!(0),
            Datatype::Float | Datatype::Double => json!(0.0),
            Datatype::FloatComplex | Datatype::DoubleComplex if element => json!(0.0),
            Datatype::FloatComplex | Datatype::DoubleComplex => json!([0.0, 0.0]),
        }
    }
}

impl std::str::FromStr for MaskFill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Ok(MaskFill::Null),
            "zero" => Ok(MaskFill::Zero),
            other => Err(format!("unknown fill policy '{other}' (expected null or zero)")),
        }
    }
}

/// The data serialization a table was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Serialization {
    TableData,
    Binary,
    Binary2,
    /// The table had no DATA element.
    None,
}

/// A parsed VOTable table.
#[derive(Debug, Clone)]
pub struct Table {
    /// `name` attribute of the TABLE element.
    pub name: Option<String>,
    /// Columns in document order; names are unique.
    pub fields: Vec<Field>,
    /// Rows in document order, one cell per field.
    pub rows: Vec<Vec<Cell>>,
    pub serialization: Serialization,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Full row as a JSON object keyed by column name, in column order.
    ///
    /// Panics if `row` is out of bounds.
    pub fn row_json(&self, row: usize, fill: MaskFill) -> Map<String, Value> {
        self.fields
            .iter()
            .zip(&self.rows[row])
            .map(|(field, cell)| (field.name.clone(), cell.to_json(field, fill)))
            .collect()
    }

    /// Every row as a JSON object.
    pub fn rows_json(&self, fill: MaskFill) -> Vec<Value> {
        (0..self.len())
            .map(|i| Value::Object(self.row_json(i, fill)))
            .collect()
    }

    /// Number of masked cells across the table.
    pub fn masked_count(&self) -> usize {
        self.rows
            .iter()
            .flatten()
            .filter(|cell| cell.is_masked())
            .count()
    }
}

/// Read the first table of a VOTable file.
pub fn read_votable<P: AsRef<Path>>(path: P) -> TableResult<Table> {
    VoTableReader::new().read_path(path)
}

/// Parse the first table of a VOTable document held in memory.
pub fn parse_votable_bytes(bytes: &[u8]) -> TableResult<Table> {
    VoTableReader::new().read_bytes(bytes)
}

/// Parse the first table of an already decoded VOTable document.
pub fn parse_votable_str(text: &str) -> TableResult<Table> {
    VoTableReader::new().read_str(text)
}
