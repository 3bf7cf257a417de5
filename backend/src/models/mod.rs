//! Domain models for the emitted documents.
//!
//! - [`SourceRecord`]: one row as a JSON object plus its positional `id`
//! - [`AnalysisContext`]: the aggregate `{"sources": [...]}` document
//! - [`JobKind`]: where a job's input table comes from

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key added to every source with the row's zero-based position.
pub const ID_KEY: &str = "id";

/// Columns every input table must define.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "source_id",
    "mag_bj",
    "mag_g",
    "mag_grvs",
    "mag_rf",
    "ra",
    "dec",
];

/// One source: the row's columns in table order, then `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Map<String, Value>);

impl SourceRecord {
    /// Build a record from a row's columns, appending `id = index`.
    ///
    /// A table column that is itself called `id` is overwritten.
    pub fn new(mut columns: Map<String, Value>, index: usize) -> Self {
        columns.insert(ID_KEY.to_string(), Value::from(index));
        Self(columns)
    }

    pub fn id(&self) -> Option<u64> {
        self.0.get(ID_KEY).and_then(Value::as_u64)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Detail document: the listed columns, keyed by name, without `id`.
    pub fn details<'a, I>(&self, columns: I) -> Map<String, Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        columns
            .into_iter()
            .map(|column| {
                let value = self.0.get(column).cloned().unwrap_or(Value::Null);
                (column.to_string(), value)
            })
            .collect()
    }

    /// Keep only the listed columns (and `id`).
    pub fn project(&self, columns: &[&str]) -> Self {
        let mut projected: Map<String, Value> = columns
            .iter()
            .filter_map(|&c| self.0.get(c).map(|v| (c.to_string(), v.clone())))
            .collect();
        if let Some(id) = self.0.get(ID_KEY) {
            projected.insert(ID_KEY.to_string(), id.clone());
        }
        Self(projected)
    }
}

/// Aggregate context document written as the job's declared output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub sources: Vec<SourceRecord>,
}

impl AnalysisContext {
    pub fn new(sources: Vec<SourceRecord>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Where a job's input table comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobKind {
    /// A file already present in the input directory.
    SharedFile { sharedfile: String },
    /// An ADQL query run against the remote catalog first.
    Query { query: String },
}

impl JobKind {
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::SharedFile { .. } => "sharedfile",
            JobKind::Query { .. } => "query",
        }
    }
}
