//! Row to source conversion.

use crate::config::ColumnSelection;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AnalysisContext, SourceRecord, REQUIRED_COLUMNS};
use crate::votable::{MaskFill, Table};

/// Required columns absent from `table`, in declaration order.
pub fn missing_columns(table: &Table) -> Vec<&'static str> {
    REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !table.has_column(column))
        .collect()
}

/// Fail with [`PipelineError::MissingColumn`] on the first absent column.
pub fn check_required_columns(table: &Table) -> PipelineResult<()> {
    match missing_columns(table).first() {
        Some(column) => Err(PipelineError::MissingColumn(column.to_string())),
        None => Ok(()),
    }
}

/// One record per row, full row content, `id` = row position.
pub fn build_sources(table: &Table, fill: MaskFill) -> Vec<SourceRecord> {
    (0..table.len())
        .map(|i| SourceRecord::new(table.row_json(i, fill), i))
        .collect()
}

/// Aggregate context, optionally narrowed to the required columns.
pub fn build_context(sources: &[SourceRecord], columns: ColumnSelection) -> AnalysisContext {
    let sources = match columns {
        ColumnSelection::FullRow => sources.to_vec(),
        ColumnSelection::Required => sources
            .iter()
            .map(|source| source.project(&REQUIRED_COLUMNS))
            .collect(),
    };
    AnalysisContext::new(sources)
}
