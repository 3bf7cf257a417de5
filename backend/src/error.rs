//! Error types for the sourcecat pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`TableError`] - VOTable reading errors (the "malformed table" family)
//! - [`ConfigError`] - Rejected job parameters and settings
//! - [`FetchError`] - Remote catalog (TAP) errors
//! - [`PipelineError`] - Top-level transform errors
//! - [`ServerError`] - HTTP API errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// VOTable Errors
// =============================================================================

/// Errors while reading a VOTable document.
#[derive(Debug, Error)]
pub enum TableError {
    /// Failed to read file.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed XML.
    #[error("XML error at byte {position}: {message}")]
    Xml { position: u64, message: String },

    /// The XML declaration names an encoding we cannot decode.
    #[error("Unsupported document encoding: {0}")]
    Encoding(String),

    /// No TABLE element at the requested index.
    #[error("No TABLE element found (wanted table #{0})")]
    NoTable(usize),

    /// The table declares no FIELD elements.
    #[error("TABLE declares no FIELD elements")]
    NoFields,

    /// Unknown or missing FIELD datatype.
    #[error("Field '{field}': unsupported datatype '{datatype}'")]
    UnsupportedDatatype { field: String, datatype: String },

    /// Invalid arraysize attribute.
    #[error("Field '{field}': invalid arraysize '{arraysize}'")]
    InvalidArraysize { field: String, arraysize: String },

    /// Serialization we do not decode (FITS, external streams, ...).
    #[error("Unsupported serialization: {0}")]
    UnsupportedSerialization(String),

    /// A TABLEDATA cell could not be converted to its datatype.
    #[error("Row {row}, field '{field}': cannot parse '{value}' as {datatype}")]
    InvalidValue {
        row: usize,
        field: String,
        value: String,
        datatype: &'static str,
    },

    /// A row does not carry one cell per field.
    #[error("Row {row}: expected {expected} cells, found {found}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Base64 decoding of a STREAM failed.
    #[error("Invalid base64 stream: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A binary stream ended in the middle of a row.
    #[error("Binary stream truncated in row {row}, field '{field}'")]
    Truncated { row: usize, field: String },

    /// A binary row decoded without consuming any bytes.
    #[error("Binary row {0} occupies no bytes")]
    EmptyRow(usize),

    /// The service answered with a QUERY_STATUS error document.
    #[error("Query failed: {0}")]
    QueryStatus(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while building a job configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required parameter was not supplied.
    #[error("Missing required parameter: {0}")]
    Missing(&'static str),

    /// A parameter was supplied but is not acceptable.
    #[error("Invalid value for '{name}': {message}")]
    Invalid { name: &'static str, message: String },
}

// =============================================================================
// Fetch Errors
// =============================================================================

/// Errors from the remote catalog service.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Writing the downloaded table failed.
    #[error("Failed to store '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level transform errors.
///
/// This is the error type returned by [`crate::transform::pipeline::transform`]
/// and the two job variants.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required column is absent from the parsed table.
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    /// The input could not be parsed as a VOTable table.
    #[error("Malformed table: {0}")]
    MalformedTable(#[from] TableError),

    /// Reading or writing a file failed.
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rejected job parameters.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The upstream fetch failed.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown job or source.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request clashes with a job already in the registry.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for VOTable operations.
pub type TableResult<T> = Result<T, TableError>;

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // TableError -> PipelineError
        let table_err = TableError::NoFields;
        let pipeline_err: PipelineError = table_err.into();
        assert!(matches!(pipeline_err, PipelineError::MalformedTable(_)));
        assert!(pipeline_err.to_string().contains("FIELD"));

        // ConfigError -> PipelineError -> ServerError
        let config_err = ConfigError::Missing("request_id");
        let server_err: ServerError = PipelineError::from(config_err).into();
        assert!(server_err.to_string().contains("request_id"));
    }

    #[test]
    fn test_io_error_names_path() {
        let err = PipelineError::io(
            "/tmp/out/42_0_details",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("42_0_details"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_invalid_value_format() {
        let err = TableError::InvalidValue {
            row: 3,
            field: "ra".into(),
            value: "abc".into(),
            datatype: "double",
        };
        let msg = err.to_string();
        assert!(msg.contains("Row 3"));
        assert!(msg.contains("'ra'"));
        assert!(msg.contains("double"));
    }
}
