//! # Sourcecat - VOTable catalogs to per-source JSON records
//!
//! Sourcecat reads an astronomical source catalog in VOTable format and emits
//! one JSON detail document per source plus an aggregate analysis context.
//!
//! ## Architecture
//!
//! ```text
//!                   ┌─────────────┐
//!                   │  TAP query  │ (query jobs only)
//!                   └──────┬──────┘
//!                          ▼
//! ┌─────────────┐   ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │  VOTable    │──▶│   Reader    │──▶│  Transform  │──▶│ <req>_<i>_details│
//! │ (shared or  │   │ (TABLEDATA/ │   │  (sources,  │   │ <outputFile>     │
//! │  fetched)   │   │  BINARY/2)  │   │  ids, fill) │   │ {"sources":[..]} │
//! └─────────────┘   └─────────────┘   └─────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sourcecat::{run_file_job, JobOptions, Settings};
//!
//! let settings = Settings::from_env();
//! let report = run_file_job(&settings, "gaia.vot", "out.json", "42", JobOptions::default())?;
//! println!("Wrote {} sources", report.row_count);
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Settings and validated transform parameters
//! - [`models`] - Source records and the analysis context
//! - [`votable`] - VOTable reading
//! - [`transform`] - Row conversion and the job pipeline
//! - [`fetch`] - TAP query client
//! - [`validation`] - JSON Schema checks of emitted documents
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Parsing
pub mod votable;

// Transformation
pub mod transform;

// Upstream fetch
pub mod fetch;

// Validation
pub mod validation;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError,
    FetchError,
    PipelineError,
    ServerError,
    TableError,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::{
    ColumnSelection,
    MaskFill,
    Settings,
    TransformConfig,
    TransformConfigBuilder,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    AnalysisContext,
    JobKind,
    SourceRecord,
    REQUIRED_COLUMNS,
};

// =============================================================================
// Re-exports - VOTable
// =============================================================================

pub use votable::{
    parse_votable_bytes,
    parse_votable_str,
    read_votable,
    Cell,
    Field,
    Serialization,
    Table,
    VoTableReader,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{
    is_valid_context,
    is_valid_details,
    validate_context,
    validate_details,
};

// =============================================================================
// Re-exports - Fetch
// =============================================================================

pub use fetch::{TableFetcher, TapClient};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{
    fetch_table,
    run_file_job,
    run_query_job,
    transform,
    transform_fetched,
    transform_table,
    JobOptions,
    TransformReport,
};

// =============================================================================
// Re-exports - API
// =============================================================================

pub use api::types::{
    error_response,
    JobRecord,
    JobRequest,
    JobSource,
    JobStatus,
};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
