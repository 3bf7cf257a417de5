//! REST API types for the job endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{ColumnSelection, MaskFill};
use crate::models::JobKind;
use crate::transform::pipeline::{JobOptions, TransformReport};

/// Input table of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobSource {
    /// `{"sharedfile": "gaia.vot", ...}`
    SharedFile { sharedfile: String },
    /// `{"query": "SELECT ...", ...}`
    Query { query: String },
}

impl From<JobSource> for JobKind {
    fn from(source: JobSource) -> Self {
        match source {
            JobSource::SharedFile { sharedfile } => JobKind::SharedFile { sharedfile },
            JobSource::Query { query } => JobKind::Query { query },
        }
    }
}

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(flatten)]
    pub source: JobSource,

    /// Name of the aggregate context file
    pub output_file: String,

    /// Generated when absent
    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(default)]
    pub mask_fill: MaskFill,

    #[serde(default)]
    pub columns: ColumnSelection,
}

impl JobRequest {
    pub fn options(&self) -> JobOptions {
        JobOptions {
            mask_fill: self.mask_fill,
            columns: self.columns,
        }
    }
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// Registry entry of a submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub request_id: String,
    pub kind: JobKind,
    pub output_file: String,
    pub status: JobStatus,

    /// Number of sources written, once completed
    pub source_count: Option<usize>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Failure message, once failed
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(request_id: impl Into<String>, kind: JobKind, output_file: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            output_file: output_file.into(),
            status: JobStatus::Running,
            source_count: None,
            created_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn complete(&mut self, report: &TransformReport) {
        self.status = JobStatus::Completed;
        self.source_count = Some(report.row_count);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl ToString) {
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "status": "error",
        "error": error,
    })
}
