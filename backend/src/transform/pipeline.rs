//! High-level pipeline API: VOTable in, detail files and context out.
//!
//! [`transform`] is the whole job for a table already on disk. The two job
//! variants only differ in where that table comes from:
//!
//! - [`run_file_job`]: a shared file from the input directory
//! - [`run_query_job`]: a table fetched from the TAP service first
//!
//! # Example
//!
//! ```rust,ignore
//! use sourcecat::config::TransformConfig;
//! use sourcecat::transform::pipeline::transform;
//!
//! let config = TransformConfig::builder()
//!     .input_path("input/gaia.vot")
//!     .output_dir("output")
//!     .output_file("out.json")
//!     .request_id("42")
//!     .build()?;
//! let report = transform(&config)?;
//! println!("{} sources", report.row_count);
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;

use super::sources::{build_context, build_sources, check_required_columns};
use crate::api::logs::{log_info, log_success, log_warning};
use crate::config::{ColumnSelection, MaskFill, Settings, TransformConfig, DETAILS_SUFFIX};
use crate::error::{PipelineError, PipelineResult, TableError};
use crate::fetch::TableFetcher;
use crate::votable::{read_votable, Serialization, Table};

/// Options shared by both job variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOptions {
    pub mask_fill: MaskFill,
    pub columns: ColumnSelection,
}

/// Summary of a finished transform.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformReport {
    pub request_id: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    pub masked_cells: usize,
    pub serialization: Serialization,
    pub detail_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
}

/// Read the configured table and write its detail files and context.
///
/// The context file is written last, and atomically, so its existence means
/// every detail file was written.
pub fn transform(config: &TransformConfig) -> PipelineResult<TransformReport> {
    remove_previous_context(config)?;

    log_info(format!("📖 Reading VOTable: {}", config.input_path.display()));
    let table = read_votable(&config.input_path).map_err(|err| match err {
        TableError::Io { path, source } => PipelineError::Io { path, source },
        other => PipelineError::MalformedTable(other),
    })?;
    log_success(format!(
        "Read {} rows x {} columns ({:?})",
        table.len(),
        table.fields.len(),
        table.serialization
    ));
    transform_table(&table, config)
}

/// Same as [`transform`] for a table already in memory.
pub fn transform_table(table: &Table, config: &TransformConfig) -> PipelineResult<TransformReport> {
    remove_previous_context(config)?;
    check_required_columns(table)?;

    let output_path = config.output_path();
    fs::create_dir_all(&config.output_dir).map_err(|e| PipelineError::io(&config.output_dir, e))?;

    let masked_cells = table.masked_count();
    if masked_cells > 0 {
        log_info(format!("{} masked cells filled as {:?}", masked_cells, config.mask_fill));
    }

    let sources = build_sources(table, config.mask_fill);
    let columns: Vec<String> = table.column_names().map(str::to_string).collect();

    log_info(format!("⚙️  Writing {} detail files...", sources.len()));
    let detail_paths = sources
        .par_iter()
        .enumerate()
        .map(|(i, source)| {
            let path = config.details_path(i);
            let details = source.details(columns.iter().map(String::as_str));
            write_json(&path, &details)?;
            Ok(path)
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let stale = remove_stale_details(config, sources.len())?;
    if stale > 0 {
        log_warning(format!("Removed {} detail files left by a longer earlier run", stale));
    }

    let context = build_context(&sources, config.columns);
    write_json_atomic(&output_path, &context)?;
    log_success(format!(
        "{} sources written to {}",
        context.len(),
        output_path.display()
    ));

    Ok(TransformReport {
        request_id: config.request_id.clone(),
        row_count: table.len(),
        columns,
        masked_cells,
        serialization: table.serialization,
        detail_paths,
        output_path,
    })
}

/// A context left by an earlier run must not outlive a failed rerun.
fn remove_previous_context(config: &TransformConfig) -> PipelineResult<()> {
    let output_path = config.output_path();
    if output_path.exists() {
        log_warning(format!("Replacing existing output {}", output_path.display()));
        fs::remove_file(&output_path).map_err(|e| PipelineError::io(&output_path, e))?;
    }
    Ok(())
}

/// Delete `<request_id>_<n>_details` files with `n >= row_count`.
fn remove_stale_details(config: &TransformConfig, row_count: usize) -> PipelineResult<usize> {
    let prefix = format!("{}_", config.request_id);
    let entries =
        fs::read_dir(&config.output_dir).map_err(|e| PipelineError::io(&config.output_dir, e))?;

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(&config.output_dir, e))?;
        let name = entry.file_name();
        let index = name
            .to_str()
            .and_then(|n| n.strip_prefix(&prefix))
            .and_then(|n| n.strip_suffix(DETAILS_SUFFIX))
            .and_then(|n| n.parse::<usize>().ok());
        if index.is_some_and(|i| i >= row_count) {
            let path = entry.path();
            fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Variant A: transform a shared file from the input directory.
pub fn run_file_job(
    settings: &Settings,
    sharedfile: &str,
    output_file: &str,
    request_id: &str,
    options: JobOptions,
) -> PipelineResult<TransformReport> {
    let input_path = settings.shared_file_path(sharedfile)?;
    let config = job_config(settings, input_path, output_file, request_id, options)?;
    transform(&config)
}

/// Variant B: fetch the query result, then transform it.
///
/// The transform runs on the calling thread.
pub async fn run_query_job<F: TableFetcher>(
    settings: &Settings,
    fetcher: &F,
    query: &str,
    output_file: &str,
    request_id: &str,
    options: JobOptions,
) -> PipelineResult<TransformReport> {
    let config = job_config(
        settings,
        settings.fetched_table_path(output_file),
        output_file,
        request_id,
        options,
    )?;
    fetch_table(settings, fetcher, query, output_file).await?;
    transform_fetched(settings, &config)
}

/// Upstream step of a query job. A table fetched earlier by the same query
/// is reused rather than fetched again.
pub async fn fetch_table<F: TableFetcher>(
    settings: &Settings,
    fetcher: &F,
    query: &str,
    output_file: &str,
) -> PipelineResult<PathBuf> {
    let destination = settings.fetched_table_path(output_file);
    let marker = settings.fetched_query_path(output_file);
    if destination.exists() {
        match fs::read_to_string(&marker) {
            Ok(previous) if previous == query => {
                log_info(format!("Reusing fetched table {}", destination.display()));
                return Ok(destination);
            }
            _ => log_warning(format!(
                "{} was fetched for another query, fetching again",
                destination.display()
            )),
        }
    }
    fs::create_dir_all(&settings.output_dir).map_err(|e| PipelineError::io(&settings.output_dir, e))?;
    remove_if_exists(&marker)?;

    log_info("📡 Running catalog query...");
    fetcher.fetch(query, &destination).await?;
    fs::write(&marker, query).map_err(|e| PipelineError::io(&marker, e))?;
    log_success(format!("Query result stored in {}", destination.display()));
    Ok(destination)
}

/// Transform a fetched table. A stored service error document is discarded
/// so the next run fetches again.
pub fn transform_fetched(settings: &Settings, config: &TransformConfig) -> PipelineResult<TransformReport> {
    let result = transform(config);
    if let Err(PipelineError::MalformedTable(TableError::QueryStatus(_))) = &result {
        log_warning(format!("Discarding failed query result {}", config.input_path.display()));
        remove_if_exists(&config.input_path)?;
        remove_if_exists(&settings.fetched_query_path(&config.output_file))?;
    }
    result
}

fn remove_if_exists(path: &Path) -> PipelineResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(PipelineError::io(path, e)),
        _ => Ok(()),
    }
}

/// Build the transform parameters of a job.
pub fn job_config(
    settings: &Settings,
    input_path: PathBuf,
    output_file: &str,
    request_id: &str,
    options: JobOptions,
) -> PipelineResult<TransformConfig> {
    Ok(TransformConfig::builder()
        .input_path(input_path)
        .output_dir(&settings.output_dir)
        .output_file(output_file)
        .request_id(request_id)
        .mask_fill(options.mask_fill)
        .columns(options.columns)
        .build()?)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let bytes = serde_json::to_vec(value)?;
    fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))
}

/// Write through a temporary file in the same directory, then rename.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec(value)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".sourcecat-")
        .tempfile_in(dir)
        .map_err(|e| PipelineError::io(dir, e))?;
    tmp.write_all(&bytes).map_err(|e| PipelineError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}
