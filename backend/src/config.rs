//! Settings and per-job configuration.
//!
//! [`Settings`] holds the process-wide directories and service URL, loaded
//! once at startup. [`TransformConfig`] is the validated parameter set of a
//! single transform; nothing in the pipeline reads global state.

use std::env;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
pub use crate::votable::MaskFill;

/// Default TAP endpoint (ESA Gaia archive).
pub const DEFAULT_TAP_URL: &str = "https://gea.esac.esa.int/tap-server/tap";

/// Suffix of per-source detail files.
pub const DETAILS_SUFFIX: &str = "_details";

static SAFE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex"));

/// Process-wide settings.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Directory shared files are resolved against.
    pub input_dir: PathBuf,
    /// Directory every artifact is written to.
    pub output_dir: PathBuf,
    /// Base URL of the TAP service used by query jobs.
    pub tap_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            tap_url: DEFAULT_TAP_URL.to_string(),
        }
    }
}

impl Settings {
    /// Load from `SOURCECAT_INPUT_DIR`, `SOURCECAT_OUTPUT_DIR` and
    /// `SOURCECAT_TAP_URL`. `main` loads `.env` beforehand.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            input_dir: env::var_os("SOURCECAT_INPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.input_dir),
            output_dir: env::var_os("SOURCECAT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            tap_url: env::var("SOURCECAT_TAP_URL").unwrap_or(defaults.tap_url),
        }
    }

    /// Resolve a shared file name against the input directory.
    pub fn shared_file_path(&self, sharedfile: &str) -> Result<PathBuf, ConfigError> {
        let relative = Path::new(sharedfile);
        if sharedfile.trim().is_empty() {
            return Err(ConfigError::Missing("sharedfile"));
        }
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(ConfigError::Invalid {
                name: "sharedfile",
                message: format!("'{sharedfile}' must stay inside the input directory"),
            });
        }
        Ok(self.input_dir.join(relative))
    }

    /// Detail file of source `id` written by job `request_id`.
    pub fn details_path(&self, request_id: &str, id: usize) -> PathBuf {
        self.output_dir.join(details_file_name(request_id, id))
    }

    /// Where a query job stores the fetched table.
    pub fn fetched_table_path(&self, output_file: &str) -> PathBuf {
        self.output_dir
            .join(format!("simulatedData_{output_file}.vot"))
    }

    /// Records the query the fetched table was produced by.
    pub fn fetched_query_path(&self, output_file: &str) -> PathBuf {
        self.output_dir
            .join(format!("simulatedData_{output_file}.query"))
    }
}

/// `<request_id>_<id>_details`
pub fn details_file_name(request_id: &str, id: usize) -> String {
    format!("{request_id}_{id}{DETAILS_SUFFIX}")
}

/// Which columns the aggregate context carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnSelection {
    /// Every column of the row.
    #[default]
    FullRow,
    /// Only the required magnitude and position columns.
    Required,
}

impl std::str::FromStr for ColumnSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" | "full-row" | "all" => Ok(ColumnSelection::FullRow),
            "required" => Ok(ColumnSelection::Required),
            other => Err(format!("unknown column selection '{other}' (expected full or required)")),
        }
    }
}

/// Validated parameters of one transform.
#[derive(Debug, Clone, Serialize)]
pub struct TransformConfig {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_file: String,
    pub request_id: String,
    pub mask_fill: MaskFill,
    pub columns: ColumnSelection,
}

impl TransformConfig {
    pub fn builder() -> TransformConfigBuilder {
        TransformConfigBuilder::default()
    }

    /// `<output_dir>/<output_file>`
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.output_file)
    }

    /// `<output_dir>/<request_id>_<id>_details`
    pub fn details_path(&self, id: usize) -> PathBuf {
        self.output_dir.join(details_file_name(&self.request_id, id))
    }
}

/// Builder for [`TransformConfig`]; [`build`](Self::build) fails fast on
/// missing or unsafe parameters.
#[derive(Debug, Clone, Default)]
pub struct TransformConfigBuilder {
    input_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    output_file: Option<String>,
    request_id: Option<String>,
    mask_fill: MaskFill,
    columns: ColumnSelection,
}

impl TransformConfigBuilder {
    pub fn input_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn output_file(mut self, name: impl Into<String>) -> Self {
        self.output_file = Some(name.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn mask_fill(mut self, fill: MaskFill) -> Self {
        self.mask_fill = fill;
        self
    }

    pub fn columns(mut self, columns: ColumnSelection) -> Self {
        self.columns = columns;
        self
    }

    pub fn build(self) -> Result<TransformConfig, ConfigError> {
        let input_path = self.input_path.ok_or(ConfigError::Missing("input_path"))?;
        let output_dir = self.output_dir.ok_or(ConfigError::Missing("output_dir"))?;
        let output_file = required_name("output_file", self.output_file)?;
        let request_id = required_name("request_id", self.request_id)?;

        if output_file.ends_with(DETAILS_SUFFIX) {
            return Err(ConfigError::Invalid {
                name: "output_file",
                message: format!("'{output_file}' would collide with detail files"),
            });
        }

        Ok(TransformConfig {
            input_path,
            output_dir,
            output_file,
            request_id,
            mask_fill: self.mask_fill,
            columns: self.columns,
        })
    }
}

/// File name components: non-empty, no separators, not `.`/`..`.
fn required_name(name: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))?;
    if !SAFE_NAME.is_match(&value) || value == "." || value == ".." {
        return Err(ConfigError::Invalid {
            name,
            message: format!("'{value}' may only contain letters, digits, '.', '_' and '-'"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> TransformConfigBuilder {
        TransformConfig::builder()
            .input_path("input/gaia.vot")
            .output_dir("output")
            .output_file("out.json")
            .request_id("42")
    }

    #[test]
    fn test_paths() {
        let config = builder().build().unwrap();
        assert_eq!(config.output_path(), PathBuf::from("output/out.json"));
        assert_eq!(config.details_path(7), PathBuf::from("output/42_7_details"));
        assert_eq!(config.mask_fill, MaskFill::Null);
        assert_eq!(config.columns, ColumnSelection::FullRow);
    }

    #[test]
    fn test_missing_parameters() {
        let err = TransformConfig::builder().build().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("input_path")));

        let err = builder().request_id("  ").build().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("request_id")));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for bad in ["../escape.json", "a/b.json", "..", "out json"] {
            let err = builder().output_file(bad).build().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { name: "output_file", .. }), "{bad}");
        }
        assert!(builder().request_id("job/1").build().is_err());
        assert!(builder().output_file("42_0_details").build().is_err());
    }

    #[test]
    fn test_shared_file_path() {
        let settings = Settings {
            input_dir: PathBuf::from("/data/in"),
            ..Settings::default()
        };
        assert_eq!(
            settings.shared_file_path("gaia.vot").unwrap(),
            PathBuf::from("/data/in/gaia.vot")
        );
        assert!(settings.shared_file_path("../etc/passwd").is_err());
        assert!(settings.shared_file_path("/etc/passwd").is_err());
        assert!(settings.shared_file_path("").is_err());
    }

    #[test]
    fn test_fetched_table_path() {
        let settings = Settings::default();
        assert_eq!(
            settings.fetched_table_path("out.json"),
            PathBuf::from("output/simulatedData_out.json.vot")
        );
        assert_eq!(
            settings.fetched_query_path("out.json"),
            PathBuf::from("output/simulatedData_out.json.query")
        );
        assert_eq!(
            settings.details_path("42", 3),
            PathBuf::from("output/42_3_details")
        );
    }

    #[test]
    fn test_column_selection_from_str() {
        assert_eq!("required".parse::<ColumnSelection>().unwrap(), ColumnSelection::Required);
        assert_eq!("full".parse::<ColumnSelection>().unwrap(), ColumnSelection::FullRow);
        assert!("some".parse::<ColumnSelection>().is_err());
    }
}
