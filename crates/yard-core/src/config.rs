//! # Configuration — Training Specs and Process Settings
//!
//! Two layers of configuration live here:
//!
//! - [`TrainingSpec`] is the per-submission payload: what to train, where
//!   the dataset comes from, and how the run's artifacts should be stored.
//!   Specs arrive over the wire and are validated before a run is queued.
//! - [`YardConfig`] is the process-wide configuration, read once from the
//!   environment at startup with hardcoded defaults for local development.
//!
//! ## Validation
//!
//! Run names and dataset names become object-key prefixes in the store, so
//! validation rejects anything that would escape a prefix: empty names,
//! path separators, and leading dots (dot-prefixed keys are reserved for
//! store-internal metadata objects).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error constructing or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A submission field that becomes an object-key segment is unusable.
    #[error("invalid name for field `{field}`: {reason}")]
    InvalidName {
        /// Which spec field was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A remote-dataset submission named no dataset.
    #[error("spec uses a stored dataset but `dataset_name` is missing")]
    MissingDatasetName,

    /// An environment variable held a value that does not parse.
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidVar {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Training spec
// ---------------------------------------------------------------------------

/// One training-job submission.
///
/// The dataset either rides along with the submission as an uploaded file
/// (`use_local_dataset = true`) or is referenced by name from the dataset
/// bucket (`use_local_dataset = false`, `dataset_name` required).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSpec {
    /// Human-chosen name for the run; doubles as the dataset prefix when
    /// artifacts are archived.
    pub run_name: String,
    /// Registered routine name, or the script filename when a script part
    /// accompanies the submission.
    pub routine: String,
    /// Whether the dataset was uploaded with this submission.
    pub use_local_dataset: bool,
    /// Whether an uploaded dataset should be kept in the named buckets
    /// (as opposed to the scratch bucket).
    #[serde(default)]
    pub store_artifacts: bool,
    /// Name of an already-stored dataset, for `use_local_dataset = false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    /// Free-form description written to the dataset metadata sidecars.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_description: Option<String>,
    /// Password for the named dataset bucket, when it is protected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_password: Option<String>,
    /// Hyperparameters forwarded verbatim to the training routine.
    #[serde(default)]
    pub hyperparams: Map<String, Value>,
}

impl TrainingSpec {
    /// Validate the spec's fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidName`] for names that are empty or
    /// would break out of an object-key prefix, and
    /// [`ConfigError::MissingDatasetName`] when a stored dataset is
    /// requested without naming one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_key_segment("run_name", &self.run_name)?;
        if self.routine.trim().is_empty() {
            return Err(ConfigError::InvalidName {
                field: "routine",
                reason: "must not be empty".into(),
            });
        }
        if !self.use_local_dataset {
            match &self.dataset_name {
                None => return Err(ConfigError::MissingDatasetName),
                Some(name) => validate_key_segment("dataset_name", name)?,
            }
        }
        Ok(())
    }
}

/// Reject values that cannot safely become a single object-key segment.
fn validate_key_segment(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ConfigError::InvalidName {
            field,
            reason: "must not be empty".into(),
        });
    }
    if v.contains('/') || v.contains('\\') {
        return Err(ConfigError::InvalidName {
            field,
            reason: "must not contain path separators".into(),
        });
    }
    if v.starts_with('.') {
        // Dot-prefixed keys are store metadata, never user data.
        return Err(ConfigError::InvalidName {
            field,
            reason: "must not start with a dot".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

/// Default multipart threshold and part size: 10 MiB.
pub const DEFAULT_CHUNK_BYTES: usize = 10 * 1024 * 1024;

/// Default number of scratch-bucket prefixes kept by retention.
pub const DEFAULT_SCRATCH_KEEP: usize = 7;

/// Default worker-pool concurrency.
pub const DEFAULT_WORKERS: usize = 4;

/// Default delay before the single job retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Process-wide settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct YardConfig {
    /// API listen port (`YARD_PORT`).
    pub port: u16,
    /// Object-store base URL (`YARD_STORE_ENDPOINT`).
    pub store_endpoint: String,
    /// Bearer token for the store, if any (`YARD_STORE_TOKEN`).
    pub store_token: Option<String>,
    /// Named dataset bucket (`YARD_DATASET_BUCKET`).
    pub dataset_bucket: String,
    /// Named script bucket (`YARD_SCRIPT_BUCKET`).
    pub script_bucket: String,
    /// Scratch bucket under retention (`YARD_SCRATCH_BUCKET`).
    pub scratch_bucket: String,
    /// Retained prefix count in the scratch bucket (`YARD_SCRATCH_KEEP`).
    pub scratch_keep: usize,
    /// Multipart threshold and part size in bytes (`YARD_CHUNK_BYTES`).
    pub chunk_bytes: usize,
    /// Worker-pool concurrency (`YARD_WORKERS`).
    pub workers: usize,
    /// Delay before the single job retry (`YARD_RETRY_DELAY_SECS`).
    pub retry_delay: Duration,
    /// Experiment-tracking base URL; empty disables tracking
    /// (`YARD_TRACKING_URL`).
    pub tracking_url: Option<String>,
    /// Root for per-run working directories (`YARD_WORK_DIR`).
    pub work_dir: PathBuf,
}

impl Default for YardConfig {
    fn default() -> Self {
        Self {
            port: 8184,
            store_endpoint: "http://127.0.0.1:9000".into(),
            store_token: None,
            dataset_bucket: "open-datasets".into(),
            script_bucket: "training-scripts".into(),
            scratch_bucket: "scratch-datasets".into(),
            scratch_keep: DEFAULT_SCRATCH_KEEP,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            workers: DEFAULT_WORKERS,
            retry_delay: DEFAULT_RETRY_DELAY,
            tracking_url: None,
            work_dir: std::env::temp_dir().join("trainyard"),
        }
    }
}

impl YardConfig {
    /// Build the configuration from environment variables, falling back to
    /// the defaults above for anything unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidVar`] when a set variable does not
    /// parse (non-numeric port, zero worker count, and so on).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            port: parse_var("YARD_PORT", defaults.port)?,
            store_endpoint: string_var("YARD_STORE_ENDPOINT")
                .unwrap_or(defaults.store_endpoint),
            store_token: string_var("YARD_STORE_TOKEN"),
            dataset_bucket: string_var("YARD_DATASET_BUCKET").unwrap_or(defaults.dataset_bucket),
            script_bucket: string_var("YARD_SCRIPT_BUCKET").unwrap_or(defaults.script_bucket),
            scratch_bucket: string_var("YARD_SCRATCH_BUCKET").unwrap_or(defaults.scratch_bucket),
            scratch_keep: parse_nonzero_var("YARD_SCRATCH_KEEP", defaults.scratch_keep)?,
            chunk_bytes: parse_nonzero_var("YARD_CHUNK_BYTES", defaults.chunk_bytes)?,
            workers: parse_nonzero_var("YARD_WORKERS", defaults.workers)?,
            retry_delay: Duration::from_secs(parse_var(
                "YARD_RETRY_DELAY_SECS",
                defaults.retry_delay.as_secs(),
            )?),
            tracking_url: string_var("YARD_TRACKING_URL"),
            work_dir: string_var("YARD_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        })
    }
}

/// Read a string variable; unset or empty counts as absent.
fn string_var(name: &'static str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Read and parse a variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Like [`parse_var`] but additionally rejects zero.
fn parse_nonzero_var(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let value: usize = parse_var(name, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidVar {
            name,
            value: "0".into(),
        });
    }
    Ok(value)
}
