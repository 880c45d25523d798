// src/config.rs

use derive_builder::Builder;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do when a single line fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// One invalid line fails its batch and the whole run.
    #[default]
    Abort,
    /// Invalid lines are logged and dropped; the rest of the batch proceeds.
    Skip,
}

#[derive(Debug, Clone, Builder)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct Config {
    /// File to read newline-delimited user lines from
    #[builder(default = "PathBuf::from(\"users.txt\")")]
    pub(crate) input_path: PathBuf,

    /// File the JSON lines are appended to
    #[builder(default = "PathBuf::from(\"processed_users.txt\")")]
    pub(crate) output_path: PathBuf,

    /// Maximum number of lines per batch
    #[builder(default = "100_000")]
    pub(crate) batch_size: usize,

    /// Size of the write slot pool
    #[builder(default = "5")]
    pub(crate) max_concurrent_writers: usize,

    /// Latency of the simulated enrichment call made for every line
    #[builder(default = "Duration::from_millis(200)")]
    pub(crate) transform_latency: Duration,

    #[builder(default)]
    pub(crate) error_policy: ErrorPolicy,

    /// Count input lines before the run so progress has a known total
    #[builder(default = "false")]
    pub(crate) count_total: bool,
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.batch_size == Some(0) {
            return Err("batch_size must be greater than zero".to_string());
        }
        if self.max_concurrent_writers == Some(0) {
            return Err("max_concurrent_writers must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input_path: PathBuf::from("users.txt"),
            output_path: PathBuf::from("processed_users.txt"),
            batch_size: 100_000,
            max_concurrent_writers: 5,
            transform_latency: Duration::from_millis(200),
            error_policy: ErrorPolicy::Abort,
            count_total: false,
        }
    }
}

impl Config {
    #[inline]
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    #[inline]
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Returns the number of lines read per batch
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns the number of writes allowed in flight at once
    #[inline]
    pub fn max_concurrent_writers(&self) -> usize {
        self.max_concurrent_writers
    }

    #[inline]
    pub fn transform_latency(&self) -> Duration {
        self.transform_latency
    }

    #[inline]
    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    #[inline]
    pub fn count_total(&self) -> bool {
        self.count_total
    }
}
