//! Pipeline configuration from environment variables

use std::env;
use std::path::PathBuf;

/// Configuration for the ingestion runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Path to SQLite database file
    pub db_path: PathBuf,

    /// Directory where submitted capture files are stored before ingestion
    pub upload_dir: PathBuf,

    /// Ingestion jobs allowed to run at once (others wait as pending)
    pub max_concurrent_jobs: usize,

    /// pcap reader buffer size in bytes
    pub decoder_buffer_bytes: usize,

    /// Log ingestion throughput every N frames
    pub progress_log_every: u64,

    /// Finished jobs kept in the registry
    pub job_history_limit: usize,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { var, value } => {
                write!(f, "Invalid value for {}: '{}'", var, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("pcap_timeline.db"),
            upload_dir: PathBuf::from("uploads"),
            max_concurrent_jobs: 2,
            decoder_buffer_bytes: 65_536,
            progress_log_every: 10_000,
            job_history_limit: 32,
        }
    }
}

impl PipelineConfig {
    /// Load configuration, rejecting malformed numeric values
    ///
    /// Environment variables:
    /// - `PCAP_TIMELINE_DB_PATH` (default: pcap_timeline.db)
    /// - `UPLOAD_DIR` (default: uploads)
    /// - `MAX_CONCURRENT_JOBS` (default: 2, minimum 1)
    /// - `DECODER_BUFFER_BYTES` (default: 65536)
    /// - `PROGRESS_LOG_EVERY` (default: 10000)
    /// - `JOB_HISTORY_LIMIT` (default: 32)
    pub fn try_from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            db_path: env::var("PCAP_TIMELINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),

            max_concurrent_jobs: parse_var("MAX_CONCURRENT_JOBS")?
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),

            decoder_buffer_bytes: parse_var("DECODER_BUFFER_BYTES")?
                .unwrap_or(defaults.decoder_buffer_bytes),

            progress_log_every: parse_var("PROGRESS_LOG_EVERY")?
                .unwrap_or(defaults.progress_log_every)
                .max(1),

            job_history_limit: parse_var("JOB_HISTORY_LIMIT")?
                .unwrap_or(defaults.job_history_limit),
        })
    }

    /// Load configuration, falling back to defaults for malformed values
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_else(|e| {
            log::warn!("⚠️  {}; using default configuration", e);
            Self::default()
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 6] = [
        "PCAP_TIMELINE_DB_PATH",
        "UPLOAD_DIR",
        "MAX_CONCURRENT_JOBS",
        "DECODER_BUFFER_BYTES",
        "PROGRESS_LOG_EVERY",
        "JOB_HISTORY_LIMIT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = PipelineConfig::try_from_env().unwrap();

        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.db_path, PathBuf::from("pcap_timeline.db"));
        assert_eq!(config.max_concurrent_jobs, 2);
    }

    #[test]
    fn test_custom_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("PCAP_TIMELINE_DB_PATH", "/tmp/test.db");
        env::set_var("UPLOAD_DIR", "/tmp/uploads");
        env::set_var("MAX_CONCURRENT_JOBS", "4");
        env::set_var("PROGRESS_LOG_EVERY", "500");

        let config = PipelineConfig::try_from_env().unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/test.db"));
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.progress_log_every, 500);
        assert_eq!(config.decoder_buffer_bytes, 65_536);

        clear_env();
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MAX_CONCURRENT_JOBS", "many");

        let err = PipelineConfig::try_from_env().unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_JOBS"));

        // Lenient loader falls back to defaults
        assert_eq!(PipelineConfig::from_env(), PipelineConfig::default());

        clear_env();
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MAX_CONCURRENT_JOBS", "0");

        assert_eq!(PipelineConfig::try_from_env().unwrap().max_concurrent_jobs, 1);

        clear_env();
    }
}
