// Transcript API configuration
//
// This module contains configuration structures and constants for the Transcript API.
// Every value can be overridden through a TRANSCRIPT_API_* environment variable, which
// config_loader may populate from the optional TOML configuration file.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use thiserror::Error;

use crate::validation::{Language, Model};

/// Default values for configuration
pub mod defaults {
    // Server binding
    pub const HOST: &str = "127.0.0.1";
    pub const PORT: u16 = 3000;

    // HTTP client disconnect timeout and keep-alive in seconds
    pub const CLIENT_TIMEOUT_SECONDS: u64 = 480;
    pub const KEEPALIVE_SECONDS: u64 = 480;

    // Number of HTTP workers (0 = one per CPU core)
    pub const WORKERS: usize = 0;

    // Directory name created under the system temp dir for job workspaces
    pub const TEMP_DIR_NAME: &str = "transcript_api";

    // External collaborators
    pub const EXTRACTOR_CMD: &str = "yt-dlp";
    pub const TRANSCRIBER_CMD: &str = "python3";
    pub const TRANSCRIBER_SCRIPT: &str = "transcribe.py";

    // Maximum size of the extracted audio (100 MiB)
    pub const MAX_AUDIO_BYTES: u64 = 100 * 1024 * 1024;

    // Result cache
    pub const CACHE_TTL_SECONDS: u64 = 24 * 60 * 60;
    pub const CACHE_MAX_ENTRIES: usize = 100;
    pub const CACHE_SWEEP_INTERVAL_SECONDS: u64 = 600;

    // Admission control
    pub const MAX_CONCURRENT_JOBS: usize = 3;

    // Accepted source hosts
    pub const ALLOWED_HOSTS: [&str; 4] = [
        "www.youtube.com",
        "youtube.com",
        "youtu.be",
        "m.youtube.com",
    ];

    // Metrics backend ("prometheus", "none", "disabled")
    pub const METRICS_BACKEND: &str = "none";
}

/// Environment variable names
pub mod keys {
    pub const CONFIG_FILE: &str = "TRANSCRIPT_API_CONFIG";
    pub const HOST: &str = "TRANSCRIPT_API_HOST";
    pub const PORT: &str = "TRANSCRIPT_API_PORT";
    pub const CLIENT_TIMEOUT: &str = "TRANSCRIPT_API_TIMEOUT";
    pub const KEEPALIVE: &str = "TRANSCRIPT_API_KEEPALIVE";
    pub const WORKERS: &str = "TRANSCRIPT_API_WORKERS";
    pub const TEMP_DIR: &str = "TRANSCRIPT_API_TMP_DIR";
    pub const EXTRACTOR_CMD: &str = "TRANSCRIPT_API_EXTRACTOR_CMD";
    pub const TRANSCRIBER_CMD: &str = "TRANSCRIPT_API_TRANSCRIBER_CMD";
    pub const TRANSCRIBER_SCRIPT: &str = "TRANSCRIPT_API_TRANSCRIBER_SCRIPT";
    pub const MAX_AUDIO_BYTES: &str = "TRANSCRIPT_API_MAX_AUDIO_BYTES";
    pub const CACHE_TTL: &str = "TRANSCRIPT_API_CACHE_TTL_SECONDS";
    pub const CACHE_MAX_ENTRIES: &str = "TRANSCRIPT_API_CACHE_MAX_ENTRIES";
    pub const CACHE_SWEEP_INTERVAL: &str = "TRANSCRIPT_API_CACHE_SWEEP_SECONDS";
    pub const MAX_CONCURRENT_JOBS: &str = "TRANSCRIPT_API_MAX_CONCURRENT_JOBS";
    pub const ALLOWED_HOSTS: &str = "TRANSCRIPT_API_ALLOWED_HOSTS";
    pub const MODELS: &str = "TRANSCRIPT_API_MODELS";
    pub const LANGUAGES: &str = "TRANSCRIPT_API_LANGUAGES";
    pub const METRICS_BACKEND: &str = "TRANSCRIPT_API_METRICS_BACKEND";
}

/// Error raised when the configuration cannot be used to start the server
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid<R: Into<String>>(key: &'static str, reason: R) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Read and parse an environment variable, falling back to `default` when it is
/// missing or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable value for {}: {:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a comma separated list from the environment
fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
}

/// HTTP server settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Client disconnect timeout
    pub client_timeout: Duration,
    pub keep_alive: Duration,
    /// Worker count, 0 means one per CPU core
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env::var(keys::HOST).unwrap_or_else(|_| String::from(defaults::HOST)),
            port: env_or(keys::PORT, defaults::PORT),
            client_timeout: Duration::from_secs(env_or(
                keys::CLIENT_TIMEOUT,
                defaults::CLIENT_TIMEOUT_SECONDS,
            )),
            keep_alive: Duration::from_secs(env_or(keys::KEEPALIVE, defaults::KEEPALIVE_SECONDS)),
            workers: env_or(keys::WORKERS, defaults::WORKERS),
        }
    }
}

impl ServerConfig {
    /// Effective number of HTTP workers
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the extraction and transcription stages
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Root under which per-job workspaces are created
    pub temp_dir: PathBuf,
    /// Audio extraction executable
    pub extractor_cmd: String,
    /// Interpreter running the transcription script
    pub transcriber_cmd: String,
    /// Transcription script path
    pub transcriber_script: PathBuf,
    /// Ceiling on the extracted audio size
    pub max_audio_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: env::var(keys::TEMP_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join(defaults::TEMP_DIR_NAME)),
            extractor_cmd: env::var(keys::EXTRACTOR_CMD)
                .unwrap_or_else(|_| String::from(defaults::EXTRACTOR_CMD)),
            transcriber_cmd: env::var(keys::TRANSCRIBER_CMD)
                .unwrap_or_else(|_| String::from(defaults::TRANSCRIBER_CMD)),
            transcriber_script: env::var(keys::TRANSCRIBER_SCRIPT)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(defaults::TRANSCRIBER_SCRIPT)),
            max_audio_bytes: env_or(keys::MAX_AUDIO_BYTES, defaults::MAX_AUDIO_BYTES),
        }
    }
}

impl PipelineConfig {
    /// Ensures the workspace root exists
    pub fn ensure_temp_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.temp_dir)
    }
}

/// Result cache bounds
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Interval of the background expiry sweep, `None` disables it
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let sweep = env_or(keys::CACHE_SWEEP_INTERVAL, defaults::CACHE_SWEEP_INTERVAL_SECONDS);
        Self {
            ttl: Duration::from_secs(env_or(keys::CACHE_TTL, defaults::CACHE_TTL_SECONDS)),
            max_entries: env_or(keys::CACHE_MAX_ENTRIES, defaults::CACHE_MAX_ENTRIES),
            sweep_interval: (sweep > 0).then(|| Duration::from_secs(sweep)),
        }
    }
}

/// Admission control settings
#[derive(Clone, Debug)]
pub struct AdmissionConfig {
    pub max_concurrent_jobs: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: env_or(keys::MAX_CONCURRENT_JOBS, defaults::MAX_CONCURRENT_JOBS),
        }
    }
}

/// Input allow-lists applied to every request
#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub allowed_hosts: Vec<String>,
    pub models: Vec<Model>,
    pub languages: Vec<Language>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let allowed_hosts = env_list(keys::ALLOWED_HOSTS).unwrap_or_else(|| {
            defaults::ALLOWED_HOSTS
                .iter()
                .map(|host| host.to_string())
                .collect()
        });

        let models = match env_list(keys::MODELS) {
            Some(names) => parse_enum_list(keys::MODELS, &names),
            None => Model::ALL.to_vec(),
        };

        let languages = match env_list(keys::LANGUAGES) {
            Some(codes) => parse_enum_list(keys::LANGUAGES, &codes),
            None => Language::ALL.to_vec(),
        };

        Self {
            allowed_hosts,
            models,
            languages,
        }
    }
}

fn parse_enum_list<T: FromStr>(key: &str, items: &[String]) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match item.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Skipping unknown entry {:?} in {}", item, key);
                None
            }
        })
        .collect()
}

/// Configuration for metrics collection and export
#[derive(Clone, Debug)]
pub struct MetricsConfig {
    /// Type of metrics exporter ("prometheus", "none", "disabled")
    pub exporter_type: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            exporter_type: env::var(keys::METRICS_BACKEND)
                .unwrap_or_else(|_| String::from(defaults::METRICS_BACKEND)),
        }
    }
}

/// Complete application configuration
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub admission: AdmissionConfig,
    pub validation: ValidationConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load every section from the environment
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid(keys::PORT, "port cannot be 0"));
        }
        if self.admission.max_concurrent_jobs == 0 {
            return Err(ConfigError::invalid(
                keys::MAX_CONCURRENT_JOBS,
                "at least one concurrent job is required",
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid(
                keys::CACHE_MAX_ENTRIES,
                "cache must hold at least one entry",
            ));
        }
        if self.cache.ttl.is_zero() {
            return Err(ConfigError::invalid(keys::CACHE_TTL, "TTL must be positive"));
        }
        if self.pipeline.max_audio_bytes == 0 {
            return Err(ConfigError::invalid(
                keys::MAX_AUDIO_BYTES,
                "audio size limit must be positive",
            ));
        }
        if self.validation.allowed_hosts.is_empty() {
            return Err(ConfigError::invalid(keys::ALLOWED_HOSTS, "no host is allowed"));
        }
        if self.validation.models.is_empty() {
            return Err(ConfigError::invalid(keys::MODELS, "no model is allowed"));
        }
        if self.validation.languages.is_empty() {
            return Err(ConfigError::invalid(keys::LANGUAGES, "no language is allowed"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig {
            server: ServerConfig {
                host: defaults::HOST.to_string(),
                port: defaults::PORT,
                client_timeout: Duration::from_secs(defaults::CLIENT_TIMEOUT_SECONDS),
                keep_alive: Duration::from_secs(defaults::KEEPALIVE_SECONDS),
                workers: 0,
            },
            pipeline: PipelineConfig {
                temp_dir: env::temp_dir().join(defaults::TEMP_DIR_NAME),
                extractor_cmd: defaults::EXTRACTOR_CMD.to_string(),
                transcriber_cmd: defaults::TRANSCRIBER_CMD.to_string(),
                transcriber_script: PathBuf::from(defaults::TRANSCRIBER_SCRIPT),
                max_audio_bytes: defaults::MAX_AUDIO_BYTES,
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(defaults::CACHE_TTL_SECONDS),
                max_entries: defaults::CACHE_MAX_ENTRIES,
                sweep_interval: None,
            },
            admission: AdmissionConfig {
                max_concurrent_jobs: defaults::MAX_CONCURRENT_JOBS,
            },
            validation: ValidationConfig {
                allowed_hosts: vec!["youtu.be".to_string()],
                models: Model::ALL.to_vec(),
                languages: Language::ALL.to_vec(),
            },
            metrics: MetricsConfig {
                exporter_type: "none".to_string(),
            },
        };

        assert!(config.validate().is_ok());
        assert!(config.server.worker_count() >= 1);
        assert_eq!(config.server.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = AppConfig::default();
        config.server.port = 3000;
        config.admission.max_concurrent_jobs = 0;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { key: keys::MAX_CONCURRENT_JOBS, .. }
        ));
    }

    #[test]
    fn test_parse_enum_list_skips_unknown() {
        let items = vec!["tiny".to_string(), "huge".to_string(), "small".to_string()];
        let models: Vec<Model> = parse_enum_list(keys::MODELS, &items);
        assert_eq!(models, vec![Model::Tiny, Model::Small]);
    }
}
