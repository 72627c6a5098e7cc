//! Configuration management for Nika Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ocr::OcrProvider;

/// Default upload limit: 2 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub ocr: OcrConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// Drop all tables when the server shuts down (development only)
    pub drop_on_shutdown: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded images
    pub root: PathBuf,
    pub max_upload_bytes: usize,
    /// Remove blobs without a document row at startup
    pub sweep_on_start: bool,
    /// Blobs younger than this are never swept
    pub orphan_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Providers tried in order
    pub providers: Vec<OcrProvider>,
    /// Tesseract language code, e.g. "rus" or "eng"
    pub language: String,
    pub tesseract_bin: String,
    pub ollama_url: String,
    pub ollama_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// A `running` job whose worker has not reported back within this
    /// window is claimable again
    pub lease_ms: u64,
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "sqlite:./nika.db".to_string(),
                max_connections: 5,
                drop_on_shutdown: false,
            },
            storage: StorageConfig {
                root: PathBuf::from("documents"),
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                sweep_on_start: true,
                orphan_grace_secs: 3600,
            },
            ocr: OcrConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            providers: vec![OcrProvider::Tesseract],
            language: "rus".to_string(),
            tesseract_bin: "tesseract".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llava".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            poll_interval_ms: 1_000,
            lease_ms: 600_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_var(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
                drop_on_shutdown: parse_var(
                    "DATABASE_DROP_ON_SHUTDOWN",
                    defaults.database.drop_on_shutdown,
                )?,
            },
            storage: StorageConfig {
                root: env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.root),
                max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.storage.max_upload_bytes)?,
                sweep_on_start: parse_var("STORAGE_SWEEP_ON_START", defaults.storage.sweep_on_start)?,
                orphan_grace_secs: parse_var(
                    "STORAGE_ORPHAN_GRACE_SECS",
                    defaults.storage.orphan_grace_secs,
                )?,
            },
            ocr: OcrConfig {
                providers: match env::var("OCR_PROVIDERS") {
                    Ok(raw) => parse_providers(&raw)?,
                    Err(_) => defaults.ocr.providers,
                },
                language: env::var("OCR_LANGUAGE").unwrap_or(defaults.ocr.language),
                tesseract_bin: env::var("TESSERACT_BIN").unwrap_or(defaults.ocr.tesseract_bin),
                ollama_url: env::var("OLLAMA_URL").unwrap_or(defaults.ocr.ollama_url),
                ollama_model: env::var("OLLAMA_MODEL").unwrap_or(defaults.ocr.ollama_model),
            },
            worker: WorkerConfig {
                concurrency: parse_var("WORKER_CONCURRENCY", defaults.worker.concurrency)?,
                max_attempts: parse_var("WORKER_MAX_ATTEMPTS", defaults.worker.max_attempts)?,
                base_delay_ms: parse_var("WORKER_BASE_DELAY_MS", defaults.worker.base_delay_ms)?,
                max_delay_ms: parse_var("WORKER_MAX_DELAY_MS", defaults.worker.max_delay_ms)?,
                poll_interval_ms: parse_var(
                    "WORKER_POLL_INTERVAL_MS",
                    defaults.worker.poll_interval_ms,
                )?,
                lease_ms: parse_var("WORKER_LEASE_MS", defaults.worker.lease_ms)?,
            },
        })
    }
}

/// Read an environment variable, falling back to `default` when unset
fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => parse_value(key, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

/// Parse a comma-separated provider list such as "tesseract,ollama"
fn parse_providers(raw: &str) -> Result<Vec<OcrProvider>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| match name.to_ascii_lowercase().as_str() {
            "tesseract" => Ok(OcrProvider::Tesseract),
            "ollama" => Ok(OcrProvider::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "OCR_PROVIDERS",
                value: raw.to_string(),
            }),
        })
        .collect()
}
