use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::reminder::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Server settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    pub reminder_api_key: Option<String>,
    pub reminder_base_url: String,
    pub reminder_model: String,
    pub reminder_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unparseable numbers fall back to defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |name: &str| var(name).and_then(|s| s.trim().parse().ok());
        Self {
            port: parsed("GEARLOAN_PORT").unwrap_or(5433),
            bind: var("GEARLOAN_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(var("GEARLOAN_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: var("GEARLOAN_PASSWORD").unwrap_or_else(|| "gearloan".into()),
            max_connections: parse_or(&var, "GEARLOAN_MAX_CONNECTIONS", 256),
            compact_threshold: parse_or(&var, "GEARLOAN_COMPACT_THRESHOLD", 1000),
            tls_cert: var("GEARLOAN_TLS_CERT"),
            tls_key: var("GEARLOAN_TLS_KEY"),
            metrics_port: parsed("GEARLOAN_METRICS_PORT"),
            reminder_api_key: var("GEARLOAN_REMINDER_API_KEY").or_else(|| var("API_KEY")),
            reminder_base_url: var("GEARLOAN_REMINDER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            reminder_model: var("GEARLOAN_REMINDER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            reminder_timeout: Duration::from_secs(parse_or(&var, "GEARLOAN_REMINDER_TIMEOUT_SECS", 30)),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    var(name).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
