//! Configuration for the queue controller.

use anyhow::Result;

/// Well-known in-cluster credential paths.
const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const DEFAULT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Queue controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform API server base URL.
    pub api_url: String,

    /// Namespace name glob(s), comma-separated.
    pub namespace_pattern: String,

    /// Seconds between reconciliation sweeps.
    pub sweep_interval_secs: u64,

    /// Concurrency ceiling used until the limit object is first read.
    pub default_limit: u32,

    /// Bearer token file (ignored when absent).
    pub token_path: String,

    /// CA bundle file (ignored when absent).
    pub ca_path: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("GANTRY_API_URL")
            .unwrap_or_else(|_| "https://kubernetes.default.svc".to_string());

        let namespace_pattern =
            std::env::var("GANTRY_NAMESPACE_PATTERN").unwrap_or_else(|_| "*-cicd".to_string());

        let sweep_interval_secs = std::env::var("GANTRY_SWEEP_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let default_limit = std::env::var("GANTRY_DEFAULT_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let token_path = std::env::var("GANTRY_TOKEN_PATH")
            .unwrap_or_else(|_| DEFAULT_TOKEN_PATH.to_string());

        let ca_path =
            std::env::var("GANTRY_CA_PATH").unwrap_or_else(|_| DEFAULT_CA_PATH.to_string());

        let log_level = std::env::var("GANTRY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            api_url,
            namespace_pattern,
            sweep_interval_secs,
            default_limit,
            token_path,
            ca_path,
            log_level,
        })
    }
}
