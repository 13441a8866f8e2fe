use std::time::Duration;

use clap::Parser;

/// PDP connection configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "pepr")]
#[command(about = "Policy enforcement point runtime")]
pub struct PdpConfig {
    /// Base URL of the PDP decision API
    #[arg(long, default_value = "http://localhost:8443/api/pdp", env = "PEPR_PDP_URL")]
    pub base_url: String,

    /// Bearer token for the Authorization header
    #[arg(long, env = "PEPR_PDP_TOKEN")]
    pub bearer_token: Option<String>,

    /// Basic auth username (used only when no bearer token is set)
    #[arg(long, env = "PEPR_PDP_USERNAME")]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(long, env = "PEPR_PDP_PASSWORD")]
    pub password: Option<String>,

    /// Request timeout for single decisions in milliseconds
    #[arg(long, default_value = "5000", env = "PEPR_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Initial reconnect backoff in milliseconds
    #[arg(long, default_value = "500", env = "PEPR_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    /// Reconnect backoff ceiling in milliseconds
    #[arg(long, default_value = "30000", env = "PEPR_BACKOFF_MAX_MS")]
    pub backoff_max_ms: u64,

    /// Maximum reconnect attempts per decision stream (unbounded if unset)
    #[arg(long, env = "PEPR_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Reconnect attempt count past which logging escalates to warn
    #[arg(long, default_value = "5", env = "PEPR_RETRY_WARN_THRESHOLD")]
    pub retry_warn_threshold: u32,

    /// Byte ceiling for one buffered decision frame
    #[arg(long, default_value = "262144", env = "PEPR_MAX_FRAME_BYTES")]
    pub max_frame_bytes: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl PdpConfig {
    /// Get the single-decision request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Get the initial reconnect backoff as Duration.
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Get the reconnect backoff ceiling as Duration.
    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for PdpConfig {
    fn default() -> Self {
        PdpConfig {
            base_url: "http://localhost:8443/api/pdp".to_string(),
            bearer_token: None,
            username: None,
            password: None,
            request_timeout_ms: 5000,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_retries: None,
            retry_warn_threshold: 5,
            max_frame_bytes: 262_144,
            log_level: "info".to_string(),
        }
    }
}
