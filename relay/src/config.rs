//! Environment-driven configuration, `WH_`-prefixed.
//!
//! Mirrors the reference relay's inline `std::env::var` reads in `main`, but
//! centralized so every default and validation rule lives in one place and a
//! malformed environment fails fast at startup with a descriptive error
//! instead of silently falling back somewhere deep in a handler.

use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BASE_DOMAIN: &str = "localhost";
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_LOG: &str = "info";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_domain: String,
    /// Ping cadence. The liveness deadline (`2x` this) is derived where used.
    pub websocket_heartbeat: Duration,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log: String,
}

impl Config {
    /// Assemble configuration from the process environment.
    ///
    /// `RUST_LOG`, if set, takes precedence over `WH_LOG` for the log
    /// directive, matching the usual Rust ecosystem convention.
    pub fn from_env() -> Result<Self> {
        let port = env_or("WH_PORT", DEFAULT_PORT.to_string())
            .parse::<u16>()
            .context("WH_PORT must be a valid port number")?;

        let heartbeat_secs = env_or("WH_WEBSOCKET_HEARTBEAT", DEFAULT_HEARTBEAT_SECS.to_string())
            .parse::<u64>()
            .context("WH_WEBSOCKET_HEARTBEAT must be an integer number of seconds")?;

        let request_timeout_secs = env_or(
            "WH_REQUEST_TIMEOUT",
            DEFAULT_REQUEST_TIMEOUT_SECS.to_string(),
        )
        .parse::<f64>()
        .context("WH_REQUEST_TIMEOUT must be a number of seconds")?;
        if !request_timeout_secs.is_finite() || request_timeout_secs <= 0.0 {
            anyhow::bail!("WH_REQUEST_TIMEOUT must be a positive, finite number of seconds");
        }

        let max_body_bytes = env_or("WH_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES.to_string())
            .parse::<usize>()
            .context("WH_MAX_BODY_BYTES must be a non-negative integer")?;

        let log = std::env::var("RUST_LOG")
            .or_else(|_| std::env::var("WH_LOG"))
            .unwrap_or_else(|_| DEFAULT_LOG.to_string());

        Ok(Config {
            host: env_or("WH_HOST", DEFAULT_HOST.to_string()),
            port,
            base_domain: env_or("WH_BASE_DOMAIN", DEFAULT_BASE_DOMAIN.to_string()).to_lowercase(),
            websocket_heartbeat: Duration::from_secs(heartbeat_secs),
            request_timeout: Duration::from_secs_f64(request_timeout_secs),
            max_body_bytes,
            log,
        })
    }

    pub fn bind_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("WH_HOST/WH_PORT do not form a valid socket address")
    }

    /// The liveness deadline: no frame within this window tears the tunnel down.
    pub fn heartbeat_deadline(&self) -> Duration {
        self.websocket_heartbeat * 2
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}
