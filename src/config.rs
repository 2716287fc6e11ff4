//! Configuration module for serverwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// A target declared in the environment, registered at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedTarget {
    pub name: String,
    pub endpoint: String,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Period between scheduled polling rounds (default: 5s)
    pub poll_interval: Duration,
    /// Per-request timeout (default: same as the poll interval)
    pub request_timeout: Duration,
    /// Targets registered at startup
    pub seed_targets: Vec<SeedTarget>,
    /// Bulk status endpoint; enables the fleet monitor when set
    pub bulk_endpoint: Option<String>,
    /// Start with the scheduler idle
    pub start_paused: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_POLL_INTERVAL,
            seed_targets: Vec::new(),
            bulk_endpoint: None,
            start_paused: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SERVERWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SERVERWATCH_POLL_INTERVAL_MS`: polling period (default: 5000)
    /// - `SERVERWATCH_REQUEST_TIMEOUT_MS`: request timeout (default: poll interval)
    /// - `SERVERWATCH_TARGETS`: `name=endpoint` pairs separated by commas
    /// - `SERVERWATCH_BULK_ENDPOINT`: bulk status endpoint (default: unset)
    /// - `SERVERWATCH_START_PAUSED`: `true`/`1` to start idle (default: false)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("SERVERWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(interval) = lookup("SERVERWATCH_POLL_INTERVAL_MS").and_then(|s| parse_millis(&s)) {
            cfg.poll_interval = interval;
        }

        cfg.request_timeout = lookup("SERVERWATCH_REQUEST_TIMEOUT_MS")
            .and_then(|s| parse_millis(&s))
            .unwrap_or(cfg.poll_interval);

        if let Some(raw) = lookup("SERVERWATCH_TARGETS") {
            cfg.seed_targets = parse_seed_targets(&raw);
        }

        cfg.bulk_endpoint = lookup("SERVERWATCH_BULK_ENDPOINT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(flag) = lookup("SERVERWATCH_START_PAUSED") {
            cfg.start_paused = matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        cfg
    }
}

fn parse_millis(s: &str) -> Option<Duration> {
    match s.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}

/// Parse `name=endpoint,name2=endpoint2`. Malformed entries are skipped.
fn parse_seed_targets(raw: &str) -> Vec<SeedTarget> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, endpoint)) if !name.trim().is_empty() && !endpoint.trim().is_empty() => {
                Some(SeedTarget {
                    name: name.trim().to_string(),
                    endpoint: endpoint.trim().to_string(),
                })
            }
            _ => {
                tracing::warn!("Ignoring malformed seed target {:?}", entry);
                None
            }
        })
        .collect()
}
