//! Probe module for upstream status endpoints.
//!
//! `StatusFetcher` is the seam between the poller and the network; the HTTP
//! implementation lives in `http`.

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod usage;

pub use http::*;
pub use usage::*;

use crate::store::{MachineStatus, StatusSample, Target};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

/// Status reported when upstream omits the field.
pub const UNKNOWN_STATUS: &str = "Unknown";

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(String),
}

/// A parsed upstream status response, not yet stamped with a capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub cpu: f64,
    pub memory: f64,
    pub status: String,
    pub server: Option<String>,
    pub reported_at: Option<String>,
    pub extra: Map<String, Value>,
}

impl StatusReport {
    /// Select the known fields out of a JSON response body.
    ///
    /// `cpuUsage` and `memoryUsage` must be present; their values degrade to
    /// zero when unparsable. Unrecognised fields are kept in `extra`.
    pub fn from_json(body: Value) -> Result<Self, ProbeError> {
        let mut fields = match body {
            Value::Object(map) => map,
            other => {
                return Err(ProbeError::Decode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let cpu = fields
            .remove("cpuUsage")
            .ok_or_else(|| ProbeError::Decode("missing cpuUsage".to_string()))?;
        let memory = fields
            .remove("memoryUsage")
            .ok_or_else(|| ProbeError::Decode("missing memoryUsage".to_string()))?;

        let status = fields
            .remove("status")
            .and_then(text_value)
            .unwrap_or_else(|| UNKNOWN_STATUS.to_string());

        let server = fields.remove("server").and_then(text_value);
        let machine = fields.remove("machine").and_then(text_value);
        let reported_at = fields.remove("timestamp").and_then(text_value);

        Ok(Self {
            cpu: usage_value(&cpu),
            memory: usage_value(&memory),
            status,
            server: server.or(machine),
            reported_at,
            extra: fields,
        })
    }

    pub fn into_sample(self, timestamp: DateTime<Utc>) -> StatusSample {
        StatusSample {
            timestamp,
            cpu: self.cpu,
            memory: self.memory,
            status: self.status,
            server: self.server,
            reported_at: self.reported_at,
            extra: self.extra,
        }
    }
}

fn text_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Source of status data for the poller.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    /// Request the current status of a single target.
    async fn fetch_status(&self, target: &Target) -> Result<StatusReport, ProbeError>;

    /// Request the full machine list from a bulk status endpoint.
    async fn fetch_fleet(&self, endpoint: &str) -> Result<Vec<MachineStatus>, ProbeError>;
}
