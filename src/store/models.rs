//! Store model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Maximum number of samples kept per target: the ten previous observations
/// plus the newest one.
pub const HISTORY_LIMIT: usize = 11;

/// A monitored server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    pub name: String,
    pub endpoint: String,
}

/// One successful polling result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSample {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    pub status: String,
    /// Server or machine identifier echoed by upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Upstream's own timestamp, passed through as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<String>,
    /// Any other upstream fields
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Bounded, oldest-first sample window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct History {
    samples: VecDeque<StatusSample>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, evicting from the front once over `HISTORY_LIMIT`.
    pub fn push(&mut self, sample: StatusSample) {
        self.samples.push_back(sample);
        while self.samples.len() > HISTORY_LIMIT {
            self.samples.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&StatusSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusSample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<StatusSample> {
        self.iter().cloned().collect()
    }
}

/// Read-only view of one target, as handed to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSnapshot {
    pub target: Target,
    pub latest: Option<StatusSample>,
    /// Oldest to newest
    pub history: Vec<StatusSample>,
    pub in_flight: bool,
}

/// One entry from a bulk status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
