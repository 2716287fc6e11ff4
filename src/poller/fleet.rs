//! Fleet monitor for bulk status endpoints.
//!
//! A bulk endpoint returns the whole machine list at once. There is no
//! history in this mode: each successful refresh replaces the list.

use super::PollEvent;
use crate::probe::{ProbeError, StatusFetcher};
use crate::store::MachineStatus;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

/// Latest machine list as seen by the fleet monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetSnapshot {
    pub endpoint: String,
    pub machines: Vec<MachineStatus>,
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct FleetMonitor {
    fetcher: Arc<dyn StatusFetcher>,
    events: broadcast::Sender<PollEvent>,
    request_timeout: Duration,
    latest: Mutex<FleetSnapshot>,
}

impl FleetMonitor {
    pub fn new(
        endpoint: &str,
        fetcher: Arc<dyn StatusFetcher>,
        events: broadcast::Sender<PollEvent>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            events,
            request_timeout,
            latest: Mutex::new(FleetSnapshot {
                endpoint: endpoint.trim().to_string(),
                ..Default::default()
            }),
        }
    }

    pub fn endpoint(&self) -> String {
        self.snapshot().endpoint
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Fetch the machine list and replace the stored one.
    ///
    /// On failure the previous list is kept.
    pub async fn refresh(&self) -> Result<usize, ProbeError> {
        let endpoint = self.endpoint();
        let result = match tokio::time::timeout(self.request_timeout, self.fetcher.fetch_fleet(&endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.request_timeout)),
        };

        match result {
            Ok(machines) => {
                let count = machines.len();
                {
                    let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
                    latest.machines = machines;
                    latest.last_updated = Some(Utc::now());
                }
                let _ = self.events.send(PollEvent::FleetUpdated { count });
                Ok(count)
            }
            Err(e) => {
                tracing::warn!("Fleet refresh from {} failed: {}", endpoint, e);
                let _ = self.events.send(PollEvent::FleetFailed { error: e.to_string() });
                Err(e)
            }
        }
    }
}
