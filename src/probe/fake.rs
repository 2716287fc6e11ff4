//! Scripted fetcher for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Map;
use tokio::sync::Semaphore;

use super::{ProbeError, StatusFetcher, StatusReport};
use crate::store::{MachineStatus, Target};

#[derive(Clone)]
pub enum Reply {
    /// Succeed with this cpu and memory value.
    Usage(f64),
    Fail(ProbeError),
    /// Never answer.
    Hang,
    /// Wait for a permit, then succeed with this value.
    Gated(Arc<Semaphore>, f64),
}

#[derive(Default)]
pub struct FakeFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    fleet: Mutex<Option<Result<Vec<MachineStatus>, ProbeError>>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, name: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(name.to_string(), reply);
    }

    pub fn set_fleet(&self, result: Result<Vec<MachineStatus>, ProbeError>) {
        *self.fleet.lock().unwrap() = Some(result);
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

fn report(value: f64) -> StatusReport {
    StatusReport {
        cpu: value,
        memory: value,
        status: "Online".to_string(),
        server: None,
        reported_at: None,
        extra: Map::new(),
    }
}

#[async_trait]
impl StatusFetcher for FakeFetcher {
    async fn fetch_status(&self, target: &Target) -> Result<StatusReport, ProbeError> {
        *self.calls.lock().unwrap().entry(target.name.clone()).or_default() += 1;

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&target.name)
            .cloned()
            .unwrap_or(Reply::Usage(1.0));

        match reply {
            Reply::Usage(v) => Ok(report(v)),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
            Reply::Gated(gate, v) => {
                gate.acquire()
                    .await
                    .map_err(|e| ProbeError::Network(e.to_string()))?
                    .forget();
                Ok(report(v))
            }
        }
    }

    async fn fetch_fleet(&self, _endpoint: &str) -> Result<Vec<MachineStatus>, ProbeError> {
        self.fleet
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(ProbeError::Network("no fleet scripted".to_string())))
    }
}
