//! Metrics poller: target management, polling, and poll notifications.

mod fleet;

pub use fleet::*;

use crate::probe::{ProbeError, StatusFetcher};
use crate::store::{Registry, StatusSample, Target, TargetSnapshot, ValidationError};

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

pub(crate) const EVENT_CAPACITY: usize = 256;

/// Poll error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PollError {
    #[error("unknown target {0:?}")]
    UnknownTarget(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Notifications published as polls complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    Recorded { target: String, sample: StatusSample },
    Failed { target: String, error: String },
    FleetUpdated { count: usize },
    FleetFailed { error: String },
}

/// Outcome of one `poll_all` round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Clears the in-flight mark however the poll ends.
struct InFlightGuard<'a> {
    registry: &'a Registry,
    id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.finish_poll(self.id);
    }
}

/// Owns the registry and drives status requests against it.
#[derive(Clone)]
pub struct Poller {
    registry: Arc<Registry>,
    fetcher: Arc<dyn StatusFetcher>,
    request_timeout: Duration,
    events: broadcast::Sender<PollEvent>,
}

impl Poller {
    pub fn new(registry: Arc<Registry>, fetcher: Arc<dyn StatusFetcher>, request_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            fetcher,
            request_timeout,
            events,
        }
    }

    /// Subscribe to poll notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PollEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Build a bulk-status monitor sharing this poller's fetcher and events.
    pub fn fleet_monitor(&self, endpoint: &str) -> FleetMonitor {
        FleetMonitor::new(
            endpoint,
            self.fetcher.clone(),
            self.events.clone(),
            self.request_timeout,
        )
    }

    // --- Targets ---

    /// Register a target. It is picked up by the next polling round.
    pub fn add_target(&self, name: &str, endpoint: &str) -> Result<Target, ValidationError> {
        let target = self.registry.add(name, endpoint)?;
        tracing::info!("Poller: Added target {} ({})", target.name, target.endpoint);
        Ok(target)
    }

    /// Remove a target and everything recorded for it. Unknown names are ignored.
    pub fn remove_target(&self, name: &str) -> bool {
        let removed = self.registry.remove(name);
        if removed {
            tracing::info!("Poller: Removed target {}", name);
        }
        removed
    }

    pub fn targets(&self) -> Vec<Target> {
        self.registry.targets()
    }

    pub fn snapshot(&self, name: &str) -> Option<TargetSnapshot> {
        self.registry.snapshot(name)
    }

    pub fn snapshots(&self) -> Vec<TargetSnapshot> {
        self.registry.snapshots()
    }

    // --- Polling ---

    /// Request one status sample for `name` and record it.
    ///
    /// Failures leave the history untouched and are published as
    /// `PollEvent::Failed`. A target removed while its request was in flight
    /// reports `UnknownTarget` and its sample is discarded.
    pub async fn poll_one(&self, name: &str) -> Result<StatusSample, PollError> {
        let target = self
            .registry
            .begin_poll(name)
            .ok_or_else(|| PollError::UnknownTarget(name.to_string()))?;
        self.run_poll(target).await
    }

    /// Request and record a sample for a target already marked in flight.
    async fn run_poll(&self, target: Target) -> Result<StatusSample, PollError> {
        let _guard = InFlightGuard {
            registry: &self.registry,
            id: target.id,
        };

        let result = match tokio::time::timeout(self.request_timeout, self.fetcher.fetch_status(&target)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.request_timeout)),
        };

        match result {
            Ok(report) => {
                let sample = report.into_sample(Utc::now());
                if !self.registry.record(target.id, sample.clone()) {
                    tracing::debug!("Poller: Dropping sample for removed target {}", target.name);
                    return Err(PollError::UnknownTarget(target.name));
                }
                self.publish(PollEvent::Recorded {
                    target: target.name.clone(),
                    sample: sample.clone(),
                });
                Ok(sample)
            }
            Err(e) => {
                tracing::warn!("Poll failed for {}: {}", target.name, e);
                self.publish(PollEvent::Failed {
                    target: target.name.clone(),
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Poll every current target concurrently.
    pub async fn poll_all(&self) -> RoundSummary {
        let mut tasks = JoinSet::new();
        for target in self.registry.targets() {
            let poller = self.clone();
            tasks.spawn(async move { poller.poll_one(&target.name).await });
        }
        collect(tasks).await
    }

    /// Poll every target that has no request in flight.
    ///
    /// Busy targets are skipped for this round only, so one slow target
    /// never holds back the others.
    pub async fn poll_idle(&self) -> RoundSummary {
        let mut tasks = JoinSet::new();
        for target in self.registry.begin_idle_polls() {
            let poller = self.clone();
            tasks.spawn(async move { poller.run_poll(target).await });
        }
        collect(tasks).await
    }
}

async fn collect(mut tasks: JoinSet<Result<StatusSample, PollError>>) -> RoundSummary {
    let mut summary = RoundSummary::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(_)) => summary.succeeded += 1,
            Ok(Err(_)) => summary.failed += 1,
            Err(e) => {
                tracing::error!("Poll task aborted: {}", e);
                summary.failed += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::{FakeFetcher, Reply};
    use crate::store::HISTORY_LIMIT;
    use tokio::sync::Semaphore;

    fn poller_with(fetcher: Arc<FakeFetcher>) -> Poller {
        Poller::new(Arc::new(Registry::new()), fetcher, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_poll_one_records_sample() {
        let fetcher = FakeFetcher::new();
        fetcher.set("A", Reply::Usage(53.27));
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://x").unwrap();

        let sample = poller.poll_one("A").await.unwrap();
        assert_eq!(sample.cpu, 53.27);

        let snap = poller.snapshot("A").unwrap();
        assert_eq!(snap.history.len(), 1);
        assert_eq!(snap.latest, Some(sample));
        assert!(!snap.in_flight);
    }

    #[tokio::test]
    async fn test_add_does_not_poll() {
        let fetcher = FakeFetcher::new();
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://x").unwrap();
        assert_eq!(fetcher.calls("A"), 0);
    }

    #[tokio::test]
    async fn test_history_bound_over_many_polls() {
        let fetcher = FakeFetcher::new();
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://x").unwrap();

        for i in 0..25 {
            fetcher.set("A", Reply::Usage(i as f64));
            poller.poll_one("A").await.unwrap();
            assert!(poller.snapshot("A").unwrap().history.len() <= HISTORY_LIMIT);
        }

        let cpus: Vec<f64> = poller.snapshot("A").unwrap().history.iter().map(|s| s.cpu).collect();
        assert_eq!(cpus, (14..25).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_history() {
        let fetcher = FakeFetcher::new();
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://x").unwrap();
        fetcher.set("A", Reply::Usage(10.0));
        poller.poll_one("A").await.unwrap();
        let before = poller.snapshot("A").unwrap().history;

        let mut events = poller.subscribe();
        fetcher.set("A", Reply::Fail(ProbeError::Network("connection refused".to_string())));
        let err = poller.poll_one("A").await.unwrap_err();
        assert_eq!(
            err,
            PollError::Probe(ProbeError::Network("connection refused".to_string()))
        );

        let snap = poller.snapshot("A").unwrap();
        assert_eq!(snap.history, before);
        assert!(!snap.in_flight);

        match events.recv().await.unwrap() {
            PollEvent::Failed { target, error } => {
                assert_eq!(target, "A");
                assert!(error.contains("connection refused"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let poller = poller_with(FakeFetcher::new());
        assert_eq!(
            poller.poll_one("nope").await.unwrap_err(),
            PollError::UnknownTarget("nope".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_request_times_out() {
        let fetcher = FakeFetcher::new();
        fetcher.set("A", Reply::Hang);
        let poller = Poller::new(Arc::new(Registry::new()), fetcher, Duration::from_millis(500));
        poller.add_target("A", "http://x").unwrap();

        let err = poller.poll_one("A").await.unwrap_err();
        assert_eq!(err, PollError::Probe(ProbeError::Timeout(Duration::from_millis(500))));
        assert!(!poller.snapshot("A").unwrap().in_flight);
    }

    #[tokio::test]
    async fn test_in_flight_flag_while_waiting() {
        let fetcher = FakeFetcher::new();
        let gate = Arc::new(Semaphore::new(0));
        fetcher.set("A", Reply::Gated(gate.clone(), 3.0));
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://x").unwrap();

        let task = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_one("A").await })
        };
        while fetcher.calls("A") == 0 {
            tokio::task::yield_now().await;
        }
        assert!(poller.snapshot("A").unwrap().in_flight);

        gate.add_permits(1);
        task.await.unwrap().unwrap();
        assert!(!poller.snapshot("A").unwrap().in_flight);
    }

    #[tokio::test]
    async fn test_response_after_remove_is_dropped() {
        let fetcher = FakeFetcher::new();
        let gate = Arc::new(Semaphore::new(0));
        fetcher.set("A", Reply::Gated(gate.clone(), 3.0));
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://x").unwrap();

        let task = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_one("A").await })
        };
        while fetcher.calls("A") == 0 {
            tokio::task::yield_now().await;
        }
        assert!(poller.remove_target("A"));
        gate.add_permits(1);
        assert_eq!(
            task.await.unwrap(),
            Err(PollError::UnknownTarget("A".to_string()))
        );

        assert!(poller.snapshot("A").is_none());
        assert!(poller.targets().is_empty());
    }

    #[tokio::test]
    async fn test_poll_all_isolates_failures() {
        let fetcher = FakeFetcher::new();
        fetcher.set("A", Reply::Fail(ProbeError::Status(500)));
        fetcher.set("B", Reply::Usage(42.0));
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://a").unwrap();
        poller.add_target("B", "http://b").unwrap();

        let summary = poller.poll_all().await;
        assert_eq!(summary, RoundSummary { succeeded: 1, failed: 1 });

        assert!(poller.snapshot("A").unwrap().history.is_empty());
        let b = poller.snapshot("B").unwrap();
        assert_eq!(b.history.len(), 1);
        assert_eq!(b.history[0].cpu, 42.0);
    }

    #[tokio::test]
    async fn test_poll_idle_skips_target_in_flight() {
        let fetcher = FakeFetcher::new();
        let gate = Arc::new(Semaphore::new(0));
        fetcher.set("A", Reply::Gated(gate.clone(), 3.0));
        fetcher.set("B", Reply::Usage(7.0));
        let poller = poller_with(fetcher.clone());
        poller.add_target("A", "http://a").unwrap();
        poller.add_target("B", "http://b").unwrap();

        let task = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.poll_one("A").await })
        };
        while fetcher.calls("A") == 0 {
            tokio::task::yield_now().await;
        }

        let summary = poller.poll_idle().await;
        assert_eq!(summary, RoundSummary { succeeded: 1, failed: 0 });
        assert_eq!(fetcher.calls("A"), 1);
        assert_eq!(fetcher.calls("B"), 1);

        gate.add_permits(1);
        task.await.unwrap().unwrap();
        assert!(!poller.snapshot("A").unwrap().in_flight);
        assert!(!poller.snapshot("B").unwrap().in_flight);
    }

    #[tokio::test]
    async fn test_poll_all_empty_registry() {
        let poller = poller_with(FakeFetcher::new());
        assert_eq!(poller.poll_all().await, RoundSummary::default());
    }

    #[tokio::test]
    async fn test_recorded_event() {
        let fetcher = FakeFetcher::new();
        fetcher.set("A", Reply::Usage(7.0));
        let poller = poller_with(fetcher);
        poller.add_target("A", "http://x").unwrap();
        let mut events = poller.subscribe();

        poller.poll_one("A").await.unwrap();
        match events.recv().await.unwrap() {
            PollEvent::Recorded { target, sample } => {
                assert_eq!(target, "A");
                assert_eq!(sample.cpu, 7.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
