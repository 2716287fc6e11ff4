//! Scheduler module: the cancellable polling timer.
//!
//! `Idle` -> `Scheduled` (timer armed) -> `Polling` (a round in flight) ->
//! `Scheduled`. Pausing returns to `Idle`; shutdown is terminal.
//!
//! Every tick starts a round over the targets that are idle at that moment.
//! A target still waiting on an earlier request sits that round out while the
//! rest are polled on schedule.

use crate::poller::{FleetMonitor, Poller};

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Polling,
    Stopped,
}

/// Explicit handle to the armed timer task.
struct TimerHandle {
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    async fn cancel(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::error!("Scheduler: timer task failed: {}", e);
            }
        }
    }
}

/// Drives periodic polling rounds.
pub struct Scheduler {
    poller: Poller,
    fleet: Option<Arc<FleetMonitor>>,
    interval: Duration,
    timer: Mutex<Option<TimerHandle>>,
    state: Arc<watch::Sender<SchedulerState>>,
    // Rounds still running, across timers
    active_rounds: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(poller: Poller, fleet: Option<Arc<FleetMonitor>>, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            poller,
            fleet,
            interval,
            timer: Mutex::new(None),
            state: Arc::new(state),
            active_rounds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Arm the timer unless `paused` is set.
    pub async fn start(&self, paused: bool) -> SchedulerState {
        if paused {
            tracing::info!("Scheduler: Starting paused");
            self.state()
        } else {
            self.resume().await
        }
    }

    /// Arm the timer: one round now, then one every interval.
    ///
    /// Any previously armed timer is cancelled first.
    pub async fn resume(&self) -> SchedulerState {
        let mut timer = self.timer.lock().await;
        if self.state() == SchedulerState::Stopped {
            return SchedulerState::Stopped;
        }

        if let Some(handle) = timer.take() {
            handle.cancel().await;
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        self.state.send_replace(SchedulerState::Scheduled);

        let task = tokio::spawn(run_timer(
            self.poller.clone(),
            self.fleet.clone(),
            self.interval,
            self.state.clone(),
            self.active_rounds.clone(),
            stop_rx,
        ));
        *timer = Some(TimerHandle { stop_tx, task });

        tracing::info!("Scheduler: Polling every {:?}", self.interval);
        SchedulerState::Scheduled
    }

    /// Cancel the timer. Requests already in flight still complete.
    pub async fn pause(&self) -> SchedulerState {
        let mut timer = self.timer.lock().await;
        if self.state() == SchedulerState::Stopped {
            return SchedulerState::Stopped;
        }

        if let Some(handle) = timer.take() {
            handle.cancel().await;
            tracing::info!("Scheduler: Paused");
        }
        self.state.send_replace(SchedulerState::Idle);
        SchedulerState::Idle
    }

    /// Flip between paused and running.
    pub async fn toggle(&self) -> SchedulerState {
        match self.state() {
            SchedulerState::Idle => self.resume().await,
            SchedulerState::Scheduled | SchedulerState::Polling => self.pause().await,
            SchedulerState::Stopped => SchedulerState::Stopped,
        }
    }

    /// Cancel the timer for good.
    pub async fn shutdown(&self) {
        let mut timer = self.timer.lock().await;
        if let Some(handle) = timer.take() {
            handle.cancel().await;
        }
        self.state.send_replace(SchedulerState::Stopped);
        tracing::info!("Scheduler: Stopped");
    }
}

/// Tick loop for one armed timer.
async fn run_timer(
    poller: Poller,
    fleet: Option<Arc<FleetMonitor>>,
    period: Duration,
    state: Arc<watch::Sender<SchedulerState>>,
    active_rounds: Arc<AtomicUsize>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                active_rounds.fetch_add(1, Ordering::SeqCst);
                state.send_if_modified(|s| transition(s, SchedulerState::Scheduled, SchedulerState::Polling));

                let poller = poller.clone();
                let fleet = fleet.clone();
                let state = state.clone();
                let active_rounds = active_rounds.clone();

                // Detached so that pausing never cuts a round short.
                tokio::spawn(async move {
                    let (summary, _) = tokio::join!(poller.poll_idle(), refresh_fleet(fleet.as_deref()));
                    tracing::debug!(
                        "Polling round finished: {} ok, {} failed",
                        summary.succeeded,
                        summary.failed
                    );

                    if active_rounds.fetch_sub(1, Ordering::SeqCst) == 1 {
                        state.send_if_modified(|s| transition(s, SchedulerState::Polling, SchedulerState::Scheduled));
                    }
                });
            }
        }
    }
}

async fn refresh_fleet(fleet: Option<&FleetMonitor>) {
    if let Some(fleet) = fleet {
        // Failures are logged and published by the monitor.
        let _ = fleet.refresh().await;
    }
}

fn transition(current: &mut SchedulerState, from: SchedulerState, to: SchedulerState) -> bool {
    if *current == from {
        *current = to;
        true
    } else {
        false
    }
}
