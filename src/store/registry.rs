//! Target registry: targets, histories and in-flight counters.

use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;

/// Rejections from `Registry::add`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target name must not be empty")]
    EmptyName,
    #[error("target endpoint must not be empty")]
    EmptyEndpoint,
    #[error("target {0:?} already exists")]
    DuplicateName(String),
}

struct Slot {
    target: Target,
    history: History,
    in_flight: u32,
}

impl Slot {
    fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            target: self.target.clone(),
            latest: self.history.latest().cloned(),
            history: self.history.to_vec(),
            in_flight: self.in_flight > 0,
        }
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    // Registration order
    slots: Vec<Slot>,
}

impl Inner {
    fn by_name(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.target.name == name)
    }

    fn by_id_mut(&mut self, id: u64) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.target.id == id)
    }
}

/// Thread-safe registry. Every method holds the lock for a single synchronous
/// update, so a target, its history and its in-flight state always change
/// together.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Target CRUD ---

    /// Register a new target. Name and endpoint are stored trimmed.
    pub fn add(&self, name: &str, endpoint: &str) -> Result<Target, ValidationError> {
        let name = name.trim();
        let endpoint = endpoint.trim();

        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if endpoint.is_empty() {
            return Err(ValidationError::EmptyEndpoint);
        }

        let mut inner = self.lock();
        if inner.by_name(name).is_some() {
            return Err(ValidationError::DuplicateName(name.to_string()));
        }

        inner.next_id += 1;
        let target = Target {
            id: inner.next_id,
            name: name.to_string(),
            endpoint: endpoint.to_string(),
        };
        inner.slots.push(Slot {
            target: target.clone(),
            history: History::new(),
            in_flight: 0,
        });
        Ok(target)
    }

    /// Remove a target together with its history and poll state.
    ///
    /// Returns `false` when no such target exists.
    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.slots.len();
        inner.slots.retain(|s| s.target.name != name);
        inner.slots.len() != before
    }

    /// All targets in registration order.
    pub fn targets(&self) -> Vec<Target> {
        self.lock().slots.iter().map(|s| s.target.clone()).collect()
    }

    // --- Polling ---

    /// Mark a target as in flight and return it.
    pub fn begin_poll(&self, name: &str) -> Option<Target> {
        let mut inner = self.lock();
        let slot = inner.slots.iter_mut().find(|s| s.target.name == name)?;
        slot.in_flight += 1;
        Some(slot.target.clone())
    }

    /// Mark every target with no request in flight and return those targets.
    ///
    /// Targets that are still waiting on an earlier request are left out.
    pub fn begin_idle_polls(&self) -> Vec<Target> {
        self.lock()
            .slots
            .iter_mut()
            .filter(|s| s.in_flight == 0)
            .map(|slot| {
                slot.in_flight += 1;
                slot.target.clone()
            })
            .collect()
    }

    /// Release one in-flight mark. No-op if the target is gone.
    pub fn finish_poll(&self, id: u64) {
        if let Some(slot) = self.lock().by_id_mut(id) {
            slot.in_flight = slot.in_flight.saturating_sub(1);
        }
    }

    /// Append a sample to the target's history.
    ///
    /// Returns `false` (and drops the sample) when the target was removed
    /// since the poll started.
    pub fn record(&self, id: u64, sample: StatusSample) -> bool {
        match self.lock().by_id_mut(id) {
            Some(slot) => {
                slot.history.push(sample);
                true
            }
            None => false,
        }
    }

    // --- Snapshots ---

    pub fn snapshot(&self, name: &str) -> Option<TargetSnapshot> {
        self.lock().by_name(name).map(Slot::snapshot)
    }

    pub fn snapshots(&self) -> Vec<TargetSnapshot> {
        self.lock().slots.iter().map(Slot::snapshot).collect()
    }
}
