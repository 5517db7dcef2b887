//! Session locks and the set of cancellable units per session.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

/// Id of a tracked dispatch unit, unique within one registry.
pub type UnitId = u64;

struct ActiveUnit {
    id: UnitId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What a stop request cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Dispatch units that were still running or waiting for the session.
    pub tasks: usize,
    /// Subagents owned by the session.
    pub subagents: usize,
}

impl StopReport {
    pub fn total(&self) -> usize {
        self.tasks + self.subagents
    }

    /// The notice sent back to the session.
    pub fn notice(&self) -> String {
        match self.total() {
            0 => "No active task to stop.".to_string(),
            n => format!("Stopped {n} task(s)."),
        }
    }
}

/// Per-session serialization locks and in-flight units.
///
/// Locks are created on first sight of a session key and kept for the life of
/// the registry. Each map sits behind one process-wide mutex so concurrent
/// first sight of a key resolves to a single lock.
#[derive(Default)]
pub struct SessionRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    active: Mutex<HashMap<String, Vec<ActiveUnit>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serialization lock for `key`.
    pub fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Start a unit and register it under `key`.
    ///
    /// `spawn` runs with the registry locked, so the unit cannot deregister
    /// itself before it has been registered.
    pub fn track<F>(&self, key: &str, cancel: CancellationToken, spawn: F) -> UnitId
    where
        F: FnOnce(UnitId) -> JoinHandle<()>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let handle = spawn(id);
        active
            .entry(key.to_string())
            .or_default()
            .push(ActiveUnit { id, cancel, handle });
        id
    }

    /// Remove a finished unit. A no-op if a stop already took it.
    pub fn untrack(&self, key: &str, id: UnitId) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(units) = active.get_mut(key) {
            units.retain(|u| u.id != id);
            if units.is_empty() {
                active.remove(key);
            }
        }
    }

    pub fn active_count(&self, key: &str) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Cancel every unit of `key` and wait for each to wind down.
    ///
    /// Units that had already finished are not counted.
    pub async fn cancel_session(&self, key: &str) -> usize {
        let units = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .unwrap_or_default();
        cancel_units(units).await
    }

    /// Cancel every unit of every session.
    pub async fn cancel_all(&self) -> usize {
        let units: Vec<ActiveUnit> = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .flat_map(|(_, units)| units)
            .collect();
        cancel_units(units).await
    }
}

async fn cancel_units(units: Vec<ActiveUnit>) -> usize {
    let mut cancelled = 0;
    for unit in &units {
        if !unit.handle.is_finished() {
            cancelled += 1;
        }
        unit.cancel.cancel();
    }
    for unit in units {
        // A panicked unit has nothing left to cancel.
        let _ = unit.handle.await;
    }
    cancelled
}
