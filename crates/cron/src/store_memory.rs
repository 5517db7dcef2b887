//! In-memory store for testing.

use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{Error, Result, store::CronStore, types::CronJob};

/// In-memory store backed by a `Vec`. No persistence, for tests only.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: Mutex<Vec<CronJob>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing table, as if it had been persisted earlier.
    pub fn with_jobs(jobs: Vec<CronJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        }
    }

    /// Make every subsequent `save` fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<CronJob> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CronStore for InMemoryStore {
    async fn load(&self) -> Result<Vec<CronJob>> {
        Ok(self.snapshot())
    }

    async fn save(&self, jobs: &[CronJob]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::message("simulated write failure"));
        }
        *self.jobs.lock().unwrap_or_else(|e| e.into_inner()) = jobs.to_vec();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
