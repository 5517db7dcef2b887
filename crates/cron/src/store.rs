//! Persistence trait for the job table.

use async_trait::async_trait;

use crate::{Result, types::CronJob};

/// Persistence backend for cron jobs.
///
/// The whole table is written on every mutation. `save` must either replace
/// the previous snapshot or leave it untouched.
#[async_trait]
pub trait CronStore: Send + Sync {
    async fn load(&self) -> Result<Vec<CronJob>>;
    async fn save(&self, jobs: &[CronJob]) -> Result<()>;
}
