//! JSON file-backed job store with atomic writes.

use std::path::{Path, PathBuf};

use {async_trait::async_trait, tokio::fs, tracing::warn};

use crate::{
    Context, Result,
    store::CronStore,
    types::{CronJob, JobSnapshot, SNAPSHOT_VERSION},
};

/// File-backed store: one versioned snapshot holding every job.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/cron/jobs.json`.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("cron").join("jobs.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic write: write to temp, keep the previous file as `.bak`, rename
    /// temp over target.
    async fn atomic_write(&self, snapshot: &JobSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.path.with_extension("json.bak");
            if let Err(e) = fs::copy(&self.path, &bak).await {
                warn!(path = %bak.display(), error = %e, "failed to back up job snapshot");
            }
        }

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CronStore for FileStore {
    async fn load(&self) -> Result<Vec<CronJob>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).await?;
        let snapshot: JobSnapshot = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        if snapshot.version > SNAPSHOT_VERSION {
            warn!(
                version = snapshot.version,
                supported = SNAPSHOT_VERSION,
                "job snapshot written by a newer version"
            );
        }
        Ok(snapshot.jobs)
    }

    async fn save(&self, jobs: &[CronJob]) -> Result<()> {
        self.atomic_write(&JobSnapshot::new(jobs.to_vec())).await
    }
}
