//! Event persistence: a versioned snapshot of JSON-LD documents.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::fs,
    tracing::warn,
};

use crate::{
    Context, Result,
    jsonld::{from_jsonld, to_jsonld},
    types::{Event, SNAPSHOT_VERSION},
};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Event>>;
    async fn save(&self, events: &[Event]) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct EventSnapshot {
    version: u32,
    #[serde(default)]
    events: Vec<Value>,
}

/// File-backed store with the same staging/backup/rename dance as the job store.
pub struct FileEventStore {
    path: PathBuf,
}

impl FileEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<data_dir>/cron/events.json`, next to the job snapshot.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("cron").join("events.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn load(&self) -> Result<Vec<Event>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&self.path).await?;
        let snapshot: EventSnapshot = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        if snapshot.version > SNAPSHOT_VERSION {
            warn!(
                version = snapshot.version,
                supported = SNAPSHOT_VERSION,
                "event snapshot written by a newer version"
            );
        }
        snapshot.events.into_iter().map(from_jsonld).collect()
    }

    async fn save(&self, events: &[Event]) -> Result<()> {
        let snapshot = EventSnapshot {
            version: SNAPSHOT_VERSION,
            events: events.iter().map(to_jsonld).collect::<Result<_>>()?,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.path.with_extension("json.bak");
            if let Err(e) = fs::copy(&self.path, &bak).await {
                warn!(path = %bak.display(), error = %e, "failed to back up event snapshot");
            }
        }

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn load(&self) -> Result<Vec<Event>> {
        Ok(self.snapshot())
    }

    async fn save(&self, events: &[Event]) -> Result<()> {
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = events.to_vec();
        Ok(())
    }
}
