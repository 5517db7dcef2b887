//! Event CRUD layered over the job scheduler.

use std::sync::Arc;

use {
    switchyard_common::time::{now_ms, short_id},
    switchyard_cron::{CronJobCreate, CronNotification, CronSchedule, CronService},
    tokio::{
        sync::{RwLock, RwLockWriteGuard, broadcast::error::RecvError},
        task::JoinHandle,
    },
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result, ical, jsonld,
    store::EventStore,
    types::{Event, NewEvent},
};

/// Linked job names are clipped to this many characters.
const JOB_NAME_MAX_CHARS: usize = 30;

/// Outcome of an iCalendar import.
#[derive(Debug, Default)]
pub struct IcsImport {
    pub added: Vec<Event>,
    /// Components rejected by validation; the rest of the batch still lands.
    pub skipped: usize,
}

#[derive(Default)]
struct EventTable {
    loaded: bool,
    events: Vec<Event>,
}

/// Calendar events, each optionally owning one one-shot reminder job.
pub struct EventService {
    store: Arc<dyn EventStore>,
    cron: Option<Arc<CronService>>,
    table: RwLock<EventTable>,
}

impl EventService {
    /// Events without a scheduler: payloads are stored but never fire.
    pub fn new(store: Arc<dyn EventStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            cron: None,
            table: RwLock::new(EventTable::default()),
        })
    }

    pub fn with_cron(store: Arc<dyn EventStore>, cron: Arc<CronService>) -> Arc<Self> {
        Arc::new(Self {
            store,
            cron: Some(cron),
            table: RwLock::new(EventTable::default()),
        })
    }

    /// Create an event. With a payload and a scheduler attached, an `at` job
    /// is created for `alarm_ms` (or the start) and deleted after it runs.
    pub async fn add_event(&self, new: NewEvent) -> Result<Event> {
        if new.name.trim().is_empty() {
            return Err(Error::invalid_input("event name must not be empty"));
        }
        if new.start_ms == 0 {
            return Err(Error::invalid_input("event start must be set"));
        }
        if new.end_ms.is_some_and(|end| end < new.start_ms) {
            return Err(Error::invalid_input("event end is before its start"));
        }
        for ms in [Some(new.start_ms), new.end_ms, new.alarm_ms]
            .into_iter()
            .flatten()
        {
            if jsonld::instant(ms).is_err() {
                return Err(Error::invalid_input(format!("event time out of range: {ms}")));
            }
        }

        let mut table = self.loaded_table().await;

        let job_id = match (&new.payload, &self.cron) {
            (Some(payload), Some(cron)) => {
                let create = CronJobCreate::new(
                    job_name(&new.name),
                    CronSchedule::At {
                        at_ms: new.alarm_ms.unwrap_or(new.start_ms),
                    },
                    payload.clone(),
                )
                .delete_after_run(true);
                Some(cron.add(create).await?.id)
            },
            _ => None,
        };

        let now = now_ms();
        let event = Event {
            id: short_id(),
            name: new.name,
            start_ms: new.start_ms,
            end_ms: new.end_ms,
            description: new.description,
            location: new.location,
            status: new.status,
            job_id,
            payload: new.payload,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let mut events = table.events.clone();
        events.push(event.clone());
        if let Err(e) = self.commit(&mut table, events).await {
            self.discard_job(event.job_id.as_deref()).await;
            return Err(e);
        }

        info!(id = %event.id, name = %event.name, job_id = ?event.job_id, "event added");
        Ok(event)
    }

    /// Remove an event and its linked job. Returns `false` for unknown ids.
    pub async fn remove_event(&self, id: &str) -> Result<bool> {
        let mut table = self.loaded_table().await;
        let Some(event) = table.events.iter().find(|e| e.id == id).cloned() else {
            return Ok(false);
        };

        if let (Some(job_id), Some(cron)) = (&event.job_id, &self.cron) {
            // Already gone (fired, or removed by hand) is fine.
            cron.remove(job_id).await?;
        }

        let events = table.events.iter().filter(|e| e.id != id).cloned().collect();
        self.commit(&mut table, events).await?;
        info!(id, "event removed");
        Ok(true)
    }

    pub async fn get_event(&self, id: &str) -> Option<Event> {
        self.ensure_loaded().await;
        self.table
            .read()
            .await
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// Events sorted by start. With `upcoming_only`, events that already
    /// started are left out.
    pub async fn list_events(&self, upcoming_only: bool) -> Vec<Event> {
        self.ensure_loaded().await;
        let now = now_ms();
        let table = self.table.read().await;
        let mut events: Vec<Event> = table
            .events
            .iter()
            .filter(|e| !upcoming_only || e.start_ms >= now)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.start_ms);
        events
    }

    /// Parse iCalendar text and add every event found in it.
    ///
    /// A component that fails validation is logged and skipped. Storage or
    /// scheduler failures still abort the import.
    pub async fn import_ics(&self, text: &str) -> Result<IcsImport> {
        let parsed = ical::parse_ics(text)?;
        let mut import = IcsImport {
            added: Vec::with_capacity(parsed.len()),
            skipped: 0,
        };
        for new in parsed {
            let name = new.name.clone();
            match self.add_event(new).await {
                Ok(event) => import.added.push(event),
                Err(Error::InvalidInput { message }) => {
                    warn!(name = %name, reason = %message, "skipping invalid iCalendar event");
                    import.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }
        info!(
            count = import.added.len(),
            skipped = import.skipped,
            "imported iCalendar events"
        );
        Ok(import)
    }

    /// Forget a job id that no longer exists in the scheduler.
    pub async fn clear_job(&self, job_id: &str) -> Result<usize> {
        let mut table = self.loaded_table().await;
        let mut events = table.events.clone();
        let mut cleared = 0;
        for event in events.iter_mut().filter(|e| e.job_id.as_deref() == Some(job_id)) {
            event.job_id = None;
            event.updated_at_ms = now_ms();
            cleared += 1;
        }
        if cleared > 0 {
            self.commit(&mut table, events).await?;
            debug!(job_id, cleared, "cleared job link from events");
        }
        Ok(cleared)
    }

    /// Keep `job_id` links honest when the scheduler retires a job on its own.
    ///
    /// Links left behind while no sync was running (offline removal, a crash
    /// between the two snapshot writes) are repaired first.
    pub fn spawn_job_sync(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.cron.as_ref()?.subscribe();
        let svc = Arc::clone(self);
        Some(tokio::spawn(async move {
            svc.reconcile_jobs().await;
            loop {
                match rx.recv().await {
                    Ok(CronNotification::Removed { job_id }) => {
                        if let Err(e) = svc.clear_job(&job_id).await {
                            warn!(job_id = %job_id, error = %e, "failed to unlink removed job");
                        }
                    },
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event sync lagged behind scheduler notifications");
                        svc.reconcile_jobs().await;
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Drop links to jobs the scheduler no longer knows about.
    async fn reconcile_jobs(&self) {
        let Some(cron) = &self.cron else {
            return;
        };
        let linked: Vec<String> = {
            self.ensure_loaded().await;
            let table = self.table.read().await;
            table.events.iter().filter_map(|e| e.job_id.clone()).collect()
        };
        for job_id in linked {
            if cron.get(&job_id).await.is_none()
                && let Err(e) = self.clear_job(&job_id).await
            {
                warn!(job_id = %job_id, error = %e, "failed to unlink missing job");
            }
        }
    }

    async fn discard_job(&self, job_id: Option<&str>) {
        if let (Some(job_id), Some(cron)) = (job_id, &self.cron)
            && let Err(e) = cron.remove(job_id).await
        {
            warn!(job_id, error = %e, "failed to roll back reminder job");
        }
    }

    async fn ensure_loaded(&self) {
        if !self.table.read().await.loaded {
            drop(self.loaded_table().await);
        }
    }

    async fn loaded_table(&self) -> RwLockWriteGuard<'_, EventTable> {
        let mut table = self.table.write().await;
        if !table.loaded {
            table.events = match self.store.load().await {
                Ok(events) => events,
                Err(e) => {
                    warn!(error = %e, "failed to load event snapshot, starting empty");
                    Vec::new()
                },
            };
            table.loaded = true;
        }
        table
    }

    async fn commit(&self, table: &mut EventTable, events: Vec<Event>) -> Result<()> {
        self.store.save(&events).await?;
        table.events = events;
        Ok(())
    }
}

fn job_name(event_name: &str) -> String {
    event_name.chars().take(JOB_NAME_MAX_CHARS).collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            store::{FileEventStore, InMemoryEventStore},
            types::EventStatus,
        },
        switchyard_bus::MessageBus,
        switchyard_cron::{CronPayload, InMemoryStore},
    };

    const HOUR: u64 = 3_600_000;

    fn cron() -> Arc<CronService> {
        CronService::new(Arc::new(InMemoryStore::new()), Arc::new(MessageBus::new()))
    }

    fn reminder(name: &str, start_ms: u64) -> NewEvent {
        NewEvent::new(name, start_ms)
            .with_reminder(CronPayload::agent_turn(format!("Event reminder: {name}")), None)
    }

    #[tokio::test]
    async fn add_with_payload_creates_linked_job() {
        let cron = cron();
        let svc = EventService::with_cron(Arc::new(InMemoryEventStore::new()), cron.clone());
        let start = now_ms() + 2 * HOUR;

        let event = svc
            .add_event(
                reminder("A rather long event name that needs clipping", start)
                    .with_reminder(CronPayload::agent_turn("ping"), Some(start - HOUR)),
            )
            .await
            .unwrap();

        let job = cron.get(event.job_id.as_deref().unwrap()).await.unwrap();
        assert_eq!(job.schedule, CronSchedule::At {
            at_ms: start - HOUR
        });
        assert!(job.delete_after_run);
        assert_eq!(job.name.chars().count(), 30);
        assert_eq!(job.payload.message, "ping");
    }

    #[tokio::test]
    async fn add_without_payload_or_scheduler_has_no_job() {
        let cron = cron();
        let svc = EventService::with_cron(Arc::new(InMemoryEventStore::new()), cron.clone());
        let plain = svc
            .add_event(NewEvent::new("Lunch", now_ms() + HOUR))
            .await
            .unwrap();
        assert!(plain.job_id.is_none());
        assert!(cron.list(true).await.is_empty());

        let detached = EventService::new(Arc::new(InMemoryEventStore::new()));
        let event = detached
            .add_event(reminder("Call", now_ms() + HOUR))
            .await
            .unwrap();
        assert!(event.job_id.is_none());
        assert!(event.payload.is_some());
    }

    #[tokio::test]
    async fn add_rejects_bad_input() {
        let svc = EventService::new(Arc::new(InMemoryEventStore::new()));
        assert!(svc.add_event(NewEvent::new("  ", 1_000)).await.is_err());
        assert!(
            svc.add_event(NewEvent::new("x", 5_000).with_end(1_000))
                .await
                .is_err()
        );
        assert!(svc.list_events(false).await.is_empty());
    }

    #[tokio::test]
    async fn remove_takes_the_job_with_it() {
        let cron = cron();
        let svc = EventService::with_cron(Arc::new(InMemoryEventStore::new()), cron.clone());
        let event = svc
            .add_event(reminder("Dentist", now_ms() + HOUR))
            .await
            .unwrap();

        assert!(svc.remove_event(&event.id).await.unwrap());
        assert!(cron.list(true).await.is_empty());
        assert!(svc.get_event(&event.id).await.is_none());
        assert!(!svc.remove_event(&event.id).await.unwrap());
    }

    #[tokio::test]
    async fn remove_tolerates_job_already_gone() {
        let cron = cron();
        let svc = EventService::with_cron(Arc::new(InMemoryEventStore::new()), cron.clone());
        let event = svc
            .add_event(reminder("Gym", now_ms() + HOUR))
            .await
            .unwrap();
        cron.remove(event.job_id.as_deref().unwrap()).await.unwrap();

        assert!(svc.remove_event(&event.id).await.unwrap());
    }

    #[tokio::test]
    async fn list_upcoming_filters_and_sorts() {
        let svc = EventService::new(Arc::new(InMemoryEventStore::new()));
        let now = now_ms();
        svc.add_event(NewEvent::new("later", now + 2 * HOUR))
            .await
            .unwrap();
        svc.add_event(NewEvent::new("past", now - HOUR)).await.unwrap();
        svc.add_event(NewEvent::new("soon", now + HOUR)).await.unwrap();

        let names = |events: Vec<Event>| events.into_iter().map(|e| e.name).collect::<Vec<_>>();
        assert_eq!(names(svc.list_events(true).await), vec!["soon", "later"]);
        assert_eq!(names(svc.list_events(false).await), vec![
            "past", "soon", "later"
        ]);
    }

    #[tokio::test]
    async fn reload_reproduces_fields() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("events.json");
        let start = 1_893_488_400_000;

        let added = {
            let svc = EventService::new(Arc::new(FileEventStore::new(&path)));
            svc.add_event(
                NewEvent::new("Offsite", start)
                    .with_end(start + 8 * HOUR)
                    .with_description("Quarterly planning")
                    .with_location("Lisbon")
                    .with_status(EventStatus::Tentative),
            )
            .await
            .unwrap()
        };

        let svc = EventService::new(Arc::new(FileEventStore::new(&path)));
        let loaded = svc.get_event(&added.id).await.unwrap();
        assert_eq!(loaded, added);
    }

    #[tokio::test]
    async fn job_sync_clears_link_when_job_fires() {
        let cron = cron();
        let svc = EventService::with_cron(Arc::new(InMemoryEventStore::new()), cron.clone());
        let sync = svc.spawn_job_sync().unwrap();

        let event = svc
            .add_event(reminder("Soon", now_ms() + HOUR))
            .await
            .unwrap();
        let job_id = event.job_id.clone().unwrap();

        cron.run(&job_id, true).await.unwrap();
        assert!(cron.get(&job_id).await.is_none());

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while svc.get_event(&event.id).await.unwrap().job_id.is_some() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        sync.abort();
    }

    #[tokio::test]
    async fn add_rejects_unrepresentable_times() {
        let svc = EventService::new(Arc::new(InMemoryEventStore::new()));
        let err = svc
            .add_event(NewEvent::new("Far out", u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(svc.list_events(false).await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("events.json");
        std::fs::write(&path, "{ definitely not a snapshot").unwrap();

        let svc = EventService::new(Arc::new(FileEventStore::new(&path)));
        assert!(svc.list_events(false).await.is_empty());

        let added = svc
            .add_event(NewEvent::new("Fresh start", now_ms() + HOUR))
            .await
            .unwrap();
        let reopened = EventService::new(Arc::new(FileEventStore::new(&path)));
        assert_eq!(reopened.list_events(false).await, vec![added]);
    }

    #[tokio::test]
    async fn job_sync_repairs_links_left_while_offline() {
        let cron = cron();
        let store = Arc::new(InMemoryEventStore::new());
        let event = {
            let svc = EventService::with_cron(store.clone(), cron.clone());
            svc.add_event(reminder("Standup", now_ms() + HOUR))
                .await
                .unwrap()
        };
        let job_id = event.job_id.clone().unwrap();
        // Removed with nobody listening for the notification.
        assert!(cron.remove(&job_id).await.unwrap());

        let svc = EventService::with_cron(store, cron.clone());
        assert_eq!(
            svc.get_event(&event.id).await.unwrap().job_id.as_deref(),
            Some(job_id.as_str())
        );
        let sync = svc.spawn_job_sync().unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while svc.get_event(&event.id).await.unwrap().job_id.is_some() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        sync.abort();
    }

    #[cfg(feature = "ics")]
    #[tokio::test]
    async fn import_ics_skips_invalid_components() {
        let svc = EventService::new(Arc::new(InMemoryEventStore::new()));
        let ics = "BEGIN:VCALENDAR\r\n\
                   VERSION:2.0\r\n\
                   BEGIN:VEVENT\r\n\
                   SUMMARY:A\r\n\
                   DTSTART:20300105T090000Z\r\n\
                   END:VEVENT\r\n\
                   BEGIN:VEVENT\r\n\
                   SUMMARY:B\r\n\
                   DTSTART:20300105T090000Z\r\n\
                   DTEND:20300105T080000Z\r\n\
                   END:VEVENT\r\n\
                   BEGIN:VEVENT\r\n\
                   SUMMARY:C\r\n\
                   DTSTART:20300106T090000Z\r\n\
                   END:VEVENT\r\n\
                   END:VCALENDAR\r\n";

        let import = svc.import_ics(ics).await.unwrap();
        assert_eq!(import.skipped, 1);
        let names: Vec<_> = import.added.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(svc.list_events(false).await.len(), 2);
    }

    #[cfg(feature = "ics")]
    #[tokio::test]
    async fn import_ics_links_reminders() {
        let cron = cron();
        let svc = EventService::with_cron(Arc::new(InMemoryEventStore::new()), cron.clone());
        let ics = "BEGIN:VCALENDAR\r\n\
                   VERSION:2.0\r\n\
                   BEGIN:VEVENT\r\n\
                   SUMMARY:Review\r\n\
                   DTSTART:20300105T090000Z\r\n\
                   BEGIN:VALARM\r\n\
                   TRIGGER:-PT15M\r\n\
                   END:VALARM\r\n\
                   END:VEVENT\r\n\
                   BEGIN:VEVENT\r\n\
                   SUMMARY:Plain\r\n\
                   DTSTART:20300106T090000Z\r\n\
                   END:VEVENT\r\n\
                   END:VCALENDAR\r\n";

        let import = svc.import_ics(ics).await.unwrap();
        assert_eq!(import.skipped, 0);
        let added = import.added;
        assert_eq!(added.len(), 2);

        let job = cron.get(added[0].job_id.as_deref().unwrap()).await.unwrap();
        // 2030-01-05T08:45:00Z
        assert_eq!(job.schedule, CronSchedule::At {
            at_ms: 1_893_833_100_000
        });
        assert_eq!(job.payload.message, "Event reminder: Review");
        assert!(added[1].job_id.is_none());
    }

    #[cfg(not(feature = "ics"))]
    #[tokio::test]
    async fn import_ics_reports_missing_capability() {
        let svc = EventService::new(Arc::new(InMemoryEventStore::new()));
        let err = svc.import_ics("BEGIN:VCALENDAR").await.unwrap_err();
        assert!(matches!(err, Error::CapabilityUnavailable { .. }));
    }
}
