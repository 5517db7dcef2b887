//! Core scheduler: timer loop, job execution, CRUD operations.

use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    switchyard_bus::{CRON_CHANNEL, InboundMessage, InboundSender, MessageBus, meta},
    switchyard_common::time::{now_ms, short_id},
    tokio::{
        sync::{Mutex, Notify, RwLock, RwLockWriteGuard, broadcast},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    schedule::{compute_next_run, validate_schedule},
    store::CronStore,
    types::*,
};

/// Where fired jobs go. The bus in production, a recorder in tests.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn deliver(&self, msg: InboundMessage) -> Result<()>;
}

#[async_trait]
impl JobSink for MessageBus {
    async fn deliver(&self, msg: InboundMessage) -> Result<()> {
        self.publish_inbound(msg);
        Ok(())
    }
}

#[async_trait]
impl JobSink for InboundSender {
    async fn deliver(&self, msg: InboundMessage) -> Result<()> {
        if self.publish(msg) {
            Ok(())
        } else {
            Err(Error::message("message bus is closed"))
        }
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct CronConfig {
    /// Longest single timer sleep, so wall-clock jumps are picked up.
    pub max_sleep: Duration,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            max_sleep: Duration::from_secs(60),
        }
    }
}

/// Jobs plus the set of ids currently being fired.
#[derive(Default)]
struct JobTable {
    loaded: bool,
    jobs: Vec<CronJob>,
    running: HashSet<String>,
}

/// The job scheduler.
pub struct CronService {
    store: Arc<dyn CronStore>,
    sink: Arc<dyn JobSink>,
    table: RwLock<JobTable>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
    events: broadcast::Sender<CronNotification>,
    config: CronConfig,
}

impl CronService {
    pub fn new(store: Arc<dyn CronStore>, sink: Arc<dyn JobSink>) -> Arc<Self> {
        Self::with_config(store, sink, CronConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn CronStore>,
        sink: Arc<dyn JobSink>,
        config: CronConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            sink,
            table: RwLock::new(JobTable::default()),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
            events,
            config,
        })
    }

    /// Receive job lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CronNotification> {
        self.events.subscribe()
    }

    fn notify(&self, notification: CronNotification) {
        // No receivers is fine.
        let _ = self.events.send(notification);
    }

    /// Load jobs from the store (once) and start the timer loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let count = self.loaded_table().await.jobs.len();
        info!(count, "loaded cron jobs");

        {
            let mut running = self.running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
        }

        let svc = Arc::clone(self);
        let handle = tokio::spawn(async move {
            svc.timer_loop().await;
        });

        *self.timer_handle.lock().await = Some(handle);
        info!("cron service started");
        Ok(())
    }

    /// Stop the timer loop. Jobs already being fired run to completion.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();

        let mut handle = self.timer_handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
        info!("cron service stopped");
    }

    /// Add a new job.
    pub async fn add(&self, create: CronJobCreate) -> Result<CronJob> {
        validate_create(&create)?;

        let now = now_ms();
        let next_run_at_ms = if create.enabled {
            compute_next_run(&create.schedule, now, now)?
        } else {
            None
        };
        let job = CronJob {
            id: short_id(),
            name: create.name,
            enabled: create.enabled,
            schedule: create.schedule,
            payload: create.payload,
            state: CronJobState {
                next_run_at_ms,
                ..CronJobState::default()
            },
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run: create.delete_after_run,
        };

        {
            let mut table = self.loaded_table().await;
            let mut jobs = table.jobs.clone();
            jobs.push(job.clone());
            self.commit(&mut table, jobs).await?;
        }

        self.wake_notify.notify_one();
        self.notify(CronNotification::Created { job: job.clone() });
        info!(id = %job.id, name = %job.name, next_run_at_ms = ?job.state.next_run_at_ms, "cron job added");
        Ok(job)
    }

    /// Remove a job. Returns `false` if no job has that id.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        {
            let mut table = self.loaded_table().await;
            if !table.jobs.iter().any(|j| j.id == id) {
                return Ok(false);
            }
            let jobs = table.jobs.iter().filter(|j| j.id != id).cloned().collect();
            self.commit(&mut table, jobs).await?;
        }

        self.wake_notify.notify_one();
        self.notify(CronNotification::Removed {
            job_id: id.to_string(),
        });
        info!(id, "cron job removed");
        Ok(true)
    }

    /// List jobs ordered by next run; jobs without one come last.
    pub async fn list(&self, include_disabled: bool) -> Vec<CronJob> {
        self.ensure_loaded().await;
        let table = self.table.read().await;
        let mut jobs: Vec<CronJob> = table
            .jobs
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(u64::MAX));
        jobs
    }

    pub async fn get(&self, id: &str) -> Option<CronJob> {
        self.ensure_loaded().await;
        self.table
            .read()
            .await
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    /// Enable or disable a job, recomputing its next run.
    pub async fn enable(&self, id: &str, enabled: bool) -> Result<CronJob> {
        let now = now_ms();
        let updated = {
            let mut table = self.loaded_table().await;
            let mut jobs = table.jobs.clone();
            let job = jobs
                .iter_mut()
                .find(|j| j.id == id)
                .ok_or_else(|| Error::job_not_found(id))?;

            job.enabled = enabled;
            job.updated_at_ms = now;
            job.state.next_run_at_ms = if enabled {
                let anchor = job.state.last_run_at_ms.unwrap_or(now);
                compute_next_run(&job.schedule, anchor, now)?
            } else {
                None
            };
            let updated = job.clone();
            self.commit(&mut table, jobs).await?;
            updated
        };

        self.wake_notify.notify_one();
        self.notify(CronNotification::Updated {
            job: updated.clone(),
        });
        info!(id, enabled, "cron job toggled");
        Ok(updated)
    }

    /// Fire a job now, outside its schedule.
    pub async fn run(self: &Arc<Self>, id: &str, force: bool) -> Result<()> {
        let job = {
            let mut table = self.loaded_table().await;
            let job = table
                .jobs
                .iter()
                .find(|j| j.id == id)
                .cloned()
                .ok_or_else(|| Error::job_not_found(id))?;

            if !job.enabled && !force {
                return Err(Error::message(format!(
                    "job {id} is disabled (use force=true to override)"
                )));
            }
            if !table.running.insert(job.id.clone()) {
                return Err(Error::message(format!("job {id} is already running")));
            }
            job
        };

        self.execute_job(&job).await;
        Ok(())
    }

    /// Get scheduler status.
    pub async fn status(&self) -> CronStatus {
        self.ensure_loaded().await;
        let table = self.table.read().await;
        let running = *self.running.read().await;
        let enabled = || table.jobs.iter().filter(|j| j.enabled);
        CronStatus {
            running,
            job_count: table.jobs.len(),
            enabled_count: enabled().count(),
            next_run_at_ms: enabled().filter_map(|j| j.state.next_run_at_ms).min(),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn ensure_loaded(&self) {
        if !self.table.read().await.loaded {
            drop(self.loaded_table().await);
        }
    }

    /// Write guard over the table, loading it from the store on first use.
    async fn loaded_table(&self) -> RwLockWriteGuard<'_, JobTable> {
        let mut table = self.table.write().await;
        if !table.loaded {
            let mut jobs = match self.store.load().await {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "failed to load job snapshot, starting empty");
                    Vec::new()
                },
            };
            reschedule_loaded(&mut jobs, now_ms());
            table.jobs = jobs;
            table.loaded = true;
        }
        table
    }

    /// Persist `jobs` and, only if that succeeded, make it the live table.
    async fn commit(&self, table: &mut JobTable, jobs: Vec<CronJob>) -> Result<()> {
        self.store.save(&jobs).await?;
        table.jobs = jobs;
        Ok(())
    }

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_ms = self.ms_until_next_wake().await;

            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            self.process_due_jobs().await;
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let max_sleep_ms = self.config.max_sleep.as_millis() as u64;
        let table = self.table.read().await;
        let now = now_ms();
        table
            .jobs
            .iter()
            .filter(|j| j.enabled && !table.running.contains(&j.id))
            .filter_map(|j| j.state.next_run_at_ms)
            .map(|t| t.saturating_sub(now))
            .min()
            .unwrap_or(max_sleep_ms)
            .min(max_sleep_ms)
    }

    async fn process_due_jobs(self: &Arc<Self>) {
        let now = now_ms();
        let due_jobs: Vec<CronJob> = {
            let mut table = self.table.write().await;
            let JobTable { jobs, running, .. } = &mut *table;
            jobs.iter()
                .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|t| t <= now))
                // Marked under the write lock so the next tick skips it.
                .filter(|j| running.insert(j.id.clone()))
                .cloned()
                .collect()
        };

        for job in due_jobs {
            let svc = Arc::clone(self);
            tokio::spawn(async move {
                svc.execute_job(&job).await;
            });
        }
    }

    async fn execute_job(&self, job: &CronJob) {
        let started = now_ms();
        info!(id = %job.id, name = %job.name, "executing cron job");

        let (status, error_msg) = match self.sink.deliver(job_message(job)).await {
            Ok(()) => (RunStatus::Ok, None),
            Err(e) => {
                error!(id = %job.id, error = %e, "cron job failed");
                (RunStatus::Error, Some(e.to_string()))
            },
        };

        self.finish_job(job, started, status, error_msg).await;
        info!(id = %job.id, status = ?status, "cron job finished");
    }

    /// Record the outcome and reschedule (or retire) the job.
    async fn finish_job(
        &self,
        job: &CronJob,
        started: u64,
        status: RunStatus,
        error_msg: Option<String>,
    ) {
        let now = now_ms();
        let notification = {
            let mut table = self.table.write().await;
            table.running.remove(&job.id);

            let mut jobs = table.jobs.clone();
            let Some(pos) = jobs.iter().position(|j| j.id == job.id) else {
                debug!(id = %job.id, "job removed while running");
                return;
            };

            let current = &mut jobs[pos];
            current.state.last_run_at_ms = Some(started);
            current.state.last_status = Some(status);
            current.state.last_error = error_msg;

            let notification = if current.schedule.is_one_shot() {
                current.state.next_run_at_ms = None;
                if current.delete_after_run {
                    jobs.remove(pos);
                    info!(id = %job.id, "one-shot job deleted after run");
                    CronNotification::Removed {
                        job_id: job.id.clone(),
                    }
                } else {
                    CronNotification::Updated {
                        job: current.clone(),
                    }
                }
            } else {
                current.state.next_run_at_ms = compute_next_run(&current.schedule, started, now)
                    .unwrap_or_else(|e| {
                        warn!(id = %job.id, error = %e, "cannot reschedule job");
                        None
                    });
                CronNotification::Updated {
                    job: current.clone(),
                }
            };

            // The run happened either way; the table must not refire it.
            if let Err(e) = self.store.save(&jobs).await {
                warn!(id = %job.id, error = %e, "failed to persist job state after run");
            }
            table.jobs = jobs;
            notification
        };

        self.notify(notification);
    }
}

/// Build the inbound message a job injects when it fires.
pub fn job_message(job: &CronJob) -> InboundMessage {
    let payload = &job.payload;
    let mut msg = InboundMessage::new(CRON_CHANNEL, CRON_CHANNEL, &job.id, &payload.message)
        .with_meta(meta::KIND, payload.kind.as_str())
        .with_meta(meta::JOB_ID, &job.id);
    if payload.deliver
        && let (Some(channel), Some(to)) = (&payload.channel, &payload.to)
    {
        msg = msg
            .with_meta(meta::REPLY_CHANNEL, channel)
            .with_meta(meta::REPLY_CHAT_ID, to);
    }
    msg
}

fn validate_create(create: &CronJobCreate) -> Result<()> {
    if create.name.trim().is_empty() {
        return Err(Error::invalid_input("job name must not be empty"));
    }
    if create.payload.message.trim().is_empty() {
        return Err(Error::invalid_input("job message must not be empty"));
    }
    if create.payload.deliver && (create.payload.channel.is_none() || create.payload.to.is_none()) {
        return Err(Error::invalid_input(
            "deliver=true requires both channel and to",
        ));
    }
    validate_schedule(&create.schedule)
}

/// Recompute next runs after loading a snapshot.
///
/// Recurring jobs skip whatever ticks were missed while the process was down.
/// One-shot jobs keep their persisted next run, so one that came due during
/// the downtime fires once on the first timer tick.
fn reschedule_loaded(jobs: &mut [CronJob], now: u64) {
    for job in jobs.iter_mut().filter(|j| j.enabled) {
        if job.schedule.is_one_shot() {
            continue;
        }
        let anchor = job.state.last_run_at_ms.unwrap_or(job.created_at_ms);
        job.state.next_run_at_ms = compute_next_run(&job.schedule, anchor, now).unwrap_or_else(|e| {
            warn!(id = %job.id, error = %e, "dropping schedule for invalid job");
            None
        });
    }
}
