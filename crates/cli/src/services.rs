use std::{path::Path, sync::Arc, time::Duration};

use {
    switchyard_bus::MessageBus,
    switchyard_calendar::{EventService, FileEventStore},
    switchyard_config::SwitchyardConfig,
    switchyard_cron::{CronConfig, CronService, FileStore},
    tracing::debug,
};

/// The bus plus the two persistent stores, opened against one data directory.
pub struct Services {
    pub bus: Arc<MessageBus>,
    pub cron: Arc<CronService>,
    pub events: Arc<EventService>,
}

impl Services {
    /// Relative snapshot paths in `config` resolve against `data_dir`.
    /// Nothing is read until first use.
    pub fn open(config: &SwitchyardConfig, data_dir: &Path) -> Self {
        let jobs_path = data_dir.join(&config.scheduler.jobs_file);
        let events_path = data_dir.join(&config.calendar.events_file);
        debug!(
            jobs = %jobs_path.display(),
            events = %events_path.display(),
            "opening stores"
        );

        let bus = Arc::new(MessageBus::new());
        let cron = CronService::with_config(
            Arc::new(FileStore::new(jobs_path)),
            bus.clone(),
            CronConfig {
                max_sleep: Duration::from_secs(config.scheduler.max_sleep_secs.max(1)),
            },
        );
        let events = EventService::with_cron(
            Arc::new(FileEventStore::new(events_path)),
            Arc::clone(&cron),
        );

        Self { bus, cron, events }
    }
}
