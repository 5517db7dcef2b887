//! Time-triggered jobs: one-shot, interval, and cron-expression schedules.
//!
//! Jobs persist as a versioned JSON snapshot at `<data_dir>/cron/jobs.json`.
//! When a job fires, the scheduler synthesizes an inbound message on the
//! `cron` channel and hands it to a [`service::JobSink`] (normally the bus).

pub mod error;
pub mod parse;
pub mod schedule;
pub mod service;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod types;

pub use {
    error::{Context, Error, Result},
    service::{CronConfig, CronService, JobSink, job_message},
    store::CronStore,
    store_file::FileStore,
    store_memory::InMemoryStore,
    types::{
        CronJob, CronJobCreate, CronJobState, CronNotification, CronPayload, CronSchedule,
        CronStatus, PayloadKind, RunStatus,
    },
};
