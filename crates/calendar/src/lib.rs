//! Calendar events layered over the job scheduler.
//!
//! An event created with a payload owns exactly one one-shot job; removing
//! the event removes the job, and a job the scheduler retires after firing
//! is unlinked from its event. Events persist as schema.org JSON-LD
//! documents. iCalendar import sits behind the default `ics` feature.

pub mod error;
pub mod ical;
pub mod jsonld;
pub mod service;
pub mod store;
pub mod types;

pub use {
    error::{Context, Error, Result},
    service::{EventService, IcsImport},
    store::{EventStore, FileEventStore, InMemoryEventStore},
    types::{Event, EventStatus, NewEvent},
};
