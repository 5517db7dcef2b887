//! Small pieces shared by every switchyard crate: error context plumbing and
//! time/id helpers.

pub mod error;
pub mod time;

pub use error::{FromMessage, with_cause};
