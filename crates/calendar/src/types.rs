//! Calendar event types.

use {
    serde::{Deserialize, Serialize},
    switchyard_cron::CronPayload,
};

/// Version written into every event snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Tentative => "tentative",
            Self::Cancelled => "cancelled",
        }
    }

    /// Lenient parse. Anything unrecognised counts as confirmed.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tentative" => Self::Tentative,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Confirmed,
        }
    }

    /// schema.org `EventStatusType` member.
    pub fn schema_org(self) -> &'static str {
        match self {
            Self::Confirmed => "EventScheduled",
            Self::Tentative => "EventPostponed",
            Self::Cancelled => "EventCancelled",
        }
    }

    /// Accepts bare names and full `https://schema.org/...` IRIs.
    pub fn from_schema_org(value: &str) -> Self {
        let name = value.rsplit('/').next().unwrap_or(value);
        match name {
            "EventPostponed" | "EventRescheduled" => Self::Tentative,
            "EventCancelled" => Self::Cancelled,
            _ => Self::Confirmed,
        }
    }
}

/// A calendar entry, optionally owning one scheduler job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub description: String,
    pub location: Option<String>,
    pub status: EventStatus,
    /// Linked job, present while the reminder is still scheduled.
    pub job_id: Option<String>,
    pub payload: Option<CronPayload>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Input for creating an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEvent {
    pub name: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
    pub description: String,
    pub location: Option<String>,
    pub status: EventStatus,
    /// What the linked job does when it fires. No job is created without one.
    pub payload: Option<CronPayload>,
    /// When the linked job fires. Defaults to `start_ms`.
    pub alarm_ms: Option<u64>,
}

impl NewEvent {
    pub fn new(name: impl Into<String>, start_ms: u64) -> Self {
        Self {
            name: name.into(),
            start_ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_end(mut self, end_ms: u64) -> Self {
        self.end_ms = Some(end_ms);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_reminder(mut self, payload: CronPayload, alarm_ms: Option<u64>) -> Self {
        self.payload = Some(payload);
        self.alarm_ms = alarm_ms;
        self
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(EventStatus::Confirmed, "EventScheduled")]
    #[case(EventStatus::Tentative, "EventPostponed")]
    #[case(EventStatus::Cancelled, "EventCancelled")]
    fn schema_org_mapping_is_symmetric(#[case] status: EventStatus, #[case] term: &str) {
        assert_eq!(status.schema_org(), term);
        assert_eq!(EventStatus::from_schema_org(term), status);
        assert_eq!(
            EventStatus::from_schema_org(&format!("https://schema.org/{term}")),
            status
        );
        assert_eq!(EventStatus::parse(status.as_str()), status);
    }

    #[test]
    fn unknown_status_is_confirmed() {
        assert_eq!(EventStatus::parse("maybe"), EventStatus::Confirmed);
        assert_eq!(
            EventStatus::from_schema_org("EventMovedOnline"),
            EventStatus::Confirmed
        );
    }
}
