//! Core data types for the job scheduler.

use serde::{Deserialize, Serialize};

/// Version written into every job snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

/// How a job is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronSchedule {
    /// One-shot: fire once at `at_ms` (epoch millis).
    At { at_ms: u64 },
    /// Fixed interval, measured from the previous run (or creation).
    Every { every_ms: u64 },
    /// Cron expression (5-field standard or 6/7-field with seconds and year).
    Cron {
        expr: String,
        /// IANA zone name. The process-local zone is used when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
}

impl CronSchedule {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Self::At { .. })
    }
}

/// What the synthesized message asks the processing step to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Informational event injected into the pipeline.
    SystemEvent,
    /// A full turn: the message is treated like a user request.
    #[default]
    AgentTurn,
}

impl PayloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SystemEvent => "system_event",
            Self::AgentTurn => "agent_turn",
        }
    }
}

/// What happens when a job fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronPayload {
    #[serde(default)]
    pub kind: PayloadKind,
    pub message: String,
    /// Route the eventual reply to `channel`/`to`.
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl CronPayload {
    pub fn agent_turn(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::AgentTurn,
            message: message.into(),
            deliver: false,
            channel: None,
            to: None,
        }
    }

    pub fn system_event(message: impl Into<String>) -> Self {
        Self {
            kind: PayloadKind::SystemEvent,
            ..Self::agent_turn(message)
        }
    }

    /// Deliver the reply to the given conversation.
    #[must_use]
    pub fn deliver_to(mut self, channel: impl Into<String>, to: impl Into<String>) -> Self {
        self.deliver = true;
        self.channel = Some(channel.into());
        self.to = Some(to.into());
        self
    }
}

/// Outcome of a single job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

/// Mutable runtime state of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CronJobState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub state: CronJobState,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default)]
    pub delete_after_run: bool,
}

/// Input for creating a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobCreate {
    pub name: String,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl CronJobCreate {
    pub fn new(name: impl Into<String>, schedule: CronSchedule, payload: CronPayload) -> Self {
        Self {
            name: name.into(),
            schedule,
            payload,
            delete_after_run: false,
            enabled: true,
        }
    }

    #[must_use]
    pub fn delete_after_run(mut self, delete: bool) -> Self {
        self.delete_after_run = delete;
        self
    }
}

/// Summary status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronStatus {
    pub running: bool,
    pub job_count: usize,
    pub enabled_count: usize,
    pub next_run_at_ms: Option<u64>,
}

/// Job lifecycle notification broadcast to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CronNotification {
    Created { job: CronJob },
    Updated { job: CronJob },
    Removed { job_id: String },
}

/// On-disk shape of the job store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSnapshot {
    pub version: u32,
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

impl JobSnapshot {
    pub fn new(jobs: Vec<CronJob>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            jobs,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_wire_shape() {
        let s = CronSchedule::Cron {
            expr: "0 9 * * *".into(),
            tz: Some("Europe/Paris".into()),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["kind"], "cron");
        assert_eq!(v["expr"], "0 9 * * *");
        assert_eq!(v["tz"], "Europe/Paris");

        let v = serde_json::to_value(CronSchedule::Every { every_ms: 5_000 }).unwrap();
        assert_eq!(v, serde_json::json!({ "kind": "every", "every_ms": 5000 }));
    }

    #[test]
    fn test_payload_kind_is_snake_case() {
        let p = CronPayload::system_event("hello");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["kind"], "system_event");
        assert_eq!(v["deliver"], false);
        assert!(v.get("channel").is_none());
    }

    #[test]
    fn test_deliver_to_sets_route() {
        let p = CronPayload::agent_turn("standup").deliver_to("slack", "C42");
        assert!(p.deliver);
        assert_eq!(p.channel.as_deref(), Some("slack"));
        assert_eq!(p.to.as_deref(), Some("C42"));
    }

    #[test]
    fn test_job_create_defaults() {
        let json = r#"{
            "name": "test",
            "schedule": { "kind": "at", "at_ms": 1000 },
            "payload": { "kind": "system_event", "message": "hi" }
        }"#;
        let create: CronJobCreate = serde_json::from_str(json).unwrap();
        assert!(create.enabled);
        assert!(!create.delete_after_run);
        assert!(create.schedule.is_one_shot());
    }

    #[test]
    fn test_snapshot_reads_job_without_state() {
        let json = r#"{
            "version": 1,
            "jobs": [{
                "id": "abcd1234",
                "name": "ping",
                "enabled": true,
                "schedule": { "kind": "every", "every_ms": 60000 },
                "payload": { "kind": "agent_turn", "message": "ping" },
                "created_at_ms": 1000,
                "updated_at_ms": 1000
            }]
        }"#;
        let snap: JobSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.version, SNAPSHOT_VERSION);
        assert_eq!(snap.jobs[0].state, CronJobState::default());
        assert!(!snap.jobs[0].delete_after_run);
    }

    #[test]
    fn test_notification_tagging() {
        let n = CronNotification::Removed {
            job_id: "j1".into(),
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["type"], "removed");
        assert_eq!(v["job_id"], "j1");
    }
}
