/// Config schema types (scheduler, calendar, dispatch, channels).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    /// Where job and event snapshots live. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub calendar: CalendarConfig,
    pub dispatch: DispatchConfig,
    pub channels: ChannelsConfig,
}

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whether the timer loop runs. Defaults to true.
    pub enabled: bool,
    /// Upper bound on a single timer sleep, so wall-clock jumps are noticed.
    pub max_sleep_secs: u64,
    /// Job snapshot path, relative to `data_dir` unless absolute.
    pub jobs_file: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_sleep_secs: 60,
            jobs_file: PathBuf::from("cron/jobs.json"),
        }
    }
}

/// Calendar event store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Event snapshot path, relative to `data_dir` unless absolute.
    pub events_file: PathBuf,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            events_file: PathBuf::from("cron/events.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Content of the outbound sent when a processing step fails.
    pub error_message: String,
    /// Command that cancels everything running for the sender's session.
    pub stop_command: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            error_message: "Sorry, I encountered an error.".into(),
            stop_command: "/stop".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub reconnect: ReconnectConfig,
    pub stdio: StdioConfig,
}

/// Exponential backoff between adapter reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

/// Line-oriented terminal channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioConfig {
    pub enabled: bool,
    pub chat_id: String,
    pub sender_id: String,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat_id: "direct".into(),
            sender_id: "user".into(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg: SwitchyardConfig = toml::from_str("[scheduler]\nmax_sleep_secs = 5\n").unwrap();
        assert_eq!(cfg.scheduler.max_sleep_secs, 5);
        assert!(cfg.scheduler.enabled);
        assert_eq!(cfg.dispatch.stop_command, "/stop");
        assert_eq!(cfg.channels.reconnect.max_delay_ms, 60_000);
        assert!(cfg.data_dir.is_none());
    }

    #[test]
    fn yaml_and_json_share_the_schema() {
        let yaml = "dispatch:\n  error_message: oops\nchannels:\n  stdio:\n    enabled: false\n";
        let cfg: SwitchyardConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.dispatch.error_message, "oops");
        assert!(!cfg.channels.stdio.enabled);

        let json = r#"{"calendar":{"events_file":"/tmp/ev.json"}}"#;
        let cfg: SwitchyardConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.calendar.events_file, PathBuf::from("/tmp/ev.json"));
    }
}
