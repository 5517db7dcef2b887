//! Calendar event management tool.

use std::sync::Arc;

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Value, json},
    switchyard_calendar::{Event, EventService, IcsImport, NewEvent, jsonld::format_rfc3339},
    switchyard_cron::{CronPayload, parse::parse_absolute_time_ms},
    tracing::debug,
};

use crate::registry::{AgentTool, ToolContext};

fn default_true() -> bool {
    true
}

/// Arguments for `add`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AddEvent {
    pub name: String,
    /// ISO 8601 start, e.g. `2026-03-15T10:00:00`.
    pub start: String,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// When set, a job fires with this message as the prompt.
    #[serde(default)]
    pub reminder_message: Option<String>,
    /// Minutes before the start to fire the reminder.
    #[serde(default)]
    pub reminder_min: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EventsAction {
    Add(AddEvent),
    List {
        #[serde(default = "default_true")]
        upcoming_only: bool,
    },
    Get {
        event_id: String,
    },
    Remove {
        event_id: String,
    },
    ImportIcs {
        ics_text: String,
    },
}

pub struct EventsTool {
    events: Arc<EventService>,
}

impl EventsTool {
    pub fn new(events: Arc<EventService>) -> Self {
        Self { events }
    }

    async fn add(&self, args: AddEvent, ctx: &ToolContext) -> Result<String> {
        if args.name.trim().is_empty() {
            bail!("name is required for add");
        }
        let start_ms = parse_time(&args.start, "start")?;
        let end_ms = args
            .end
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_time(s, "end"))
            .transpose()?;

        let mut new = NewEvent::new(args.name, start_ms);
        if let Some(end_ms) = end_ms {
            new = new.with_end(end_ms);
        }
        if let Some(description) = args.description {
            new = new.with_description(description);
        }
        if let Some(location) = args.location.filter(|l| !l.trim().is_empty()) {
            new = new.with_location(location);
        }
        if let Some(message) = args.reminder_message.filter(|m| !m.trim().is_empty()) {
            let Some((channel, chat_id)) = ctx.session() else {
                bail!("no session context (channel/chat_id) for reminder delivery");
            };
            let payload = CronPayload::agent_turn(message).deliver_to(channel, chat_id);
            let alarm_ms = start_ms.saturating_sub(args.reminder_min.saturating_mul(60_000));
            new = new.with_reminder(payload, Some(alarm_ms));
        }

        let event = self.events.add_event(new).await?;
        debug!(event_id = %event.id, job_id = ?event.job_id, "events tool added event");
        let mut out = format!("Added event '{}' (id: {})", event.name, event.id);
        if let Some(job_id) = &event.job_id {
            out.push_str(&format!(", reminder job: {job_id}"));
        }
        Ok(out)
    }

    async fn list(&self, upcoming_only: bool) -> String {
        let events = self.events.list_events(upcoming_only).await;
        if events.is_empty() {
            return "No events found.".into();
        }
        let label = if upcoming_only {
            "Upcoming events"
        } else {
            "All events"
        };
        let lines: Vec<String> = events.iter().map(list_line).collect();
        format!("{label}:\n{}", lines.join("\n"))
    }

    async fn get(&self, event_id: &str) -> String {
        let Some(event) = self.events.get_event(event_id).await else {
            return format!("Event {event_id} not found");
        };
        let mut parts = vec![
            format!("id: {}", event.id),
            format!("name: {}", event.name),
            format!("status: {}", event.status.as_str()),
            format!("start: {}", format_rfc3339(event.start_ms)),
        ];
        if let Some(end_ms) = event.end_ms {
            parts.push(format!("end: {}", format_rfc3339(end_ms)));
        }
        if !event.description.is_empty() {
            parts.push(format!("description: {}", event.description));
        }
        if let Some(location) = &event.location {
            parts.push(format!("location: {location}"));
        }
        if let Some(job_id) = &event.job_id {
            parts.push(format!("reminder job: {job_id}"));
        }
        parts.join("\n")
    }

    async fn remove(&self, event_id: &str) -> Result<String> {
        if self.events.remove_event(event_id).await? {
            Ok(format!("Removed event {event_id}"))
        } else {
            Ok(format!("Event {event_id} not found"))
        }
    }

    async fn import_ics(&self, ics_text: &str) -> Result<String> {
        if ics_text.trim().is_empty() {
            bail!("ics_text is required for import_ics");
        }
        let IcsImport { added, skipped } = self
            .events
            .import_ics(ics_text)
            .await
            .context("iCalendar import failed")?;
        if added.is_empty() && skipped == 0 {
            return Ok("No events found in ICS data".into());
        }
        let mut out = format!("Imported {} event(s)", added.len());
        if skipped > 0 {
            out.push_str(&format!(", skipped {skipped} invalid"));
        }
        if !added.is_empty() {
            let lines: Vec<String> = added
                .iter()
                .map(|e| format!("- [{}] {}", e.id, e.name))
                .collect();
            out.push_str(":\n");
            out.push_str(&lines.join("\n"));
        }
        Ok(out)
    }
}

fn parse_time(value: &str, field: &str) -> Result<u64> {
    parse_absolute_time_ms(value).with_context(|| {
        format!("invalid {field} datetime '{value}', use ISO format e.g. '2026-03-15T10:00:00'")
    })
}

fn list_line(event: &Event) -> String {
    let mut line = format!(
        "- [{}] {} @ {}",
        event.id,
        event.name,
        format_rfc3339(event.start_ms)
    );
    if let Some(location) = &event.location {
        line.push_str(&format!(" ({location})"));
    }
    if let Some(job_id) = &event.job_id {
        line.push_str(&format!(" [reminder job: {job_id}]"));
    }
    line
}

#[async_trait]
impl AgentTool for EventsTool {
    fn name(&self) -> &str {
        "events"
    }

    fn description(&self) -> &str {
        "Manage calendar events for future execution. \
         Actions: add, list, get, remove, import_ics. \
         Events are stored as JSON-LD and can optionally trigger an agent turn at event time."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "get", "remove", "import_ics"],
                    "description": "Action to perform"
                },
                "name": { "type": "string", "description": "Event title (for add)" },
                "start": {
                    "type": "string",
                    "description": "Event start as ISO datetime, e.g. '2026-03-15T10:00:00' (for add)"
                },
                "end": { "type": "string", "description": "Event end as ISO datetime (optional, for add)" },
                "description": { "type": "string", "description": "Event description (optional, for add)" },
                "location": { "type": "string", "description": "Event location (optional, for add)" },
                "reminder_message": {
                    "type": "string",
                    "description": "If set, a job fires at event time (or reminder_min before) with this message as the prompt (for add)"
                },
                "reminder_min": {
                    "type": "integer",
                    "description": "Minutes before event start to trigger the reminder. Defaults to 0."
                },
                "event_id": { "type": "string", "description": "Event ID (for get, remove)" },
                "upcoming_only": {
                    "type": "boolean",
                    "description": "Only list future events (default true, for list)"
                },
                "ics_text": { "type": "string", "description": "Raw ICS/iCalendar text to import (for import_ics)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let action: EventsAction =
            serde_json::from_value(params).context("invalid events arguments")?;
        match action {
            EventsAction::Add(args) => self.add(args, ctx).await,
            EventsAction::List { upcoming_only } => Ok(self.list(upcoming_only).await),
            EventsAction::Get { event_id } => Ok(self.get(&event_id).await),
            EventsAction::Remove { event_id } => self.remove(&event_id).await,
            EventsAction::ImportIcs { ics_text } => self.import_ics(&ics_text).await,
        }
    }
}
