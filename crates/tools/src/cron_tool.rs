//! Scheduled job management tool.

use std::sync::Arc;

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Value, json},
    switchyard_calendar::jsonld::format_rfc3339,
    switchyard_cron::{
        CronJob, CronJobCreate, CronPayload, CronSchedule, CronService,
        parse::{parse_absolute_time_ms, parse_duration_ms},
    },
    tracing::debug,
};

use crate::registry::{AgentTool, ToolContext};

/// Default job names are clipped to this many characters.
const NAME_MAX_CHARS: usize = 30;

fn default_true() -> bool {
    true
}

/// Arguments for `add`. Exactly one schedule field must be set.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AddJob {
    pub message: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub every_seconds: Option<u64>,
    /// Interval as a duration string, e.g. `5m`.
    #[serde(default)]
    pub every: Option<String>,
    #[serde(default)]
    pub cron_expr: Option<String>,
    /// IANA zone for `cron_expr`.
    #[serde(default)]
    pub tz: Option<String>,
    /// ISO 8601 timestamp for a one-shot job.
    #[serde(default)]
    pub at: Option<String>,
}

impl AddJob {
    fn schedule(&self) -> Result<CronSchedule> {
        let given = [
            self.every_seconds.is_some(),
            self.every.is_some(),
            self.cron_expr.is_some(),
            self.at.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if given != 1 {
            bail!("exactly one of every_seconds, every, cron_expr, or at is required");
        }
        if self.tz.is_some() && self.cron_expr.is_none() {
            bail!("tz can only be used with cron_expr");
        }

        if let Some(secs) = self.every_seconds {
            if secs == 0 {
                bail!("every_seconds must be > 0");
            }
            return Ok(CronSchedule::Every {
                every_ms: secs.saturating_mul(1_000),
            });
        }
        if let Some(every) = &self.every {
            return Ok(CronSchedule::Every {
                every_ms: parse_duration_ms(every).context("invalid every")?,
            });
        }
        if let Some(expr) = &self.cron_expr {
            return Ok(CronSchedule::Cron {
                expr: expr.trim().to_string(),
                tz: self.tz.clone(),
            });
        }
        let at = self.at.as_deref().unwrap_or_default();
        Ok(CronSchedule::At {
            at_ms: parse_absolute_time_ms(at)
                .with_context(|| format!("invalid at datetime '{at}'"))?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CronAction {
    Add(AddJob),
    List {
        #[serde(default)]
        include_disabled: bool,
    },
    Remove {
        id: String,
    },
    Enable {
        id: String,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    Run {
        id: String,
        #[serde(default)]
        force: bool,
    },
}

pub struct CronTool {
    service: Arc<CronService>,
}

impl CronTool {
    pub fn new(service: Arc<CronService>) -> Self {
        Self { service }
    }

    async fn add(&self, args: AddJob, ctx: &ToolContext) -> Result<String> {
        let message = args.message.trim();
        if message.is_empty() {
            bail!("message is required for add");
        }
        let Some((channel, chat_id)) = ctx.session() else {
            bail!("no session context (channel/chat_id) for delivery");
        };
        let schedule = args.schedule()?;
        let one_shot = schedule.is_one_shot();
        let name = args
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| message.chars().take(NAME_MAX_CHARS).collect());

        let create = CronJobCreate::new(
            name,
            schedule,
            CronPayload::agent_turn(message).deliver_to(channel, chat_id),
        )
        .delete_after_run(one_shot);
        let job = self.service.add(create).await?;
        debug!(job_id = %job.id, channel, chat_id, "cron tool created job");
        Ok(format!("Created job '{}' (id: {})", job.name, job.id))
    }

    async fn list(&self, include_disabled: bool) -> String {
        let jobs = self.service.list(include_disabled).await;
        if jobs.is_empty() {
            return "No scheduled jobs.".into();
        }
        let lines: Vec<String> = jobs.iter().map(list_line).collect();
        format!("Scheduled jobs:\n{}", lines.join("\n"))
    }
}

fn describe_schedule(schedule: &CronSchedule) -> String {
    match schedule {
        CronSchedule::At { at_ms } => format!("at {}", format_rfc3339(*at_ms)),
        CronSchedule::Every { every_ms } => format!("every {}s", every_ms / 1_000),
        CronSchedule::Cron { expr, tz: Some(tz) } => format!("cron '{expr}' ({tz})"),
        CronSchedule::Cron { expr, tz: None } => format!("cron '{expr}'"),
    }
}

fn list_line(job: &CronJob) -> String {
    let mut line = format!(
        "- [{}] {} ({})",
        job.id,
        job.name,
        describe_schedule(&job.schedule)
    );
    if !job.enabled {
        line.push_str(" [disabled]");
    }
    if let Some(next) = job.state.next_run_at_ms {
        line.push_str(&format!(" next: {}", format_rfc3339(next)));
    }
    line
}

#[async_trait]
impl AgentTool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Schedule reminders and recurring tasks. \
         Actions: add, list, remove, enable, run. \
         The message is sent back to this conversation as a prompt when the job fires."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list", "remove", "enable", "run"],
                    "description": "Action to perform"
                },
                "message": { "type": "string", "description": "Prompt delivered when the job fires (for add)" },
                "name": { "type": "string", "description": "Optional job name (for add)" },
                "every_seconds": { "type": "integer", "description": "Interval in seconds (for add)" },
                "every": { "type": "string", "description": "Interval as a duration, e.g. '5m' or '2h' (for add)" },
                "cron_expr": { "type": "string", "description": "Cron expression, e.g. '0 9 * * *' (for add)" },
                "tz": { "type": "string", "description": "IANA timezone for cron_expr, e.g. 'Europe/Paris'" },
                "at": { "type": "string", "description": "ISO datetime for a one-shot job (for add)" },
                "include_disabled": { "type": "boolean", "description": "Also list disabled jobs (for list)" },
                "id": { "type": "string", "description": "Job ID (for remove, enable, run)" },
                "enabled": { "type": "boolean", "description": "New state (for enable, default true)" },
                "force": { "type": "boolean", "description": "Run even if disabled (for run)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String> {
        let action: CronAction =
            serde_json::from_value(params).context("invalid cron arguments")?;
        match action {
            CronAction::Add(args) => self.add(args, ctx).await,
            CronAction::List { include_disabled } => Ok(self.list(include_disabled).await),
            CronAction::Remove { id } => {
                if self.service.remove(&id).await? {
                    Ok(format!("Removed job {id}"))
                } else {
                    Ok(format!("Job {id} not found"))
                }
            },
            CronAction::Enable { id, enabled } => {
                let job = self.service.enable(&id, enabled).await?;
                let state = if job.enabled { "enabled" } else { "disabled" };
                Ok(format!("Job '{}' {state}", job.name))
            },
            CronAction::Run { id, force } => {
                self.service.run(&id, force).await?;
                Ok(format!("Job {id} triggered"))
            },
        }
    }
}
