use {
    clap::Subcommand,
    switchyard_calendar::jsonld::format_rfc3339,
    switchyard_cron::{CronJob, CronSchedule},
};

use crate::services::Services;

#[derive(Subcommand)]
pub enum JobsAction {
    /// List scheduled jobs.
    List {
        /// Include disabled jobs.
        #[arg(long)]
        all: bool,
    },
    /// Delete a job.
    Remove { id: String },
    /// Re-enable a disabled job.
    Enable { id: String },
    /// Disable a job without deleting it.
    Disable { id: String },
}

pub async fn handle_jobs(services: &Services, action: JobsAction) -> anyhow::Result<()> {
    let cron = &services.cron;
    match action {
        JobsAction::List { all } => {
            let jobs = cron.list(all).await;
            if jobs.is_empty() {
                println!("No scheduled jobs.");
            }
            for job in &jobs {
                println!("{}", job_line(job));
            }
        },
        JobsAction::Remove { id } => {
            if cron.remove(&id).await? {
                // No job sync runs here to hear the removal.
                services.events.clear_job(&id).await?;
                println!("Removed job {id}");
            } else {
                anyhow::bail!("job {id} not found");
            }
        },
        JobsAction::Enable { id } => {
            let job = cron.enable(&id, true).await?;
            println!("Enabled '{}'", job.name);
        },
        JobsAction::Disable { id } => {
            let job = cron.enable(&id, false).await?;
            println!("Disabled '{}'", job.name);
        },
    }
    Ok(())
}

fn job_line(job: &CronJob) -> String {
    let schedule = match &job.schedule {
        CronSchedule::At { at_ms } => format!("at {}", format_rfc3339(*at_ms)),
        CronSchedule::Every { every_ms } => format!("every {}s", every_ms / 1_000),
        CronSchedule::Cron { expr, tz } => match tz {
            Some(tz) => format!("cron '{expr}' ({tz})"),
            None => format!("cron '{expr}'"),
        },
    };
    let next = job
        .state
        .next_run_at_ms
        .map(format_rfc3339)
        .unwrap_or_else(|| "-".into());
    let target = match (&job.payload.channel, &job.payload.to) {
        (Some(channel), Some(to)) if job.payload.deliver => format!("  -> {channel}:{to}"),
        _ => String::new(),
    };
    let disabled = if job.enabled { "" } else { " [disabled]" };
    format!(
        "{}  {}  {schedule}  next: {next}{target}{disabled}",
        job.id, job.name
    )
}
