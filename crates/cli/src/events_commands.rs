use std::path::PathBuf;

use {
    anyhow::Context,
    clap::Subcommand,
    switchyard_calendar::{Event, jsonld::format_rfc3339},
};

use crate::services::Services;

#[derive(Subcommand)]
pub enum EventsAction {
    /// List calendar events.
    List {
        /// Include events that have already started.
        #[arg(long)]
        all: bool,
    },
    /// Import events from an iCalendar (.ics) file.
    Import { file: PathBuf },
    /// Delete an event and its reminder job.
    Remove { id: String },
}

pub async fn handle_events(services: &Services, action: EventsAction) -> anyhow::Result<()> {
    let events = &services.events;
    match action {
        EventsAction::List { all } => {
            let listed = events.list_events(!all).await;
            if listed.is_empty() {
                println!("No events found.");
            }
            for event in &listed {
                println!("{}", event_line(event));
            }
        },
        EventsAction::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let import = events.import_ics(&text).await?;
            if import.skipped > 0 {
                println!(
                    "Imported {} event(s), skipped {} invalid",
                    import.added.len(),
                    import.skipped
                );
            } else {
                println!("Imported {} event(s)", import.added.len());
            }
            for event in &import.added {
                println!("{}", event_line(event));
            }
        },
        EventsAction::Remove { id } => {
            if events.remove_event(&id).await? {
                println!("Removed event {id}");
            } else {
                anyhow::bail!("event {id} not found");
            }
        },
    }
    Ok(())
}

fn event_line(event: &Event) -> String {
    let mut line = format!(
        "{}  {}  {}",
        event.id,
        event.name,
        format_rfc3339(event.start_ms)
    );
    if let Some(end_ms) = event.end_ms {
        line.push_str(&format!(" - {}", format_rfc3339(end_ms)));
    }
    if let Some(location) = &event.location {
        line.push_str(&format!("  @ {location}"));
    }
    if let Some(job_id) = &event.job_id {
        line.push_str(&format!("  [reminder job: {job_id}]"));
    }
    line
}
