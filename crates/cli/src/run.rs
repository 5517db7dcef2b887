use std::{path::Path, sync::Arc, time::Duration};

use {
    switchyard_channels::{ChannelManager, StdioChannel},
    switchyard_config::SwitchyardConfig,
    switchyard_dispatch::{DispatchConfig, Dispatcher, SubagentManager},
    switchyard_tools::{CronTool, EventsTool, ToolRegistry},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{processor::CommandProcessor, services::Services};

/// Run the dispatcher, scheduler and channels until Ctrl-C.
pub async fn run(
    config: &SwitchyardConfig,
    data_dir: &Path,
    echo_delay: Duration,
) -> anyhow::Result<()> {
    let Services { bus, cron, events } = Services::open(config, data_dir);

    if config.scheduler.enabled {
        cron.start().await?;
    } else {
        info!("scheduler disabled, jobs will not fire");
    }
    let job_sync = events.spawn_job_sync();

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(CronTool::new(Arc::clone(&cron))));
    tools.register(Arc::new(EventsTool::new(Arc::clone(&events))));
    let processor = Arc::new(CommandProcessor::new(tools, echo_delay));

    let dispatcher = Dispatcher::with_config(
        Arc::clone(&bus),
        processor,
        SubagentManager::new(bus.inbound_sender()),
        DispatchConfig {
            error_message: config.dispatch.error_message.clone(),
            stop_command: config.dispatch.stop_command.clone(),
        },
    );

    let mut channels = ChannelManager::new(config.channels.reconnect);
    if config.channels.stdio.enabled {
        channels.register(Arc::new(StdioChannel::new(&config.channels.stdio)?));
    }
    let channels = Arc::new(channels);
    if channels.list().is_empty() {
        warn!("no channels enabled, only scheduled jobs will run");
    }

    let shutdown = CancellationToken::new();
    let supervisors = channels.start_all(&bus.inbound_sender(), &shutdown);
    let router = tokio::spawn({
        let (channels, bus, shutdown) = (Arc::clone(&channels), Arc::clone(&bus), shutdown.clone());
        async move { channels.route_outbound(&bus, shutdown).await }
    });
    let dispatch = tokio::spawn({
        let (dispatcher, shutdown) = (Arc::clone(&dispatcher), shutdown.clone());
        async move { dispatcher.run(shutdown).await }
    });

    info!(
        data_dir = %data_dir.display(),
        channels = ?channels.list(),
        "switchyard running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    shutdown.cancel();
    cron.stop().await;
    dispatch.await?;
    router.await?;
    for supervisor in supervisors {
        supervisor.await?;
    }
    if let Some(job_sync) = job_sync {
        job_sync.abort();
    }
    Ok(())
}
