//! The dispatch loop: bus in, per-session processing, bus out.

use std::{sync::Arc, task::Poll};

use {
    switchyard_bus::{InboundMessage, MessageBus, OutboundMessage},
    tokio::sync::OwnedMutexGuard,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    processor::{MessageProcessor, ProcessContext, SessionRef},
    registry::{SessionRegistry, StopReport},
    subagent::SubagentManager,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Sent back when a processing step fails.
    pub error_message: String,
    /// Matched trimmed and case-insensitively.
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

pub struct Dispatcher {
    bus: Arc<MessageBus>,
    processor: Arc<dyn MessageProcessor>,
    sessions: SessionRegistry,
    subagents: Arc<SubagentManager>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        bus: Arc<MessageBus>,
        processor: Arc<dyn MessageProcessor>,
        subagents: Arc<SubagentManager>,
    ) -> Arc<Self> {
        Self::with_config(bus, processor, subagents, DispatchConfig::default())
    }

    pub fn with_config(
        bus: Arc<MessageBus>,
        processor: Arc<dyn MessageProcessor>,
        subagents: Arc<SubagentManager>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            processor,
            sessions: SessionRegistry::new(),
            subagents,
            config,
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn subagents(&self) -> &Arc<SubagentManager> {
        &self.subagents
    }

    pub fn is_stop_command(&self, content: &str) -> bool {
        content.trim().eq_ignore_ascii_case(&self.config.stop_command)
    }

    /// Consume the inbound queue until `shutdown` fires or the bus closes,
    /// then cancel everything still in flight.
    pub async fn run(self: &Arc<Self>, shutdown: CancellationToken) {
        info!("dispatcher started");
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = self.bus.consume_inbound() => match msg {
                    Some(msg) => msg,
                    None => {
                        warn!("inbound queue closed");
                        break;
                    },
                },
            };

            if self.is_stop_command(&msg.content) {
                self.handle_stop(&msg).await;
            } else {
                self.submit(msg).await;
            }
        }

        let cancelled = self.sessions.cancel_all().await;
        info!(cancelled, "dispatcher stopped");
    }

    /// Queue `msg` behind its session and start processing it as soon as the
    /// session is free.
    ///
    /// The unit is registered before this returns, so it can be stopped even
    /// while it is still waiting for the session.
    pub async fn submit(self: &Arc<Self>, msg: InboundMessage) {
        let session = SessionRef::of(&msg);
        let key = session.key();
        let lock = self.sessions.lock_for(&key);

        // Poll once so the waiter joins the lock's FIFO queue in arrival order.
        let mut acquire = Box::pin(lock.lock_owned());
        let ready = match futures::poll!(acquire.as_mut()) {
            Poll::Ready(guard) => Some(guard),
            Poll::Pending => None,
        };

        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let unit_key = key.clone();
        self.sessions.track(&unit_key, cancel.clone(), move |id| {
            tokio::spawn(async move {
                let guard: OwnedMutexGuard<()> = match ready {
                    Some(guard) => guard,
                    None => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!(session_key = %key, "dispatch cancelled while queued");
                            this.sessions.untrack(&key, id);
                            return;
                        },
                        guard = acquire => guard,
                    },
                };
                let reply = this.process(msg, session, cancel.clone()).await;
                // Deregister before the reply goes out, so a `/stop` that sees
                // the reply never counts this unit.
                this.sessions.untrack(&key, id);
                if let Some(out) = reply
                    && !cancel.is_cancelled()
                {
                    this.bus.publish_outbound(out);
                }
                drop(guard);
            })
        });
    }

    /// Run the processor and build the routed reply, if any.
    async fn process(
        &self,
        msg: InboundMessage,
        session: SessionRef,
        cancel: CancellationToken,
    ) -> Option<OutboundMessage> {
        let key = session.key();
        debug!(session_key = %key, sender_id = %msg.sender_id, "processing message");

        let ctx = ProcessContext {
            session,
            cancel: cancel.clone(),
            subagents: Arc::clone(&self.subagents),
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(session_key = %key, "dispatch cancelled");
                return None;
            },
            result = self.processor.process(msg.clone(), ctx) => result,
        };

        let reply = match result {
            Ok(Some(out)) => out,
            Ok(None) => {
                debug!(session_key = %key, "processor produced no reply");
                return None;
            },
            Err(e) => {
                error!(session_key = %key, error = %e, "error processing message");
                OutboundMessage::reply_to(&msg, self.config.error_message.clone())
            },
        };
        route_reply(&msg, reply)
    }

    /// Cancel everything the session of `msg` has in flight and tell it so.
    pub async fn handle_stop(&self, msg: &InboundMessage) -> StopReport {
        let key = msg.session_key();
        let report = self.stop_session(&key).await;
        info!(
            session_key = %key,
            tasks = report.tasks,
            subagents = report.subagents,
            "stop requested"
        );
        self.bus
            .publish_outbound(OutboundMessage::reply_to(msg, report.notice()));
        report
    }

    /// Cancel the dispatch units and subagents of `session_key`.
    pub async fn stop_session(&self, session_key: &str) -> StopReport {
        let tasks = self.sessions.cancel_session(session_key).await;
        let subagents = self.subagents.cancel_by_session(session_key).await;
        StopReport { tasks, subagents }
    }
}

/// Readdress a reply to the inbound's explicit reply route, and drop replies
/// that would land on an internal channel.
fn route_reply(inbound: &InboundMessage, mut out: OutboundMessage) -> Option<OutboundMessage> {
    let to_origin = out.channel == inbound.channel && out.chat_id == inbound.chat_id;
    if to_origin && let Some((channel, chat_id)) = inbound.reply_route() {
        out.channel = channel.to_string();
        out.chat_id = chat_id.to_string();
    }
    if out.is_internal() {
        debug!(channel = %out.channel, chat_id = %out.chat_id, "reply has no route, dropped");
        return None;
    }
    Some(out)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        std::{sync::Mutex, time::Duration},
        switchyard_bus::{CRON_CHANNEL, meta},
    };

    /// Records start/end of every message and sleeps on demand.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageProcessor for Recorder {
        async fn process(
            &self,
            msg: InboundMessage,
            _ctx: ProcessContext,
        ) -> anyhow::Result<Option<OutboundMessage>> {
            self.log.lock().unwrap().push(format!("start-{}", msg.content));
            if let Some(ms) = msg.content.strip_prefix("sleep:") {
                tokio::time::sleep(Duration::from_millis(ms.parse()?)).await;
            }
            if msg.content == "fail" {
                anyhow::bail!("processor exploded");
            }
            if msg.content == "silent" {
                return Ok(None);
            }
            self.log.lock().unwrap().push(format!("end-{}", msg.content));
            Ok(Some(OutboundMessage::reply_to(&msg, msg.content.clone())))
        }
    }

    fn dispatcher(processor: Arc<dyn MessageProcessor>) -> (Arc<MessageBus>, Arc<Dispatcher>) {
        let bus = Arc::new(MessageBus::new());
        let subagents = SubagentManager::new(bus.inbound_sender());
        let dispatcher = Dispatcher::new(Arc::clone(&bus), processor, subagents);
        (bus, dispatcher)
    }

    async fn next_outbound(bus: &MessageBus) -> OutboundMessage {
        tokio::time::timeout(Duration::from_secs(2), bus.consume_outbound())
            .await
            .expect("timed out waiting for outbound")
            .unwrap()
    }

    async fn wait_idle(dispatcher: &Dispatcher, key: &str) {
        for _ in 0..200 {
            if dispatcher.sessions().active_count(key) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {key} still busy");
    }

    #[tokio::test]
    async fn reply_is_published() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c1", "hello"))
            .await;

        let out = next_outbound(&bus).await;
        assert_eq!((out.channel.as_str(), out.chat_id.as_str()), ("cli", "c1"));
        assert_eq!(out.content, "hello");
        wait_idle(&dispatcher, "cli:c1").await;
    }

    #[tokio::test]
    async fn same_session_is_serialized_in_arrival_order() {
        let recorder = Arc::new(Recorder::default());
        let (bus, dispatcher) = dispatcher(recorder.clone());
        for content in ["sleep:50", "b", "c"] {
            dispatcher
                .submit(InboundMessage::new("cli", "u", "c1", content))
                .await;
        }
        for _ in 0..3 {
            next_outbound(&bus).await;
        }

        assert_eq!(recorder.log(), vec![
            "start-sleep:50",
            "end-sleep:50",
            "start-b",
            "end-b",
            "start-c",
            "end-c",
        ]);
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        struct Barrier(tokio::sync::Barrier);

        #[async_trait]
        impl MessageProcessor for Barrier {
            async fn process(
                &self,
                msg: InboundMessage,
                _ctx: ProcessContext,
            ) -> anyhow::Result<Option<OutboundMessage>> {
                self.0.wait().await;
                Ok(Some(OutboundMessage::reply_to(&msg, "ok")))
            }
        }

        let (bus, dispatcher) = dispatcher(Arc::new(Barrier(tokio::sync::Barrier::new(2))));
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c1", "x"))
            .await;
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c2", "y"))
            .await;

        next_outbound(&bus).await;
        next_outbound(&bus).await;
    }

    #[tokio::test]
    async fn failure_publishes_error_message() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c1", "fail"))
            .await;
        assert_eq!(
            next_outbound(&bus).await.content,
            "Sorry, I encountered an error."
        );
    }

    #[tokio::test]
    async fn stop_after_reply_counts_nothing() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        for round in 0..20 {
            dispatcher
                .submit(InboundMessage::new("cli", "u", "c1", format!("m{round}")))
                .await;
            assert_eq!(next_outbound(&bus).await.content, format!("m{round}"));

            let report = dispatcher.stop_session("cli:c1").await;
            assert_eq!(report.tasks, 0, "round {round}");
        }
    }

    #[tokio::test]
    async fn stop_without_work_reports_nothing() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        let report = dispatcher
            .handle_stop(&InboundMessage::new("cli", "u", "c1", "/stop"))
            .await;

        assert_eq!(report, StopReport::default());
        assert_eq!(next_outbound(&bus).await.content, "No active task to stop.");
    }

    #[tokio::test]
    async fn stop_cancels_running_and_queued_units() {
        let recorder = Arc::new(Recorder::default());
        let (bus, dispatcher) = dispatcher(recorder.clone());
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c1", "sleep:60000"))
            .await;
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c1", "queued"))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = dispatcher
            .handle_stop(&InboundMessage::new("cli", "u", "c1", "/stop"))
            .await;
        assert_eq!(report.tasks, 2);
        assert_eq!(report.subagents, 0);
        assert_eq!(next_outbound(&bus).await.content, "Stopped 2 task(s).");
        assert_eq!(recorder.log(), vec!["start-sleep:60000"]);

        // The session is usable again afterwards.
        dispatcher
            .submit(InboundMessage::new("cli", "u", "c1", "again"))
            .await;
        assert_eq!(next_outbound(&bus).await.content, "again");
    }

    #[tokio::test]
    async fn stop_counts_subagents_separately() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        dispatcher
            .subagents()
            .spawn(SessionRef::new("cli", "c1"), "research", |token| async move {
                token.cancelled().await;
                Ok(String::new())
            });

        let report = dispatcher.stop_session("cli:c1").await;
        assert_eq!(report, StopReport {
            tasks: 0,
            subagents: 1
        });
        assert_eq!(dispatcher.subagents().running_count(), 0);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), bus.consume_outbound())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn stop_is_matched_loosely() {
        let (_bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        assert!(dispatcher.is_stop_command("  /STOP \n"));
        assert!(!dispatcher.is_stop_command("/stopped"));
    }

    #[tokio::test]
    async fn run_loop_handles_stop_inline() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        let shutdown = CancellationToken::new();
        let runner = {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(shutdown).await })
        };

        bus.publish_inbound(InboundMessage::new("cli", "u", "c1", "sleep:60000"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish_inbound(InboundMessage::new("cli", "u", "c1", "/stop"));
        assert_eq!(next_outbound(&bus).await.content, "Stopped 1 task(s).");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn delivered_job_reply_follows_route() {
        let (bus, dispatcher) = dispatcher(Arc::new(Recorder::default()));
        let msg = InboundMessage::new(CRON_CHANNEL, "cron", "job1", "remind")
            .with_meta(meta::REPLY_CHANNEL, "slack")
            .with_meta(meta::REPLY_CHAT_ID, "C9");
        dispatcher.submit(msg).await;

        let out = next_outbound(&bus).await;
        assert_eq!((out.channel.as_str(), out.chat_id.as_str()), ("slack", "C9"));
        assert_eq!(out.content, "remind");
    }

    #[tokio::test]
    async fn internal_message_without_route_stays_silent() {
        let recorder = Arc::new(Recorder::default());
        let (bus, dispatcher) = dispatcher(recorder.clone());
        dispatcher
            .submit(InboundMessage::new(CRON_CHANNEL, "cron", "job1", "tick"))
            .await;
        wait_idle(&dispatcher, "cron:job1").await;

        assert_eq!(recorder.log(), vec!["start-tick", "end-tick"]);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), bus.consume_outbound())
                .await
                .is_err()
        );
    }

    #[test]
    fn explicit_addresses_are_not_rewritten() {
        let inbound = InboundMessage::new(CRON_CHANNEL, "cron", "job1", "x")
            .with_meta(meta::REPLY_CHANNEL, "slack")
            .with_meta(meta::REPLY_CHAT_ID, "C9");
        let out = route_reply(&inbound, OutboundMessage::new("telegram", "42", "y")).unwrap();
        assert_eq!(out.channel, "telegram");
    }
}
