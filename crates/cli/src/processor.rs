//! Built-in reply producer: slash commands drive the scheduling tools,
//! anything else is echoed back.

use std::time::Duration;

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    serde_json::Value,
    switchyard_bus::{InboundMessage, OutboundMessage},
    switchyard_dispatch::{MessageProcessor, ProcessContext},
    switchyard_tools::{ToolContext, ToolRegistry},
    tracing::debug,
};

const LABEL_MAX_CHARS: usize = 30;

pub struct CommandProcessor {
    tools: ToolRegistry,
    echo_delay: Duration,
}

impl CommandProcessor {
    pub fn new(tools: ToolRegistry, echo_delay: Duration) -> Self {
        Self { tools, echo_delay }
    }

    /// Tool calls made from a routed message act on the session it routes to.
    fn tool_context(msg: &InboundMessage) -> ToolContext {
        match msg.reply_route() {
            Some((channel, chat_id)) => ToolContext::new(channel, chat_id),
            None => ToolContext::new(&msg.channel, &msg.chat_id),
        }
    }

    async fn call_tool(&self, name: &str, args: &str, msg: &InboundMessage) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!("Error: unknown tool '{name}'");
        };
        let params: Value = match serde_json::from_str(args) {
            Ok(params) => params,
            Err(e) => return format!("Error: arguments must be a JSON object: {e}"),
        };
        match tool.execute(params, &Self::tool_context(msg)).await {
            Ok(out) => out,
            Err(e) => format!("Error: {e:#}"),
        }
    }

    fn help(&self) -> String {
        let mut out = String::from(
            "Commands:\n\
             /stop - cancel everything running in this chat\n\
             /spawn <secs> <text> - run a background task that reports back\n\
             /help - this message\n\
             Tools (call with /<name> <json>):",
        );
        for schema in self.tools.list_schemas() {
            let name = schema["name"].as_str().unwrap_or_default();
            let description = schema["description"].as_str().unwrap_or_default();
            out.push_str(&format!("\n/{name} - {description}"));
        }
        out
    }

    fn spawn(&self, args: &str, ctx: &ProcessContext) -> anyhow::Result<String> {
        let (secs, text) = args.split_once(' ').unwrap_or((args, ""));
        let secs: u64 = secs
            .parse()
            .with_context(|| format!("invalid duration '{secs}', usage: /spawn <secs> <text>"))?;
        let text = text.trim().to_string();
        if text.is_empty() {
            bail!("usage: /spawn <secs> <text>");
        }

        let label: String = text.chars().take(LABEL_MAX_CHARS).collect();
        let id = ctx
            .subagents
            .spawn(ctx.session.clone(), label.clone(), move |_cancel| async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                Ok(text)
            });
        Ok(format!("Started '{label}' (id: {id})"))
    }

    /// Echo after the configured delay. `None` when stopped first.
    async fn echo(&self, content: &str, ctx: &ProcessContext) -> Option<String> {
        if !self.echo_delay.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.echo_delay) => {},
            }
        }
        Some(content.to_string())
    }
}

#[async_trait]
impl MessageProcessor for CommandProcessor {
    async fn process(
        &self,
        msg: InboundMessage,
        ctx: ProcessContext,
    ) -> anyhow::Result<Option<OutboundMessage>> {
        // Scheduled payloads and subagent results are relayed as they are.
        if msg.is_internal() {
            return Ok(Some(OutboundMessage::reply_to(&msg, msg.content.clone())));
        }

        let content = msg.content.trim();
        let reply = match content.split_once(' ').unwrap_or((content, "")) {
            ("/help", _) => self.help(),
            ("/spawn", args) => self.spawn(args.trim(), &ctx)?,
            (command, args) => match command.strip_prefix('/').filter(|n| !n.is_empty()) {
                Some(name) => {
                    debug!(tool = name, session_key = %ctx.session_key(), "tool command");
                    self.call_tool(name, args.trim(), &msg).await
                },
                None => match self.echo(content, &ctx).await {
                    Some(reply) => reply,
                    None => return Ok(None),
                },
            },
        };
        Ok(Some(OutboundMessage::reply_to(&msg, reply)))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::Arc,
        switchyard_bus::{MessageBus, SYSTEM_CHANNEL, meta},
        switchyard_cron::{CronService, InMemoryStore},
        switchyard_dispatch::{SessionRef, SubagentManager},
        switchyard_tools::CronTool,
        tokio_util::sync::CancellationToken,
    };

    struct Fixture {
        bus: Arc<MessageBus>,
        cron: Arc<CronService>,
        processor: CommandProcessor,
        subagents: Arc<SubagentManager>,
    }

    fn fixture(echo_delay: Duration) -> Fixture {
        let bus = Arc::new(MessageBus::new());
        let cron = CronService::new(Arc::new(InMemoryStore::new()), bus.clone());
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CronTool::new(Arc::clone(&cron))));
        Fixture {
            subagents: SubagentManager::new(bus.inbound_sender()),
            bus,
            cron,
            processor: CommandProcessor::new(tools, echo_delay),
        }
    }

    impl Fixture {
        fn ctx(&self, msg: &InboundMessage) -> ProcessContext {
            ProcessContext {
                session: SessionRef::of(msg),
                cancel: CancellationToken::new(),
                subagents: Arc::clone(&self.subagents),
            }
        }

        async fn reply(&self, content: &str) -> Option<OutboundMessage> {
            let msg = InboundMessage::new("stdio", "user", "direct", content);
            let ctx = self.ctx(&msg);
            self.processor.process(msg, ctx).await.unwrap()
        }
    }

    #[tokio::test]
    async fn plain_text_is_echoed() {
        let f = fixture(Duration::ZERO);
        let out = f.reply("  hello  ").await.unwrap();
        assert_eq!(out.channel, "stdio");
        assert_eq!(out.chat_id, "direct");
        assert_eq!(out.content, "hello");
    }

    #[tokio::test]
    async fn cancelled_echo_says_nothing() {
        let f = fixture(Duration::from_secs(30));
        let msg = InboundMessage::new("stdio", "user", "direct", "slow");
        let ctx = f.ctx(&msg);
        ctx.cancel.cancel();
        assert!(f.processor.process(msg, ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cron_command_schedules_for_this_chat() {
        let f = fixture(Duration::ZERO);
        let out = f
            .reply(r#"/cron {"action":"add","message":"stretch","every":"30m"}"#)
            .await
            .unwrap();
        assert!(out.content.starts_with("Created job 'stretch'"), "{}", out.content);

        let jobs = f.cron.list(true).await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].payload.deliver);
        assert_eq!(jobs[0].payload.channel.as_deref(), Some("stdio"));
        assert_eq!(jobs[0].payload.to.as_deref(), Some("direct"));
    }

    #[tokio::test]
    async fn tool_failures_become_replies() {
        let f = fixture(Duration::ZERO);
        let bad_json = f.reply("/cron {not json").await.unwrap();
        assert!(bad_json.content.starts_with("Error: arguments must be a JSON object"));

        let unknown = f.reply(r#"/weather {}"#).await.unwrap();
        assert_eq!(unknown.content, "Error: unknown tool 'weather'");

        let invalid = f.reply(r#"/cron {"action":"remove"}"#).await.unwrap();
        assert!(invalid.content.starts_with("Error: invalid cron arguments"));
    }

    #[tokio::test]
    async fn help_lists_registered_tools() {
        let f = fixture(Duration::ZERO);
        let out = f.reply("/help").await.unwrap();
        assert!(out.content.contains("/spawn <secs> <text>"));
        assert!(out.content.contains("\n/cron - "));
    }

    #[tokio::test]
    async fn spawn_reports_back_through_the_bus() {
        let f = fixture(Duration::ZERO);
        let out = f.reply("/spawn 0 done thinking").await.unwrap();
        assert!(out.content.starts_with("Started 'done thinking'"));

        let announced = tokio::time::timeout(Duration::from_secs(1), f.bus.consume_inbound())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(announced.channel, SYSTEM_CHANNEL);
        assert_eq!(announced.reply_route(), Some(("stdio", "direct")));
        assert!(announced.content.ends_with("done thinking"));

        let ctx = f.ctx(&announced);
        let relayed = f.processor.process(announced, ctx).await.unwrap().unwrap();
        assert_eq!(relayed.content, "[Subagent 'done thinking' completed]\n\ndone thinking");
    }

    #[tokio::test]
    async fn spawn_rejects_bad_arguments() {
        let f = fixture(Duration::ZERO);
        let msg = InboundMessage::new("stdio", "user", "direct", "/spawn soon hi");
        let ctx = f.ctx(&msg);
        let err = f.processor.process(msg, ctx).await.unwrap_err();
        assert!(err.to_string().contains("invalid duration 'soon'"));
    }

    #[test]
    fn routed_messages_act_on_their_route() {
        let msg = InboundMessage::new(SYSTEM_CHANNEL, "subagent", "stdio:direct", "x")
            .with_meta(meta::REPLY_CHANNEL, "stdio")
            .with_meta(meta::REPLY_CHAT_ID, "direct");
        assert_eq!(
            CommandProcessor::tool_context(&msg),
            ToolContext::new("stdio", "direct")
        );
    }
}
