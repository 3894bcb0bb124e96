use botfleet_core::models::{EventOutcome, WorkerConfig};
use botfleet_core::FleetResult;

use crate::bot::Bot;
use crate::handlers::{any_text, HandlerTable, Invocation, DEFAULT_PRIORITY};

const DEFAULT_GREETING: &str = "👋 Hi! I'm an echo bot. Send me any text and I'll send it back.";

/// 原样回复收到的文本
#[derive(Debug, Default)]
pub struct EchoBot {
    greeting: Option<String>,
    prefix: String,
    muted: bool,
}

impl EchoBot {
    fn cmd_start(&mut self, _inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        let greeting = self.greeting.as_deref().unwrap_or(DEFAULT_GREETING);
        Ok(EventOutcome::reply(greeting))
    }

    fn cmd_help(&mut self, inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        let mut lines = vec!["Available commands:".to_string()];
        lines.extend(
            inv.commands
                .iter()
                .filter(|c| !c.admin_only)
                .map(|c| format!("/{} - {}", c.command, c.description)),
        );
        Ok(EventOutcome::reply(lines.join("\n")))
    }

    fn cmd_mute(&mut self, _inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        self.muted = true;
        Ok(EventOutcome::reply("🔇 Echo muted"))
    }

    fn cmd_unmute(&mut self, _inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        self.muted = false;
        Ok(EventOutcome::reply("🔊 Echo unmuted"))
    }

    fn echo(&mut self, inv: &Invocation<'_>) -> FleetResult<EventOutcome> {
        if self.muted {
            return Ok(EventOutcome::ignored());
        }
        Ok(EventOutcome::reply(format!("{}{}", self.prefix, inv.message.text)))
    }
}

impl Bot for EchoBot {
    fn name(&self) -> &'static str {
        "EchoBot"
    }

    fn description(&self) -> &'static str {
        "Echoes every text message back to the sender"
    }

    fn configure(&mut self, config: &WorkerConfig) -> FleetResult<()> {
        self.greeting = config
            .get("greeting")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        self.prefix = config
            .get("prefix")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(())
    }

    fn register(table: &mut HandlerTable<Self>) {
        table
            .command("start", "Start the bot", Self::cmd_start)
            .command("help", "Show available commands", Self::cmd_help)
            .admin_command("mute", "Stop echoing messages", Self::cmd_mute)
            .admin_command("unmute", "Resume echoing messages", Self::cmd_unmute)
            .text(any_text, DEFAULT_PRIORITY, Self::echo);
    }
}
