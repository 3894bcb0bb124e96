use std::collections::HashSet;

use async_trait::async_trait;
use botfleet_core::models::{EventOutcome, EventStatus, StatsMap, WorkerConfig};
use botfleet_core::{FleetError, FleetResult, WorkerRuntime};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::handlers::{CommandInfo, HandlerTable, IncomingMessage, Invocation};

pub const ADMIN_ONLY_REPLY: &str = "This command is only available to administrators.";

/// 具体Bot的行为定义
///
/// 实现者只描述命令和处理器，生命周期、管理员校验和统计由 [`BotWorker`] 负责。
pub trait Bot: 'static {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// 读取Bot自己的配置项，不能有外部副作用
    fn configure(&mut self, _config: &WorkerConfig) -> FleetResult<()> {
        Ok(())
    }

    fn register(table: &mut HandlerTable<Self>)
    where
        Self: Sized;
}

#[derive(Debug, Default, Clone, Copy)]
struct EventCounters {
    handled: u64,
    rejected: u64,
    ignored: u64,
    failed: u64,
}

/// 把 [`Bot`] 适配为 [`WorkerRuntime`]
pub struct BotWorker<B: Bot> {
    bot: B,
    table: HandlerTable<B>,
    commands: Vec<CommandInfo>,
    admin_ids: HashSet<i64>,
    initialized: bool,
    running: bool,
    counters: EventCounters,
    last_event_at: Option<DateTime<Utc>>,
}

impl<B: Bot> BotWorker<B> {
    pub fn new(bot: B) -> Self {
        Self {
            bot,
            table: HandlerTable::new(),
            commands: Vec::new(),
            admin_ids: HashSet::new(),
            initialized: false,
            running: false,
            counters: EventCounters::default(),
            last_event_at: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn is_admin(&self, user_id: Option<i64>) -> bool {
        user_id.is_some_and(|id| self.admin_ids.contains(&id))
    }

    fn record(&mut self, status: EventStatus) {
        match status {
            EventStatus::Handled => self.counters.handled += 1,
            EventStatus::Rejected => self.counters.rejected += 1,
            EventStatus::Ignored => self.counters.ignored += 1,
        }
    }
}

fn parse_admin_ids(config: &WorkerConfig) -> FleetResult<HashSet<i64>> {
    match config.get("admin_ids") {
        None | Some(Value::Null) => Ok(HashSet::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64().ok_or_else(|| {
                    FleetError::Configuration(format!("admin_ids 只能包含整数: {item}"))
                })
            })
            .collect(),
        Some(other) => Err(FleetError::Configuration(format!(
            "admin_ids 必须是整数数组: {other}"
        ))),
    }
}

#[async_trait(?Send)]
impl<B: Bot> WorkerRuntime for BotWorker<B> {
    fn name(&self) -> &str {
        self.bot.name()
    }

    fn initialize(&mut self, config: &WorkerConfig) -> FleetResult<()> {
        let admin_ids = parse_admin_ids(config)?;
        self.bot.configure(config)?;

        let mut table = HandlerTable::new();
        B::register(&mut table);
        self.commands = table.command_list();
        self.table = table;
        self.admin_ids = admin_ids;
        self.initialized = true;

        debug!(
            "Bot {} initialized with {} commands and {} handlers",
            self.bot.name(),
            self.table.command_count(),
            self.table.handler_count()
        );
        Ok(())
    }

    async fn start(&mut self) -> FleetResult<()> {
        if !self.initialized {
            return Err(FleetError::ContractViolation(format!(
                "{} 在 initialize 之前被 start",
                self.bot.name()
            )));
        }
        let published: Vec<&str> = self
            .commands
            .iter()
            .filter(|c| !c.admin_only)
            .map(|c| c.command)
            .collect();
        self.running = true;
        info!(
            "Bot {} started, published commands: {:?}",
            self.bot.name(),
            published
        );
        Ok(())
    }

    async fn stop(&mut self) -> FleetResult<()> {
        if self.running {
            info!("Bot {} stopped", self.bot.name());
        }
        self.running = false;
        Ok(())
    }

    async fn handle_event(&mut self, event: &Value) -> FleetResult<EventOutcome> {
        if !self.running {
            self.record(EventStatus::Rejected);
            return Ok(EventOutcome::rejected("worker is not running"));
        }
        self.last_event_at = Some(Utc::now());

        let Some(message) = IncomingMessage::from_event(event) else {
            self.record(EventStatus::Rejected);
            return Ok(EventOutcome::rejected("event carries no text message"));
        };

        let Some((entry, args)) = self.table.resolve(&message) else {
            self.record(EventStatus::Ignored);
            return Ok(EventOutcome::ignored());
        };

        if entry.meta.admin_only && !self.is_admin(message.sender_id) {
            warn!(
                "Bot {} rejected admin command from {:?}",
                self.bot.name(),
                message.sender_id
            );
            self.record(EventStatus::Rejected);
            return Ok(EventOutcome::rejected("admin only").with_reply(ADMIN_ONLY_REPLY));
        }

        let handler = entry.handler;
        let invocation = Invocation {
            message: &message,
            args,
            commands: &self.commands,
        };
        match handler(&mut self.bot, &invocation) {
            Ok(outcome) => {
                let status = outcome.status;
                self.record(status);
                Ok(outcome)
            }
            Err(e) => {
                self.counters.failed += 1;
                Err(FleetError::Processing(format!(
                    "{} handler failed: {e}",
                    self.bot.name()
                )))
            }
        }
    }

    async fn stats(&self) -> FleetResult<StatsMap> {
        let mut stats = StatsMap::new();
        stats.insert("name".to_string(), json!(self.bot.name()));
        stats.insert("description".to_string(), json!(self.bot.description()));
        stats.insert("running".to_string(), json!(self.running));
        stats.insert("commands".to_string(), json!(self.table.command_count()));
        stats.insert("handlers".to_string(), json!(self.table.handler_count()));
        stats.insert("command_list".to_string(), json!(self.commands));
        stats.insert("events_handled".to_string(), json!(self.counters.handled));
        stats.insert("events_rejected".to_string(), json!(self.counters.rejected));
        stats.insert("events_ignored".to_string(), json!(self.counters.ignored));
        stats.insert("events_failed".to_string(), json!(self.counters.failed));
        stats.insert(
            "last_event_at".to_string(),
            json!(self.last_event_at.map(|t| t.to_rfc3339())),
        );
        Ok(stats)
    }
}
