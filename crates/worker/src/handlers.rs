//! 命令与消息处理器表
//!
//! Bot在 `initialize` 时把命令和文本处理器注册到 [`HandlerTable`]，
//! 事件到达时按以下顺序解析：
//!
//! 1. 以 `/` 开头的文本按命令名精确匹配，未注册的命令被忽略；
//! 2. 其他文本按处理器优先级（数值越小越优先，同优先级按注册顺序）
//!    找到第一个匹配的文本处理器。

use botfleet_core::models::EventOutcome;
use botfleet_core::FleetResult;
use serde_json::Value;

/// 从事件中提取的消息
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub text: String,
    pub sender_id: Option<i64>,
    pub chat_id: Option<i64>,
}

impl IncomingMessage {
    /// 支持平台更新格式（`{"message": {"text", "from": {"id"}, "chat": {"id"}}}`）
    /// 以及扁平格式（`{"text", "from_id", "chat_id"}`）
    pub fn from_event(event: &Value) -> Option<Self> {
        let message = event
            .get("message")
            .or_else(|| event.get("edited_message"))
            .unwrap_or(event);

        let text = message.get("text")?.as_str()?.to_string();
        let sender_id = message
            .pointer("/from/id")
            .or_else(|| message.get("from_id"))
            .and_then(Value::as_i64);
        let chat_id = message
            .pointer("/chat/id")
            .or_else(|| message.get("chat_id"))
            .and_then(Value::as_i64);

        Some(Self {
            text,
            sender_id,
            chat_id,
        })
    }

    /// 解析命令名和参数，`/range@numbers_bot 1 10` → (`range`, [`1`, `10`])
    pub fn command(&self) -> Option<(&str, Vec<&str>)> {
        let rest = self.text.trim().strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some((name, parts.collect()))
    }
}

/// 一次处理器调用的上下文
#[derive(Debug)]
pub struct Invocation<'a> {
    pub message: &'a IncomingMessage,
    pub args: Vec<&'a str>,
    /// 当前Worker注册的全部命令
    pub commands: &'a [CommandInfo],
}

pub type Handler<S> = fn(&mut S, &Invocation<'_>) -> FleetResult<EventOutcome>;

pub type TextMatcher = fn(&str) -> bool;

pub enum Trigger {
    Command(&'static str),
    Text(TextMatcher),
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Command(name) => write!(f, "Command(/{name})"),
            Trigger::Text(_) => write!(f, "Text"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerMeta {
    pub description: &'static str,
    pub admin_only: bool,
    pub priority: i32,
}

pub const DEFAULT_PRIORITY: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommandInfo {
    pub command: &'static str,
    pub description: &'static str,
    pub admin_only: bool,
}

pub struct HandlerEntry<S> {
    pub trigger: Trigger,
    pub meta: HandlerMeta,
    pub handler: Handler<S>,
}

pub struct HandlerTable<S> {
    commands: Vec<HandlerEntry<S>>,
    texts: Vec<HandlerEntry<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> HandlerTable<S> {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            texts: Vec::new(),
        }
    }

    fn push_command(&mut self, name: &'static str, meta: HandlerMeta, handler: Handler<S>) {
        // 重复注册时后者覆盖前者
        self.commands
            .retain(|entry| !matches!(entry.trigger, Trigger::Command(existing) if existing == name));
        self.commands.push(HandlerEntry {
            trigger: Trigger::Command(name),
            meta,
            handler,
        });
    }

    pub fn command(
        &mut self,
        name: &'static str,
        description: &'static str,
        handler: Handler<S>,
    ) -> &mut Self {
        let meta = HandlerMeta {
            description,
            admin_only: false,
            priority: DEFAULT_PRIORITY,
        };
        self.push_command(name, meta, handler);
        self
    }

    /// 仅允许配置项 `admin_ids` 中的用户调用
    pub fn admin_command(
        &mut self,
        name: &'static str,
        description: &'static str,
        handler: Handler<S>,
    ) -> &mut Self {
        let meta = HandlerMeta {
            description,
            admin_only: true,
            priority: DEFAULT_PRIORITY,
        };
        self.push_command(name, meta, handler);
        self
    }

    pub fn text(&mut self, matcher: TextMatcher, priority: i32, handler: Handler<S>) -> &mut Self {
        let entry = HandlerEntry {
            trigger: Trigger::Text(matcher),
            meta: HandlerMeta {
                description: "",
                admin_only: false,
                priority,
            },
            handler,
        };
        // 稳定插入：同优先级保持注册顺序
        let position = self
            .texts
            .iter()
            .position(|existing| existing.meta.priority > priority)
            .unwrap_or(self.texts.len());
        self.texts.insert(position, entry);
        self
    }

    pub fn resolve<'m>(&self, message: &'m IncomingMessage) -> Option<(&HandlerEntry<S>, Vec<&'m str>)> {
        if let Some((name, args)) = message.command() {
            return self
                .commands
                .iter()
                .find(|entry| matches!(entry.trigger, Trigger::Command(cmd) if cmd == name))
                .map(|entry| (entry, args));
        }

        self.texts
            .iter()
            .find(|entry| match entry.trigger {
                Trigger::Text(matcher) => matcher(&message.text),
                Trigger::Command(_) => false,
            })
            .map(|entry| (entry, Vec::new()))
    }

    pub fn command_list(&self) -> Vec<CommandInfo> {
        self.commands
            .iter()
            .filter_map(|entry| match entry.trigger {
                Trigger::Command(command) => Some(CommandInfo {
                    command,
                    description: entry.meta.description,
                    admin_only: entry.meta.admin_only,
                }),
                Trigger::Text(_) => None,
            })
            .collect()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn handler_count(&self) -> usize {
        self.texts.len()
    }
}

/// 匹配任意非命令文本
pub fn any_text(text: &str) -> bool {
    !text.trim_start().starts_with('/')
}
