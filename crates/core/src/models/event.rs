use serde::{Deserialize, Serialize};

/// Worker上报的统计信息
pub type StatsMap = serde_json::Map<String, serde_json::Value>;

/// 单个事件在Worker内部的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// 事件被某个处理器处理
    Handled,
    /// 输入不合法或被拒绝（结构化结果，不是错误）
    Rejected,
    /// 没有匹配的处理器
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventOutcome {
    pub fn handled(replies: Vec<String>) -> Self {
        Self {
            status: EventStatus::Handled,
            replies,
            reason: None,
        }
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self::handled(vec![text.into()])
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Rejected,
            replies: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    /// 附加一条回复（被拒绝的输入也可以带提示信息）
    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.replies.push(text.into());
        self
    }

    pub fn ignored() -> Self {
        Self {
            status: EventStatus::Ignored,
            replies: Vec::new(),
            reason: None,
        }
    }
}

/// 事件分发结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Delivered(EventOutcome),
    UnknownWorker,
    WorkerUnavailable { reason: String },
    ProcessingError { message: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered(_) => "delivered",
            DispatchOutcome::UnknownWorker => "unknown_worker",
            DispatchOutcome::WorkerUnavailable { .. } => "worker_unavailable",
            DispatchOutcome::ProcessingError { .. } => "processing_error",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}
