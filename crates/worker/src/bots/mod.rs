//! # 内置Bot
//!
//! Worker类型是一个封闭集合，构造表在编译期确定：
//!
//! | WorkerType | 实现 | 说明 |
//! |------------|------|------|
//! | `echo`     | [`EchoBot`]    | 原样回复文本 |
//! | `numbers`  | [`NumbersBot`] | 随机数与数字分析 |
//!
//! 新增类型需要同时扩展 [`WorkerType`] 和 [`instantiate`]。

pub mod echo;
pub mod numbers;

pub use echo::EchoBot;
pub use numbers::NumbersBot;

use botfleet_core::models::WorkerType;
use botfleet_core::WorkerRuntime;

use crate::bot::BotWorker;

/// 根据声明的Worker类型构造一个未初始化的实例
pub fn instantiate(worker_type: WorkerType) -> Box<dyn WorkerRuntime> {
    match worker_type {
        WorkerType::Echo => Box::new(BotWorker::new(EchoBot::default())),
        WorkerType::Numbers => Box::new(BotWorker::new(NumbersBot::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::ADMIN_ONLY_REPLY;
    use botfleet_core::models::{EventStatus, WorkerConfig};
    use botfleet_core::FleetError;
    use serde_json::json;
    use tracing_test::traced_test;

    async fn running(worker_type: WorkerType, config: serde_json::Value) -> Box<dyn WorkerRuntime> {
        let mut worker = instantiate(worker_type);
        let config: WorkerConfig = serde_json::from_value(config).unwrap();
        worker.initialize(&config).unwrap();
        worker.start().await.unwrap();
        worker
    }

    fn update(text: &str, from: i64) -> serde_json::Value {
        json!({"update_id": 1, "message": {"text": text, "from": {"id": from}, "chat": {"id": from}}})
    }

    #[tokio::test]
    async fn test_echo_replies_with_text() {
        let mut worker = running(WorkerType::Echo, json!({"prefix": "> "})).await;
        let outcome = worker.handle_event(&json!({"text": "hi"})).await.unwrap();
        assert_eq!(outcome.status, EventStatus::Handled);
        assert_eq!(outcome.replies, vec!["> hi".to_string()]);

        let help = worker.handle_event(&update("/help", 1)).await.unwrap();
        assert!(help.replies[0].contains("/start - Start the bot"));

        let unknown = worker.handle_event(&update("/nope", 1)).await.unwrap();
        assert_eq!(unknown.status, EventStatus::Ignored);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_admin_commands_require_admin_id() {
        let mut worker = running(WorkerType::Echo, json!({"admin_ids": [42]})).await;

        let denied = worker.handle_event(&update("/mute", 7)).await.unwrap();
        assert_eq!(denied.status, EventStatus::Rejected);
        assert_eq!(denied.replies, vec![ADMIN_ONLY_REPLY.to_string()]);
        assert!(logs_contain("rejected admin command"));

        let muted = worker.handle_event(&update("/mute", 42)).await.unwrap();
        assert_eq!(muted.status, EventStatus::Handled);
        let silent = worker.handle_event(&update("hello", 7)).await.unwrap();
        assert_eq!(silent.status, EventStatus::Ignored);

        // 未携带发送者的事件不能执行管理员命令
        let anonymous = worker.handle_event(&json!({"text": "/unmute"})).await.unwrap();
        assert_eq!(anonymous.status, EventStatus::Rejected);

        let help = worker.handle_event(&update("/help", 7)).await.unwrap();
        assert!(!help.replies[0].contains("/mute"));
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected_not_error() {
        let mut worker = running(WorkerType::Echo, json!({})).await;
        let outcome = worker.handle_event(&json!({"photo": []})).await.unwrap();
        assert_eq!(outcome.status, EventStatus::Rejected);

        let stats = worker.stats().await.unwrap();
        assert_eq!(stats["events_rejected"], json!(1));
    }

    #[tokio::test]
    async fn test_numbers_commands() {
        let mut worker = running(WorkerType::Numbers, json!({"random_max": 1})).await;

        let random = worker.handle_event(&update("/random", 5)).await.unwrap();
        assert_eq!(random.replies, vec!["🎲 Your random number is: 1".to_string()]);

        let range = worker.handle_event(&update("/range 3 4", 5)).await.unwrap();
        assert_eq!(range.status, EventStatus::Handled);
        assert!(range.replies[0].starts_with("🎯 Your random number between 3 and 4 is: "));

        let bad = worker.handle_event(&update("/range 9 1", 5)).await.unwrap();
        assert_eq!(bad.status, EventStatus::Rejected);
        assert!(bad.replies[0].contains("Example: /range 1 10"));

        let analysis = worker.handle_event(&update("7", 5)).await.unwrap();
        assert!(analysis.replies[0].contains("• Odd number"));

        let text = worker.handle_event(&update("seven", 5)).await.unwrap();
        assert_eq!(text.status, EventStatus::Rejected);
    }

    #[tokio::test]
    async fn test_not_running_worker_rejects() {
        let mut worker = running(WorkerType::Echo, json!({})).await;
        worker.stop().await.unwrap();
        let outcome = worker.handle_event(&json!({"text": "hi"})).await.unwrap();
        assert_eq!(outcome.status, EventStatus::Rejected);

        // stop 之后可以重新 start
        worker.start().await.unwrap();
        let outcome = worker.handle_event(&json!({"text": "hi"})).await.unwrap();
        assert_eq!(outcome.status, EventStatus::Handled);
    }

    #[tokio::test]
    async fn test_start_before_initialize_is_contract_violation() {
        let mut worker = instantiate(WorkerType::Numbers);
        let result = worker.start().await;
        assert!(matches!(result, Err(FleetError::ContractViolation(_))));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_initialize() {
        let mut worker = instantiate(WorkerType::Numbers);
        let config: WorkerConfig = serde_json::from_value(json!({"admin_ids": "all"})).unwrap();
        assert!(matches!(
            worker.initialize(&config),
            Err(FleetError::Configuration(_))
        ));

        let config: WorkerConfig = serde_json::from_value(json!({"random_max": 0})).unwrap();
        assert!(worker.initialize(&config).is_err());
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let mut worker = running(WorkerType::Numbers, json!({})).await;
        worker.handle_event(&update("/start", 1)).await.unwrap();

        let stats = worker.stats().await.unwrap();
        assert_eq!(stats["name"], json!("NumbersBot"));
        assert_eq!(stats["commands"], json!(3));
        assert_eq!(stats["handlers"], json!(2));
        assert_eq!(stats["events_handled"], json!(1));
        assert!(stats["last_event_at"].is_string());
    }
}
