//! # 数据模型
//!
//! 定义Bot编排系统的核心数据结构：Worker记录、状态记录、运行单元和事件结果。
//!
//! ## 核心模型
//!
//! ### WorkerRecord - Worker记录
//! 由外部应用持久化的Worker配置（凭据、声明类型、自由格式JSON配置），
//! 编排核心只回写生命周期相关字段（状态、错误、Webhook地址、单元名称）。
//!
//! ### StatusRecord - 状态记录
//! 共享状态存储中的跨进程权威状态，键布局：
//! - `worker:{identity}` → 哈希 {status, error, webhook_url, name, port, last_update}
//! - `worker_state:{identity}` → Worker上报统计信息的JSON
//!
//! ### UnitSpec / ProvisionedUnit / RuntimeInfo - 运行单元
//! 每个运行中的Worker对应一个隔离的运行单元，名称由凭据末尾8个字符决定，
//! 端口从固定基准端口向上分配。
//!
//! ### EventOutcome / DispatchOutcome - 事件结果
//! Worker对单个事件的结构化处理结论，以及分发器对调用方返回的结果。
//!
//! ## 状态流转
//!
//! ```text
//! stopped → starting → running → stopping → stopped
//!              ↓          ↓          ↓
//!            error ←──────┴──────────┘
//!              │
//!              └─→ starting（重新启动） / stopping（清理）
//! ```

pub mod event;
pub mod runtime;
pub mod status;
pub mod worker;

pub use event::*;
pub use runtime::*;
pub use status::*;
pub use worker::*;
