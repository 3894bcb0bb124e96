//! 编排核心
//!
//! ```text
//! API / CLI
//!   │ start / stop / restart / reconcile        POST webhook
//!   ▼                                              ▼
//! LifecycleController ──provision──▶ RuntimeProvisioner     EventDispatcher
//!   │  (每个identity一把锁)                           │            │ (同步，阻塞调用线程)
//!   └──────────add/remove──▶ WorkerRegistry ◀──get───┘────────────┘
//!                                  │
//!                                  ▼
//!                      WorkerHost（每个Worker一个调度线程）
//! ```

pub mod context;
pub mod dispatcher;
pub mod lifecycle;
pub mod registry;

pub use context::FleetContext;
pub use dispatcher::EventDispatcher;
pub use lifecycle::{ControlAction, ControlReport, LifecycleController};
pub use registry::{HandleKind, WorkerHandle, WorkerRegistry};
