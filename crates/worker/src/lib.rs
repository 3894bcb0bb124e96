//! # botfleet-worker
//!
//! Worker运行时：内置Bot实现、命令处理器表、把Worker绑定到专属线程的宿主，
//! 以及转发到独立运行单元的代理。

pub mod bot;
pub mod bots;
pub mod handlers;
pub mod host;
pub mod proxy;

pub use bot::{Bot, BotWorker};
pub use bots::instantiate;
pub use handlers::{HandlerTable, IncomingMessage, Invocation};
pub use host::WorkerHost;
pub use proxy::ProxyWorker;
