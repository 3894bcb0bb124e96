pub mod record_repository;
pub mod status_store;
pub mod worker_runtime;

pub use record_repository::*;
pub use status_store::*;
pub use worker_runtime::*;
