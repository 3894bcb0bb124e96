//! # botfleet-infrastructure
//!
//! 状态存储、Worker记录仓储和运行单元管理器的具体实现。

pub mod provisioner;
pub mod records;
pub mod status_store;

pub use provisioner::{create_backend, RuntimeProvisioner, UnitBackend};
pub use records::InMemoryWorkerRecordRepository;
pub use status_store::{InMemoryStatusStore, RedisStatusStore, StatusStoreFactory};
