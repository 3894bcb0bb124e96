pub mod api_observability;
pub mod app_config;
pub mod dispatcher;
pub mod provisioner;
pub mod seed;
pub mod status_store;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use dispatcher::DispatcherConfig;
pub use provisioner::{DockerConfig, ProcessConfig, ProvisionerConfig, RuntimeBackendKind};
pub use seed::WorkerSeedConfig;
pub use status_store::{StatusStoreConfig, StatusStoreKind};
