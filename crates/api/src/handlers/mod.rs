pub mod health;
pub mod metrics;
pub mod units;
pub mod webhook;
pub mod workers;
