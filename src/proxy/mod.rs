//! Supervision of the local proxy engine (`cliproxyapi`).

pub mod engine_config;
mod health;
mod management;
mod supervisor;

pub use health::{EngineReachability, HealthState, HealthStatus, ProviderHealth, check_models};
pub use management::{AuthUrl, ManagementClient};
pub use supervisor::{ProxyState, ProxyStatus, ProxySupervisor};
