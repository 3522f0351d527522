mod backoff;
mod cloudflare;
mod connection;
mod custom;
mod factory;
mod registry;
mod ssh;
mod store;
mod traits;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use cloudflare::CloudflareTunnel;
pub use connection::{ConnectionSettings, TunnelConnection, TunnelState, TunnelStatus};
pub use custom::CustomTunnel;
pub use factory::create_client;
pub use registry::TunnelRegistry;
pub use ssh::SshTunnel;
pub use store::{ConfigFileStore, InMemoryTunnelStore, TunnelStore};
pub use traits::{Failure, FailureKind, LineSignal, TunnelClient};
