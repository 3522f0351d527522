mod core;
mod proxy;
mod tunnel;

pub use core::{Config, OAuthConfig, ReliabilityConfig};
pub use proxy::{ENGINE_CONFIG_PLACEHOLDER, ProxySettings, endpoint_for_port};
pub use tunnel::{TunnelConfig, TunnelTarget};
