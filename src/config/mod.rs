pub mod hot_reload;
pub mod schema;

pub use hot_reload::ConfigHandle;
pub use schema::{
    Config, ENGINE_CONFIG_PLACEHOLDER, OAuthConfig, ProxySettings, ReliabilityConfig,
    TunnelConfig, TunnelTarget, endpoint_for_port,
};
