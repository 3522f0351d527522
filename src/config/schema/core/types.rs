use super::super::{ProxySettings, TunnelConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,
    /// Directory for generated engine files - computed from home, not serialized
    #[serde(skip)]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,

    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            config_path: state_dir.join("config.toml"),
            state_dir,
            proxy: ProxySettings::default(),
            reliability: ReliabilityConfig::default(),
            oauth: OAuthConfig::default(),
            tunnels: Vec::new(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".proxypal"),
        |dirs| dirs.home_dir().join(".proxypal"),
    )
}

impl Config {
    /// Where the generated engine YAML lives.
    pub fn engine_config_path(&self) -> PathBuf {
        self.state_dir.join("proxy-config.yaml")
    }

    pub fn tunnel(&self, id: &str) -> Option<&TunnelConfig> {
        self.tunnels.iter().find(|t| t.id == id)
    }
}

/// Retry and teardown timings for supervised processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    #[serde(default = "default_tunnel_initial_backoff_ms")]
    pub tunnel_initial_backoff_ms: u64,
    #[serde(default = "default_tunnel_max_backoff_ms")]
    pub tunnel_max_backoff_ms: u64,
    /// Consecutive reconnect attempts before a tunnel lands in `Error`.
    #[serde(default = "default_tunnel_max_reconnects")]
    pub tunnel_max_reconnects: u32,
    #[serde(default = "default_tunnel_ready_timeout_secs")]
    pub tunnel_ready_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub tunnel_backoff_jitter: bool,
    /// SIGTERM grace before a child is killed outright.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_tunnel_initial_backoff_ms() -> u64 {
    1_000
}

fn default_tunnel_max_backoff_ms() -> u64 {
    30_000
}

fn default_tunnel_max_reconnects() -> u32 {
    5
}

fn default_tunnel_ready_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            tunnel_initial_backoff_ms: default_tunnel_initial_backoff_ms(),
            tunnel_max_backoff_ms: default_tunnel_max_backoff_ms(),
            tunnel_max_reconnects: default_tunnel_max_reconnects(),
            tunnel_ready_timeout_secs: default_tunnel_ready_timeout_secs(),
            tunnel_backoff_jitter: true,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ReliabilityConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// How long a finished session stays in the status snapshot.
    #[serde(default = "default_session_linger_ms")]
    pub session_linger_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    120
}

fn default_session_linger_ms() -> u64 {
    60_000
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            session_linger_ms: default_session_linger_ms(),
        }
    }
}

impl OAuthConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_linger(&self) -> Duration {
        Duration::from_millis(self.session_linger_ms)
    }
}
