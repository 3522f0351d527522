use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder in `engine_args` replaced with the generated engine config path.
pub const ENGINE_CONFIG_PLACEHOLDER: &str = "{config}";

/// Settings for the bundled proxy engine and how it is supervised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[serde(default = "default_engine_binary")]
    pub engine_binary: String,
    #[serde(default = "default_engine_args")]
    pub engine_args: Vec<String>,
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,
    #[serde(default = "default_api_keys")]
    pub api_keys: Vec<String>,
    #[serde(default = "default_management_key")]
    pub management_key: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub proxy_url: String,
    #[serde(default)]
    pub request_retry: u16,
    #[serde(default)]
    pub max_retry_interval: i32,
    #[serde(default = "default_true")]
    pub usage_stats_enabled: bool,
    #[serde(default = "default_true")]
    pub logging_to_file: bool,
    #[serde(default = "default_logs_max_total_size_mb")]
    pub logs_max_total_size_mb: u32,
    #[serde(default = "default_routing_strategy")]
    pub routing_strategy: String,
    #[serde(default = "default_true")]
    pub force_model_mappings: bool,
    #[serde(default)]
    pub quota_switch_project: bool,
    #[serde(default)]
    pub quota_switch_preview_model: bool,
    #[serde(default = "default_true")]
    pub disable_control_panel: bool,
    /// Per-provider model ids hidden from OAuth-linked accounts.
    #[serde(default)]
    pub oauth_excluded_models: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
}

fn default_port() -> u16 {
    8317
}

fn default_true() -> bool {
    true
}

fn default_engine_binary() -> String {
    "cliproxyapi".into()
}

fn default_engine_args() -> Vec<String> {
    vec!["--config".into(), ENGINE_CONFIG_PLACEHOLDER.into()]
}

fn default_auth_dir() -> String {
    "~/.cli-proxy-api".into()
}

fn default_api_keys() -> Vec<String> {
    vec!["proxypal-local".into()]
}

fn default_management_key() -> String {
    "proxypal-mgmt-key".into()
}

fn default_logs_max_total_size_mb() -> u32 {
    100
}

fn default_routing_strategy() -> String {
    "round-robin".into()
}

fn default_start_timeout_secs() -> u64 {
    15
}

fn default_restart_settle_ms() -> u64 {
    500
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            auto_start: true,
            engine_binary: default_engine_binary(),
            engine_args: default_engine_args(),
            auth_dir: default_auth_dir(),
            api_keys: default_api_keys(),
            management_key: default_management_key(),
            debug: false,
            proxy_url: String::new(),
            request_retry: 0,
            max_retry_interval: 0,
            usage_stats_enabled: true,
            logging_to_file: true,
            logs_max_total_size_mb: default_logs_max_total_size_mb(),
            routing_strategy: default_routing_strategy(),
            force_model_mappings: true,
            quota_switch_project: false,
            quota_switch_preview_model: false,
            disable_control_panel: true,
            oauth_excluded_models: BTreeMap::new(),
            start_timeout_secs: default_start_timeout_secs(),
            restart_settle_ms: default_restart_settle_ms(),
        }
    }
}

impl ProxySettings {
    /// Public endpoint advertised to local clients.
    pub fn endpoint(&self) -> String {
        endpoint_for_port(self.port)
    }

    /// Auth directory with `~` expanded.
    pub fn resolved_auth_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.auth_dir).into_owned())
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs.max(1))
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    /// Engine arguments with the config placeholder substituted.
    pub fn engine_args_for(&self, config_path: &std::path::Path) -> Vec<String> {
        let path = config_path.display().to_string();
        self.engine_args
            .iter()
            .map(|arg| arg.replace(ENGINE_CONFIG_PLACEHOLDER, &path))
            .collect()
    }

    /// Whether moving from `self` to `next` needs an engine restart.
    ///
    /// The engine cannot rebind its listener or rotate its management secret
    /// at runtime; everything pushed through the management API can change
    /// while it runs.
    pub fn requires_restart(&self, next: &Self) -> bool {
        self.port != next.port
            || self.management_key != next.management_key
            || self.engine_binary != next.engine_binary
            || self.engine_args != next.engine_args
            || self.auth_dir != next.auth_dir
            || self.api_keys != next.api_keys
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation("proxy.port must be non-zero".into()));
        }
        if self.engine_binary.trim().is_empty() {
            return Err(ConfigError::Validation(
                "proxy.engine_binary must not be empty".into(),
            ));
        }
        if self.management_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "proxy.management_key must not be empty".into(),
            ));
        }
        Ok(())
    }
}

pub fn endpoint_for_port(port: u16) -> String {
    format!("http://localhost:{port}")
}
