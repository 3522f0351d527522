use crate::config::ProxySettings;
use crate::error::ProxyError;
use serde::Serialize;
use std::path::Path;

/// YAML document the engine reads at launch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct EngineConfig<'a> {
    port: u16,
    auth_dir: String,
    api_keys: &'a [String],
    debug: bool,
    usage_statistics_enabled: bool,
    logging_to_file: bool,
    request_retry: u16,
    #[serde(skip_serializing_if = "str::is_empty")]
    proxy_url: &'a str,
    quota_exceeded: QuotaExceeded,
    routing: Routing<'a>,
    remote_management: RemoteManagement<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct QuotaExceeded {
    switch_project: bool,
    switch_preview_model: bool,
}

#[derive(Debug, Serialize)]
struct Routing<'a> {
    strategy: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct RemoteManagement<'a> {
    allow_remote: bool,
    secret_key: &'a str,
    disable_control_panel: bool,
}

pub fn render(settings: &ProxySettings) -> Result<String, ProxyError> {
    let doc = EngineConfig {
        port: settings.port,
        auth_dir: settings.resolved_auth_dir().display().to_string(),
        api_keys: &settings.api_keys,
        debug: settings.debug,
        usage_statistics_enabled: settings.usage_stats_enabled,
        logging_to_file: settings.logging_to_file,
        request_retry: settings.request_retry,
        proxy_url: settings.proxy_url.trim(),
        quota_exceeded: QuotaExceeded {
            switch_project: settings.quota_switch_project,
            switch_preview_model: settings.quota_switch_preview_model,
        },
        routing: Routing {
            strategy: &settings.routing_strategy,
        },
        remote_management: RemoteManagement {
            allow_remote: false,
            secret_key: &settings.management_key,
            disable_control_panel: settings.disable_control_panel,
        },
    };
    let body = serde_yaml::to_string(&doc).map_err(|e| ProxyError::EngineConfig(e.to_string()))?;
    Ok(format!("# Generated by ProxyPal. Edits are overwritten on start.\n{body}"))
}

/// Render and write atomically (temp file + rename).
pub fn write(path: &Path, settings: &ProxySettings) -> Result<(), ProxyError> {
    let contents = render(settings)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ProxyError::EngineConfig(format!("create {}: {e}", parent.display()))
        })?;
    }
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, contents)
        .map_err(|e| ProxyError::EngineConfig(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| ProxyError::EngineConfig(format!("rename to {}: {e}", path.display())))?;
    Ok(())
}
