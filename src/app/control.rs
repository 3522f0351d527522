use crate::config::{ConfigHandle, ProxySettings, TunnelConfig};
use crate::error::{ConfigError, OAuthError, Result};
use crate::oauth::{
    AuthStatus, ManagementAuthority, OAuthManager, PollOutcome, SessionToken, SystemOpener,
    UrlOpener,
};
use crate::proxy::{ProviderHealth, ProxyStatus, ProxySupervisor};
use crate::status::{StatusBus, StatusEvent, StatusSubscription};
use crate::tunnel::{ConfigFileStore, TunnelRegistry, TunnelStatus, TunnelStore};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The command surface a UI drives.
///
/// Every call returns promptly with either the new state or a typed error;
/// long-running outcomes arrive on the status bus.
pub struct ControlPlane {
    config: ConfigHandle,
    bus: StatusBus,
    proxy: Arc<ProxySupervisor>,
    tunnels: TunnelRegistry,
    oauth: OAuthManager,
}

impl ControlPlane {
    /// Wire everything to the config file and the system browser.
    pub fn new(config: ConfigHandle) -> Self {
        let store = Arc::new(ConfigFileStore::new(config.clone()));
        Self::with_components(config, store, Arc::new(SystemOpener))
    }

    pub fn with_components(
        config: ConfigHandle,
        store: Arc<dyn TunnelStore>,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        let bus = StatusBus::default();
        let proxy = Arc::new(ProxySupervisor::new(config.clone(), bus.clone()));
        let tunnels = TunnelRegistry::new(config.clone(), store, bus.clone());
        let oauth = OAuthManager::new(
            Arc::new(ManagementAuthority::new(Arc::clone(&proxy))),
            opener,
            bus.clone(),
            &config.load().oauth,
        );
        Self {
            config,
            bus,
            proxy,
            tunnels,
            oauth,
        }
    }

    /// Restore persisted tunnels and start the engine if `auto_start` is set.
    /// An engine that fails to start is logged; tunnels still come up.
    pub async fn startup(&self) -> Result<Vec<TunnelStatus>> {
        let tunnels = self.tunnels.restore().await?;
        if self.config.load().proxy.auto_start
            && let Err(e) = self.proxy.start().await
        {
            tracing::warn!("proxy auto-start failed: {e}");
        }
        Ok(tunnels)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    // ── Proxy ────────────────────────────────────────────────────────────

    pub async fn start_proxy(&self) -> Result<ProxyStatus> {
        Ok(self.proxy.start().await?)
    }

    pub async fn stop_proxy(&self) -> Result<ProxyStatus> {
        Ok(self.proxy.stop().await?)
    }

    pub async fn restart_proxy(&self) -> Result<ProxyStatus> {
        Ok(self.proxy.restart().await?)
    }

    pub fn proxy_status(&self) -> ProxyStatus {
        self.proxy.status()
    }

    /// Change proxy settings and apply them to a running engine: a restart
    /// when the port or management key changed, otherwise a hot update.
    /// Returns whether the engine was restarted.
    pub async fn update_proxy_settings<F>(&self, mut mutate: F) -> Result<bool>
    where
        F: FnMut(&mut ProxySettings),
    {
        let before = self.config.load().proxy.clone();
        let after = self
            .config
            .update(|config| mutate(&mut config.proxy))
            .map_err(|e| ConfigError::Validation(format!("{e:#}")))?;
        if !self.proxy.is_running() {
            return Ok(false);
        }
        if before.requires_restart(&after.proxy) {
            self.proxy.restart().await?;
            return Ok(true);
        }
        if let Err(e) = self.proxy.management().sync_hot_settings(&after.proxy).await {
            tracing::warn!("hot settings update incomplete: {e}");
        }
        Ok(false)
    }

    // ── Tunnels ──────────────────────────────────────────────────────────

    pub async fn add_tunnel(&self, config: TunnelConfig) -> Result<TunnelStatus> {
        Ok(self.tunnels.add(config).await?)
    }

    pub async fn remove_tunnel(&self, id: &str) -> Result<()> {
        Ok(self.tunnels.remove(id).await?)
    }

    pub async fn toggle_tunnel(&self, id: &str, enabled: bool) -> Result<TunnelStatus> {
        Ok(self.tunnels.toggle(id, enabled).await?)
    }

    pub async fn list_tunnels(&self) -> Vec<TunnelStatus> {
        self.tunnels.list().await
    }

    pub async fn tunnel_configs(&self) -> Vec<TunnelConfig> {
        self.tunnels.configs().await
    }

    // ── OAuth ────────────────────────────────────────────────────────────

    pub async fn begin_oauth(&self, provider: &str) -> Result<SessionToken> {
        Ok(self.oauth.begin(provider).await?)
    }

    /// `true` once the account is linked, `false` while still pending.
    pub async fn poll_oauth(&self, token: &SessionToken) -> Result<bool> {
        match self.oauth.poll(token).await? {
            PollOutcome::Completed => Ok(true),
            PollOutcome::Pending { .. } => Ok(false),
            PollOutcome::TimedOut => Err(OAuthError::Timeout {
                attempts: self.config.load().oauth.max_attempts,
            }
            .into()),
        }
    }

    /// Poll at the configured interval until linked, timed out or cancelled.
    pub async fn wait_oauth(&self, token: &SessionToken, cancel: &CancellationToken) -> Result<()> {
        Ok(self
            .oauth
            .wait_for_completion(token, self.oauth.poll_interval(), cancel)
            .await?)
    }

    pub fn cancel_oauth(&self, token: &SessionToken) -> Result<()> {
        Ok(self.oauth.cancel(token)?)
    }

    pub fn import_vertex_credential(&self, path: &Path) -> Result<AuthStatus> {
        let auth_dir = self.config.load().proxy.resolved_auth_dir();
        crate::oauth::import_vertex_credential(path, &auth_dir)?;
        Ok(crate::oauth::scan_auth_dir(&auth_dir))
    }

    pub fn auth_status(&self) -> AuthStatus {
        crate::oauth::scan_auth_dir(&self.config.load().proxy.resolved_auth_dir())
    }

    /// Delete the provider's stored credentials.
    pub fn disconnect_provider(&self, provider: &str) -> Result<AuthStatus> {
        let auth_dir = self.config.load().proxy.resolved_auth_dir();
        Ok(crate::oauth::disconnect_provider(&auth_dir, provider)?)
    }

    /// Check the engine and rate every provider: healthy, degraded,
    /// offline or unconfigured.
    pub async fn check_provider_health(&self) -> ProviderHealth {
        let engine = self.proxy.check_health().await;
        ProviderHealth::assess(self.auth_status().providers(), engine)
    }

    // ── Status ───────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> StatusSubscription {
        self.bus.subscribe()
    }

    pub fn snapshot(&self) -> Vec<StatusEvent> {
        self.bus.snapshot()
    }

    /// Cancel OAuth sessions, disconnect tunnels and stop the engine.
    pub async fn shutdown(&self) {
        self.oauth.cancel_all();
        self.tunnels.shutdown().await;
        if self.proxy.is_running()
            && let Err(e) = self.proxy.stop().await
        {
            tracing::warn!("proxy stop during shutdown failed: {e}");
        }
        tracing::info!("control plane shut down");
    }
}
