use super::provider::OAuthProvider;
use crate::error::OAuthError;
use crate::proxy::{AuthUrl, ProxySupervisor};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The party that issues authorization URLs and confirms completed flows.
pub trait AuthAuthority: Send + Sync {
    /// Whether flows can be started right now.
    fn is_ready(&self) -> bool;

    fn auth_url(
        &self,
        provider: OAuthProvider,
    ) -> Pin<Box<dyn Future<Output = Result<AuthUrl, OAuthError>> + Send + '_>>;

    /// `true` once credentials for `state` have been stored.
    fn is_authorized<'a>(
        &'a self,
        state: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, OAuthError>> + Send + 'a>>;
}

/// The running proxy engine's management API.
///
/// The client is rebuilt per request so a port or key change after a
/// restart is picked up.
pub struct ManagementAuthority {
    proxy: Arc<ProxySupervisor>,
}

impl ManagementAuthority {
    pub fn new(proxy: Arc<ProxySupervisor>) -> Self {
        Self { proxy }
    }
}

impl AuthAuthority for ManagementAuthority {
    fn is_ready(&self) -> bool {
        self.proxy.is_running()
    }

    fn auth_url(
        &self,
        provider: OAuthProvider,
    ) -> Pin<Box<dyn Future<Output = Result<AuthUrl, OAuthError>> + Send + '_>> {
        Box::pin(async move {
            self.proxy
                .management()
                .auth_url(provider.auth_endpoint())
                .await
                .map_err(|e| OAuthError::Authority(e.to_string()))
        })
    }

    fn is_authorized<'a>(
        &'a self,
        state: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, OAuthError>> + Send + 'a>> {
        Box::pin(async move {
            self.proxy
                .management()
                .auth_status(state)
                .await
                .map_err(|e| OAuthError::Authority(e.to_string()))
        })
    }
}
