use crate::config::{ConfigHandle, TunnelConfig};
use crate::error::TunnelError;
use std::sync::Mutex;

/// Where tunnel definitions are persisted. Only the registry writes to it.
pub trait TunnelStore: Send + Sync {
    fn load(&self) -> Result<Vec<TunnelConfig>, TunnelError>;

    /// Replace the stored set with `tunnels`.
    fn save(&self, tunnels: &[TunnelConfig]) -> Result<(), TunnelError>;
}

#[derive(Default)]
pub struct InMemoryTunnelStore {
    tunnels: Mutex<Vec<TunnelConfig>>,
}

impl InMemoryTunnelStore {
    pub fn new(tunnels: Vec<TunnelConfig>) -> Self {
        Self {
            tunnels: Mutex::new(tunnels),
        }
    }
}

impl TunnelStore for InMemoryTunnelStore {
    fn load(&self) -> Result<Vec<TunnelConfig>, TunnelError> {
        Ok(self
            .tunnels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, tunnels: &[TunnelConfig]) -> Result<(), TunnelError> {
        *self
            .tunnels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = tunnels.to_vec();
        Ok(())
    }
}

/// `[[tunnels]]` entries of the TOML config file.
pub struct ConfigFileStore {
    config: ConfigHandle,
}

impl ConfigFileStore {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }
}

impl TunnelStore for ConfigFileStore {
    fn load(&self) -> Result<Vec<TunnelConfig>, TunnelError> {
        Ok(self.config.load().tunnels.clone())
    }

    fn save(&self, tunnels: &[TunnelConfig]) -> Result<(), TunnelError> {
        self.config
            .update(|config| config.tunnels = tunnels.to_vec())
            .map(|_| ())
            .map_err(|e| TunnelError::Store(format!("{e:#}")))
    }
}
