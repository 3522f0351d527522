use super::connection::{ConnectionSettings, TunnelConnection, TunnelStatus};
use super::factory::create_client;
use super::store::TunnelStore;
use crate::config::{ConfigHandle, TunnelConfig};
use crate::error::TunnelError;
use crate::status::{EntityKind, StatusBus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct RegistryInner {
    configs: BTreeMap<String, TunnelConfig>,
    connections: HashMap<String, TunnelConnection>,
}

impl RegistryInner {
    fn persisted(&self) -> Vec<TunnelConfig> {
        self.configs.values().cloned().collect()
    }
}

/// Single source of truth for tunnels: definitions plus live connections.
///
/// Every mutation holds one async lock, so operations on the registry are
/// applied in order. Definitions are written through the [`TunnelStore`]
/// after each change.
pub struct TunnelRegistry {
    inner: Mutex<RegistryInner>,
    store: Arc<dyn TunnelStore>,
    config: ConfigHandle,
    bus: StatusBus,
}

impl TunnelRegistry {
    pub fn new(config: ConfigHandle, store: Arc<dyn TunnelStore>, bus: StatusBus) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            store,
            config,
            bus,
        }
    }

    /// Load stored tunnels and reconnect the ones that were enabled.
    pub async fn restore(&self) -> Result<Vec<TunnelStatus>, TunnelError> {
        let stored = self.store.load()?;
        let mut inner = self.inner.lock().await;
        for config in stored {
            if inner.configs.contains_key(&config.id) {
                tracing::warn!(tunnel = %config.id, "duplicate stored tunnel ignored");
                continue;
            }
            let mut connection = TunnelConnection::new(&config.id, self.bus.clone());
            if config.enabled {
                match create_client(&config) {
                    Ok(client) => {
                        connection.enable(client, self.connection_settings(&config));
                    }
                    Err(e) => {
                        tracing::warn!(tunnel = %config.id, "stored tunnel not started: {e}");
                    }
                }
            }
            inner.connections.insert(config.id.clone(), connection);
            inner.configs.insert(config.id.clone(), config);
        }
        tracing::info!(count = inner.configs.len(), "tunnels restored");
        Ok(list_of(&inner))
    }

    /// Register a tunnel. It is stored disabled and starts `Disconnected`.
    pub async fn add(&self, mut config: TunnelConfig) -> Result<TunnelStatus, TunnelError> {
        config.validate()?;
        config.enabled = false;

        let mut inner = self.inner.lock().await;
        if inner.configs.contains_key(&config.id) {
            return Err(TunnelError::DuplicateId(config.id));
        }

        let mut next = inner.persisted();
        next.push(config.clone());
        self.store.save(&next)?;

        let id = config.id.clone();
        tracing::info!(tunnel = %id, kind = config.target.kind(), "tunnel added");
        let connection = TunnelConnection::new(&id, self.bus.clone());
        let status = connection.status();
        inner.connections.insert(id.clone(), connection);
        inner.configs.insert(id, config);
        Ok(status)
    }

    /// Forget the tunnel, then tear down its client.
    pub async fn remove(&self, id: &str) -> Result<(), TunnelError> {
        let mut inner = self.inner.lock().await;
        if !inner.configs.contains_key(id) {
            return Err(TunnelError::NotFound(id.to_string()));
        }

        // Persist first: a failed save leaves the tunnel exactly as it was.
        let removed = inner.configs.remove(id);
        if let Err(e) = self.store.save(&inner.persisted()) {
            if let Some(config) = removed {
                inner.configs.insert(id.to_string(), config);
            }
            return Err(e);
        }
        if let Some(mut connection) = inner.connections.remove(id) {
            connection.disable().await;
        }
        self.bus.retire(EntityKind::Tunnel, id);
        tracing::info!(tunnel = %id, "tunnel removed");
        Ok(())
    }

    /// Enable or disable a tunnel. Asking for the state it is already in
    /// returns the current status and changes nothing.
    pub async fn toggle(&self, id: &str, enabled: bool) -> Result<TunnelStatus, TunnelError> {
        let mut inner = self.inner.lock().await;
        let Some(config) = inner.configs.get(id).cloned() else {
            return Err(TunnelError::NotFound(id.to_string()));
        };
        if config.enabled == enabled {
            return inner
                .connections
                .get(id)
                .map(TunnelConnection::status)
                .ok_or_else(|| TunnelError::NotFound(id.to_string()));
        }

        let client = if enabled {
            Some(create_client(&config)?)
        } else {
            None
        };

        let mut next = inner.persisted();
        for tunnel in &mut next {
            if tunnel.id == id {
                tunnel.enabled = enabled;
            }
        }
        self.store.save(&next)?;
        if let Some(stored) = inner.configs.get_mut(id) {
            stored.enabled = enabled;
        }

        let settings = self.connection_settings(&config);
        let connection = inner
            .connections
            .get_mut(id)
            .ok_or_else(|| TunnelError::NotFound(id.to_string()))?;
        let status = match client {
            Some(client) => connection.enable(client, settings),
            None => connection.disable().await,
        };
        Ok(status)
    }

    /// Status of every tunnel, sorted by id.
    pub async fn list(&self) -> Vec<TunnelStatus> {
        list_of(&*self.inner.lock().await)
    }

    pub async fn get(&self, id: &str) -> Option<TunnelStatus> {
        self.inner
            .lock()
            .await
            .connections
            .get(id)
            .map(TunnelConnection::status)
    }

    pub async fn configs(&self) -> Vec<TunnelConfig> {
        self.inner.lock().await.persisted()
    }

    /// Disconnect everything without touching the stored `enabled` flags.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for connection in inner.connections.values_mut() {
            connection.disable().await;
        }
        tracing::info!("all tunnels shut down");
    }

    fn connection_settings(&self, config: &TunnelConfig) -> ConnectionSettings {
        let current = self.config.load();
        let local_port = config.local_port.unwrap_or(current.proxy.port);
        ConnectionSettings::from_config(local_port, &current.reliability)
    }
}

fn list_of(inner: &RegistryInner) -> Vec<TunnelStatus> {
    inner
        .configs
        .keys()
        .filter_map(|id| inner.connections.get(id).map(TunnelConnection::status))
        .collect()
}
