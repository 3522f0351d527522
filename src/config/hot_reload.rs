use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Config;

/// Shared, live configuration.
///
/// Readers take lock-free snapshots; [`ConfigHandle::update`] applies a
/// mutation, persists it and swaps the pointer so every component sees the
/// same settings on its next read. Writers are serialized, so two updates
/// never overwrite each other.
pub struct ConfigHandle {
    inner: Arc<ArcSwap<Config>>,
    write: Arc<Mutex<()>>,
    path: PathBuf,
    persist: bool,
}

impl ConfigHandle {
    /// Handle that writes changes back to `config.config_path`.
    pub fn new(config: Config) -> Self {
        let path = config.config_path.clone();
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
            write: Arc::new(Mutex::new(())),
            path,
            persist: true,
        }
    }

    /// Handle that never touches disk, for embedding and tests.
    pub fn in_memory(config: Config) -> Self {
        Self {
            persist: false,
            ..Self::new(config)
        }
    }

    /// Current snapshot. Lock-free.
    pub fn load(&self) -> arc_swap::Guard<Arc<Config>> {
        self.inner.load()
    }

    pub fn load_full(&self) -> Arc<Config> {
        self.inner.load_full()
    }

    /// Re-read the file from disk and swap it in.
    pub fn reload(&self) -> anyhow::Result<()> {
        let fresh = Config::load_from(&self.path)?;
        let _write = self.write_lock();
        self.inner.store(Arc::new(fresh));
        tracing::info!(path = %self.path.display(), "config reloaded");
        Ok(())
    }

    /// Apply `mutate` to a copy of the current config, validate, persist,
    /// then publish it. On error the active snapshot is left untouched.
    ///
    /// If another writer lands first, `mutate` runs again on the newer
    /// snapshot, so it may be called more than once.
    pub fn update<F>(&self, mut mutate: F) -> anyhow::Result<Arc<Config>>
    where
        F: FnMut(&mut Config),
    {
        loop {
            let base = self.inner.load_full();
            let mut next = (*base).clone();
            mutate(&mut next);
            next.validate()?;

            let _write = self.write_lock();
            let current = self.inner.load();
            if !Arc::ptr_eq(&*current, &base) {
                continue;
            }
            if self.persist {
                next.save()?;
            }
            let next = Arc::new(next);
            self.inner.store(Arc::clone(&next));
            return Ok(next);
        }
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Clone for ConfigHandle {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            write: Arc::clone(&self.write),
            path: self.path.clone(),
            persist: self.persist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        Config {
            config_path: dir.join("config.toml"),
            state_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn clone_shares_state() {
        let handle = ConfigHandle::in_memory(Config::default());
        let clone = handle.clone();

        handle.update(|c| c.proxy.port = 9001).unwrap();

        assert_eq!(clone.load().proxy.port, 9001);
    }

    #[test]
    fn update_persists_to_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = ConfigHandle::new(config_in(tmp.path()));

        handle.update(|c| c.oauth.max_attempts = 7).unwrap();

        let on_disk = Config::load_from(handle.path()).unwrap();
        assert_eq!(on_disk.oauth.max_attempts, 7);
    }

    #[test]
    fn invalid_update_keeps_previous_snapshot() {
        let handle = ConfigHandle::in_memory(Config::default());

        let result = handle.update(|c| c.proxy.port = 0);

        assert!(result.is_err());
        assert_eq!(handle.load().proxy.port, 8317);
    }

    fn cloudflare_tunnel(id: &str) -> crate::config::TunnelConfig {
        let mut tunnel = crate::config::TunnelConfig::new(crate::config::TunnelTarget::Cloudflare {
            token: "cf-token".into(),
        });
        tunnel.id = id.into();
        tunnel
    }

    #[test]
    fn concurrent_updates_are_all_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = ConfigHandle::new(config_in(tmp.path()));

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    let tunnel = cloudflare_tunnel(&format!("t{i}"));
                    handle
                        .update(|c| c.tunnels.push(tunnel.clone()))
                        .unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(handle.load().tunnels.len(), 8);
        let on_disk = Config::load_from(handle.path()).unwrap();
        assert_eq!(on_disk.tunnels.len(), 8);
    }

    #[test]
    fn update_landing_mid_mutation_is_not_lost() {
        let handle = ConfigHandle::in_memory(Config::default());
        let other = handle.clone();

        handle
            .update(|c| {
                if other.load().tunnels.is_empty() {
                    other
                        .update(|c| c.tunnels.push(cloudflare_tunnel("office")))
                        .unwrap();
                }
                c.proxy.debug = true;
            })
            .unwrap();

        let current = handle.load();
        assert_eq!(current.tunnels.len(), 1);
        assert_eq!(current.tunnels[0].id, "office");
        assert!(current.proxy.debug);
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        config.save().unwrap();
        let handle = ConfigHandle::new(config);

        std::fs::write(handle.path(), "[proxy]\nport = 9777\n").unwrap();
        handle.reload().unwrap();

        assert_eq!(handle.load().proxy.port, 9777);
    }

    #[test]
    fn reload_fails_on_missing_file() {
        let config = Config {
            config_path: PathBuf::from("/nonexistent/path/config.toml"),
            ..Config::default()
        };
        let handle = ConfigHandle::new(config);
        assert!(handle.reload().is_err());
    }
}
