use super::Config;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use directories::UserDirs;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

impl Config {
    pub fn load_or_init() -> Result<Self> {
        let home = UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")?;
        let proxypal_dir = home.join(".proxypal");

        if !proxypal_dir.exists() {
            fs::create_dir_all(&proxypal_dir).context("Failed to create .proxypal directory")?;
        }

        let config_path = proxypal_dir.join("config.toml");
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            let config = Self {
                config_path,
                state_dir: proxypal_dir,
                ..Self::default()
            };
            config.save()?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; its parent directory becomes the state dir.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        config.state_dir = path
            .parent()
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    /// Persist to `config_path` by writing a sibling temp file and renaming it.
    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let tmp = self.config_path.with_extension("toml.tmp");
        fs::write(&tmp, toml_str).context("Failed to write config file")?;
        fs::rename(&tmp, &self.config_path).context("Failed to replace config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.proxy.validate()?;
        if self.reliability.tunnel_initial_backoff_ms == 0 {
            return Err(ConfigError::Validation(
                "reliability.tunnel_initial_backoff_ms must be non-zero".into(),
            ));
        }
        if self.reliability.tunnel_max_backoff_ms < self.reliability.tunnel_initial_backoff_ms {
            return Err(ConfigError::Validation(
                "reliability.tunnel_max_backoff_ms must be >= tunnel_initial_backoff_ms".into(),
            ));
        }
        if self.oauth.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "oauth.max_attempts must be non-zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for tunnel in &self.tunnels {
            if !seen.insert(tunnel.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate tunnel id '{}'",
                    tunnel.id
                )));
            }
            tunnel
                .validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::{TunnelConfig, TunnelTarget};
    use super::*;

    fn config_in(dir: &Path) -> Config {
        Config {
            config_path: dir.join("config.toml"),
            state_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn save_then_load_preserves_tunnels() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.proxy.port = 9410;
        config.tunnels.push(TunnelConfig {
            id: "office".into(),
            name: Some("Office box".into()),
            enabled: true,
            local_port: None,
            target: TunnelTarget::Cloudflare {
                token: "cf-token".into(),
            },
        });
        config.save().unwrap();

        let loaded = Config::load_from(&config.config_path).unwrap();
        assert_eq!(loaded.proxy.port, 9410);
        assert_eq!(loaded.tunnels.len(), 1);
        assert_eq!(loaded.tunnels[0].id, "office");
        assert!(loaded.tunnels[0].enabled);
        assert_eq!(loaded.state_dir, tmp.path());
        assert!(!tmp.path().join("config.toml.tmp").exists());
    }

    #[test]
    fn empty_file_loads_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.reliability.tunnel_max_reconnects, 5);
        assert_eq!(loaded.oauth.max_attempts, 120);
        assert!(loaded.tunnels.is_empty());
        assert_eq!(loaded.engine_config_path(), tmp.path().join("proxy-config.yaml"));
    }

    #[test]
    fn duplicate_tunnel_ids_fail_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        let tunnel = TunnelConfig::new(TunnelTarget::Cloudflare {
            token: "t".into(),
        });
        config.tunnels.push(tunnel.clone());
        config.tunnels.push(tunnel);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate tunnel id"));
    }

    #[test]
    fn inverted_backoff_bounds_fail_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.reliability.tunnel_initial_backoff_ms = 10_000;
        config.reliability.tunnel_max_backoff_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_toml_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "[proxy\nport = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
