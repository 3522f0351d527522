use crate::error::TunnelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A user-defined tunnel exposing the local proxy port to a remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Local port to forward; the proxy port when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(flatten)]
    pub target: TunnelTarget,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TunnelTarget {
    /// Reverse port forward (`ssh -R`) to a host the user controls.
    Ssh {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        user: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_file: Option<String>,
        remote_port: u16,
        #[serde(default = "default_remote_bind")]
        remote_bind: String,
    },
    /// Named Cloudflare tunnel authenticated with a connector token.
    Cloudflare { token: String },
    /// Any tunnel binary; `{port}` in `args` is replaced with the local port.
    Custom {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ready_pattern: Option<String>,
    },
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_bind() -> String {
    "0.0.0.0".into()
}

impl fmt::Debug for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ssh {
                host,
                port,
                user,
                key_file,
                remote_port,
                remote_bind,
            } => f
                .debug_struct("Ssh")
                .field("host", host)
                .field("port", port)
                .field("user", user)
                .field("key_file", key_file)
                .field("remote_port", remote_port)
                .field("remote_bind", remote_bind)
                .finish(),
            Self::Cloudflare { .. } => f
                .debug_struct("Cloudflare")
                .field("token", &"<redacted>")
                .finish(),
            Self::Custom {
                program,
                args,
                ready_pattern,
            } => f
                .debug_struct("Custom")
                .field("program", program)
                .field("args", args)
                .field("ready_pattern", ready_pattern)
                .finish(),
        }
    }
}

impl TunnelTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ssh { .. } => "ssh",
            Self::Cloudflare { .. } => "cloudflare",
            Self::Custom { .. } => "custom",
        }
    }
}

impl TunnelConfig {
    /// New disabled tunnel with a generated id.
    pub fn new(target: TunnelTarget) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            enabled: false,
            local_port: None,
            target,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.id.trim().is_empty() {
            return Err(TunnelError::InvalidConfig("tunnel id must not be empty".into()));
        }
        if self.local_port == Some(0) {
            return Err(TunnelError::InvalidConfig(format!(
                "tunnel {}: local_port must be non-zero",
                self.id
            )));
        }
        match &self.target {
            TunnelTarget::Ssh {
                host,
                port,
                user,
                remote_port,
                ..
            } => {
                if host.trim().is_empty() {
                    return Err(self.invalid("ssh host must not be empty"));
                }
                if user.trim().is_empty() {
                    return Err(self.invalid("ssh user must not be empty"));
                }
                if *port == 0 {
                    return Err(self.invalid("ssh port must be non-zero"));
                }
                if *remote_port == 0 {
                    return Err(self.invalid("ssh remote_port must be non-zero"));
                }
            }
            TunnelTarget::Cloudflare { token } => {
                if token.trim().is_empty() {
                    return Err(self.invalid("cloudflare token must not be empty"));
                }
            }
            TunnelTarget::Custom { program, .. } => {
                if program.trim().is_empty() {
                    return Err(self.invalid("custom tunnel program must not be empty"));
                }
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> TunnelError {
        TunnelError::InvalidConfig(format!("tunnel {}: {reason}", self.id))
    }
}
