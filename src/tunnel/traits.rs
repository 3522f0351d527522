use crate::process::ProcessCommand;

/// Why a tunnel session ended badly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FailureKind {
    /// Credentials refused. Retrying will not help.
    #[strum(serialize = "authentication rejected")]
    AuthRejected,
    #[strum(serialize = "network unreachable")]
    NetworkUnreachable,
    /// Bad settings or a missing client binary.
    #[strum(serialize = "invalid configuration")]
    ConfigInvalid,
    #[strum(serialize = "tunnel failed")]
    Other,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::NetworkUnreachable | Self::Other)
    }
}

/// A classified failure with a human-readable, already redacted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

/// What one line of client output means for the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSignal {
    /// The tunnel is carrying traffic.
    Ready { public_url: Option<String> },
    /// A public URL was announced ahead of readiness.
    PublicUrl(String),
    Failure(FailureKind),
    Diagnostic,
}

/// Knows how to launch one kind of tunnel client and read its output.
///
/// Implementations are pure: they build a command and classify lines. The
/// connection owns the process.
pub trait TunnelClient: Send + Sync {
    /// Client name for logs ("ssh", "cloudflare", ...).
    fn name(&self) -> &str;

    /// Command forwarding `local_port` on this machine.
    fn command(&self, local_port: u16) -> ProcessCommand;

    fn observe(&self, line: &str) -> LineSignal;

    /// Values that must never leave the process in logs or status messages.
    fn secrets(&self) -> Vec<String> {
        Vec::new()
    }

    fn redact(&self, text: &str) -> String {
        self.secrets()
            .iter()
            .filter(|secret| !secret.is_empty())
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), "[REDACTED]"))
    }
}

/// First `http://` or `https://` token in `line`.
pub(crate) fn find_url(line: &str, https_only: bool) -> Option<String> {
    let schemes: &[&str] = if https_only {
        &["https://"]
    } else {
        &["https://", "http://"]
    };
    schemes
        .iter()
        .filter_map(|scheme| line.find(scheme))
        .min()
        .map(|idx| {
            let rest = &line[idx..];
            let end = rest
                .find(|c: char| c.is_whitespace() || matches!(c, '|' | '"' | '\'' | '>'))
                .unwrap_or(rest.len());
            rest[..end].to_string()
        })
}

pub(crate) fn contains_any(line: &str, needles: &[&str]) -> bool {
    let lower = line.to_ascii_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}
