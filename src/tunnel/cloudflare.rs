use super::traits::{FailureKind, LineSignal, TunnelClient, contains_any, find_url};
use crate::process::ProcessCommand;

/// Named Cloudflare tunnel run through the `cloudflared` binary.
///
/// Requires `cloudflared` installed and a connector token from the
/// Cloudflare Zero Trust dashboard.
pub struct CloudflareTunnel {
    token: String,
}

impl CloudflareTunnel {
    pub fn new(token: String) -> Self {
        Self { token }
    }
}

impl TunnelClient for CloudflareTunnel {
    fn name(&self) -> &str {
        "cloudflare"
    }

    fn command(&self, local_port: u16) -> ProcessCommand {
        // cloudflared reads the connector token from TUNNEL_TOKEN; keep it off argv.
        ProcessCommand::new("cloudflared")
            .args([
                "tunnel".to_string(),
                "--no-autoupdate".to_string(),
                "run".to_string(),
                "--url".to_string(),
                format!("http://localhost:{local_port}"),
            ])
            .env("TUNNEL_TOKEN", self.token.clone())
    }

    fn observe(&self, line: &str) -> LineSignal {
        if contains_any(line, &["registered tunnel connection"]) {
            return LineSignal::Ready {
                public_url: find_url(line, true),
            };
        }
        if contains_any(
            line,
            &[
                "unauthorized",
                "invalid tunnel secret",
                "provided tunnel token is not valid",
                "token is invalid",
            ],
        ) {
            return LineSignal::Failure(FailureKind::AuthRejected);
        }
        if contains_any(
            line,
            &[
                "no such host",
                "network is unreachable",
                "connection refused",
                "i/o timeout",
                "failed to dial",
            ],
        ) {
            return LineSignal::Failure(FailureKind::NetworkUnreachable);
        }
        match find_url(line, true) {
            Some(url) if !url.contains("cloudflare.com/") && !url.contains("github.com/") => {
                LineSignal::PublicUrl(url)
            }
            _ => LineSignal::Diagnostic,
        }
    }

    fn secrets(&self) -> Vec<String> {
        vec![self.token.clone()]
    }
}
