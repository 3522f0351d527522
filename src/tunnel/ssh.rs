use super::traits::{FailureKind, LineSignal, TunnelClient, contains_any};
use crate::process::ProcessCommand;

const READY_MARKERS: &[&str] = &[
    "remote forward success",
    "all remote forwarding requests processed",
];

const AUTH_FAILURES: &[&str] = &[
    "permission denied",
    "host key verification failed",
    "too many authentication failures",
];

const NETWORK_FAILURES: &[&str] = &[
    "could not resolve hostname",
    "connection refused",
    "network is unreachable",
    "connection timed out",
    "no route to host",
    "connection closed by remote host",
    "broken pipe",
];

const CONFIG_FAILURES: &[&str] = &["no such identity", "bad configuration option", "bad port"];

/// Reverse port forward through the system `ssh` client.
///
/// Runs non-interactively (`BatchMode`), so only key or agent based logins
/// work. With `ExitOnForwardFailure` a refused `-R` ends the session instead
/// of leaving a useless connection open.
pub struct SshTunnel {
    host: String,
    port: u16,
    user: String,
    key_file: Option<String>,
    remote_port: u16,
    remote_bind: String,
}

impl SshTunnel {
    pub fn new(
        host: String,
        port: u16,
        user: String,
        key_file: Option<String>,
        remote_port: u16,
        remote_bind: String,
    ) -> Self {
        Self {
            host,
            port,
            user,
            key_file,
            remote_port,
            remote_bind,
        }
    }
}

impl TunnelClient for SshTunnel {
    fn name(&self) -> &str {
        "ssh"
    }

    fn command(&self, local_port: u16) -> ProcessCommand {
        let mut cmd = ProcessCommand::new("ssh").args([
            "-N",
            "-v",
            "-o",
            "ExitOnForwardFailure=yes",
            "-o",
            "ServerAliveInterval=30",
            "-o",
            "ServerAliveCountMax=3",
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
        ]);
        cmd = cmd.arg("-p").arg(self.port.to_string());
        if let Some(key) = self.key_file.as_deref().filter(|k| !k.trim().is_empty()) {
            cmd = cmd.arg("-i").arg(shellexpand::tilde(key).into_owned());
        }
        cmd.arg("-R")
            .arg(format!(
                "{}:{}:127.0.0.1:{local_port}",
                self.remote_bind, self.remote_port
            ))
            .arg(format!("{}@{}", self.user, self.host))
    }

    fn observe(&self, line: &str) -> LineSignal {
        if contains_any(line, READY_MARKERS) {
            LineSignal::Ready { public_url: None }
        } else if contains_any(line, AUTH_FAILURES) {
            LineSignal::Failure(FailureKind::AuthRejected)
        } else if contains_any(line, NETWORK_FAILURES) {
            LineSignal::Failure(FailureKind::NetworkUnreachable)
        } else if contains_any(line, CONFIG_FAILURES) {
            LineSignal::Failure(FailureKind::ConfigInvalid)
        } else if contains_any(line, &["remote port forwarding failed"]) {
            // Usually the previous session still holds the remote port.
            LineSignal::Failure(FailureKind::Other)
        } else {
            LineSignal::Diagnostic
        }
    }
}
