use super::traits::{LineSignal, TunnelClient, find_url};
use crate::process::ProcessCommand;

/// Any tunnel binary described by a command template.
///
/// `{port}` in any argument is replaced with the local port. The tunnel
/// counts as ready once a line contains `ready_pattern`, or, without one,
/// once any `http(s)://` URL is printed; that URL becomes the public URL.
///
/// Examples:
/// - `bore local {port} --to bore.pub`
/// - `frpc -c /etc/frp/frpc.toml`
pub struct CustomTunnel {
    program: String,
    args: Vec<String>,
    ready_pattern: Option<String>,
}

impl CustomTunnel {
    pub fn new(program: String, args: Vec<String>, ready_pattern: Option<String>) -> Self {
        Self {
            program,
            args,
            ready_pattern: ready_pattern.filter(|p| !p.is_empty()),
        }
    }
}

impl TunnelClient for CustomTunnel {
    fn name(&self) -> &str {
        "custom"
    }

    fn command(&self, local_port: u16) -> ProcessCommand {
        let port = local_port.to_string();
        ProcessCommand::new(&self.program)
            .args(self.args.iter().map(|arg| arg.replace("{port}", &port)))
    }

    fn observe(&self, line: &str) -> LineSignal {
        let url = find_url(line, false);
        match &self.ready_pattern {
            Some(pattern) if line.contains(pattern.as_str()) => LineSignal::Ready { public_url: url },
            Some(_) => url.map_or(LineSignal::Diagnostic, LineSignal::PublicUrl),
            None => match url {
                Some(url) => LineSignal::Ready {
                    public_url: Some(url),
                },
                None => LineSignal::Diagnostic,
            },
        }
    }
}
