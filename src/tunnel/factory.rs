use super::{CloudflareTunnel, CustomTunnel, SshTunnel, TunnelClient};
use crate::config::{TunnelConfig, TunnelTarget};
use crate::error::TunnelError;

/// Build the client for a tunnel after validating its settings.
pub fn create_client(config: &TunnelConfig) -> Result<Box<dyn TunnelClient>, TunnelError> {
    config.validate()?;
    let client: Box<dyn TunnelClient> = match &config.target {
        TunnelTarget::Ssh {
            host,
            port,
            user,
            key_file,
            remote_port,
            remote_bind,
        } => Box::new(SshTunnel::new(
            host.trim().to_string(),
            *port,
            user.trim().to_string(),
            key_file.clone(),
            *remote_port,
            remote_bind.clone(),
        )),
        TunnelTarget::Cloudflare { token } => Box::new(CloudflareTunnel::new(token.trim().to_string())),
        TunnelTarget::Custom {
            program,
            args,
            ready_pattern,
        } => Box::new(CustomTunnel::new(
            program.clone(),
            args.clone(),
            ready_pattern.clone(),
        )),
    };
    Ok(client)
}
