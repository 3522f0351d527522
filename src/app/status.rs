use crate::config::{Config, TunnelConfig, TunnelTarget};
use crate::oauth::AuthStatus;

fn mark(flag: bool) -> &'static str {
    if flag { "✓" } else { "·" }
}

fn describe_target(tunnel: &TunnelConfig) -> String {
    match &tunnel.target {
        TunnelTarget::Ssh {
            host,
            user,
            remote_port,
            ..
        } => format!("ssh {user}@{host} :{remote_port}"),
        TunnelTarget::Cloudflare { .. } => "cloudflare".into(),
        TunnelTarget::Custom { program, .. } => format!("custom {program}"),
    }
}

/// One line per configured tunnel.
pub fn render_tunnels(config: &Config) -> Vec<String> {
    config
        .tunnels
        .iter()
        .map(|tunnel| {
            let local_port = tunnel.local_port.unwrap_or(config.proxy.port);
            format!(
                "  {} {:<36} {} -> localhost:{local_port}{}",
                mark(tunnel.enabled),
                tunnel.id,
                describe_target(tunnel),
                tunnel
                    .name
                    .as_deref()
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default()
            )
        })
        .collect()
}

pub fn render_status(config: &Config, auth: &AuthStatus, engine_listening: bool) -> String {
    let mut lines = vec![
        "◆ ProxyPal status".to_string(),
        String::new(),
        format!("Version     {}", env!("CARGO_PKG_VERSION")),
        format!("Config      {}", config.config_path.display()),
        format!("State dir   {}", config.state_dir.display()),
        String::new(),
        format!("Endpoint    {}", config.proxy.endpoint()),
        format!(
            "Engine      {} ({})",
            config.proxy.engine_binary,
            if engine_listening { "listening" } else { "not listening" }
        ),
        format!("Auto start  {}", config.proxy.auto_start),
        format!("Auth dir    {}", config.proxy.resolved_auth_dir().display()),
        String::new(),
        "Accounts".to_string(),
    ];
    for (name, linked) in [
        ("claude", auth.claude),
        ("openai", auth.openai),
        ("gemini", auth.gemini),
        ("qwen", auth.qwen),
        ("iflow", auth.iflow),
        ("vertex", auth.vertex),
        ("antigravity", auth.antigravity),
    ] {
        lines.push(format!("  {} {name}", mark(linked)));
    }

    lines.push(String::new());
    if config.tunnels.is_empty() {
        lines.push("Tunnels     none".to_string());
    } else {
        lines.push("Tunnels".to_string());
        lines.extend(render_tunnels(config));
    }
    lines.join("\n")
}
