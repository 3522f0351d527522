use crate::app::ControlPlane;
use crate::app::status::{render_status, render_tunnels};
use crate::cli::{Cli, Commands, TunnelArgs, TunnelCommands};
use crate::config::{Config, ConfigHandle, TunnelConfig, TunnelTarget};
use crate::error::TunnelError;
use anyhow::{Context, Result, bail};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    let handle = ConfigHandle::new(config);
    match cli.command {
        Commands::Run => run(handle).await,
        Commands::Status => {
            let config = handle.load_full();
            let plane = ControlPlane::new(handle);
            let listening = engine_listening(config.proxy.port).await;
            println!("{}", render_status(&config, &plane.auth_status(), listening));
            Ok(())
        }
        Commands::Tunnel { tunnel_command } => handle_tunnel_command(&handle, tunnel_command),
        Commands::Login { provider } => login(handle, &provider).await,
        Commands::Logout { provider } => {
            let plane = ControlPlane::new(handle);
            let auth = plane.disconnect_provider(&provider)?;
            println!("Disconnected {provider}.");
            println!("{}", serde_json::to_string(&auth)?);
            Ok(())
        }
        Commands::ImportVertex { path } => {
            let plane = ControlPlane::new(handle);
            let auth = plane
                .import_vertex_credential(&path)
                .with_context(|| format!("importing {}", path.display()))?;
            println!("Vertex credential imported (vertex linked: {})", auth.vertex);
            Ok(())
        }
    }
}

/// Supervise until Ctrl-C, streaming every status event to stdout.
async fn run(handle: ConfigHandle) -> Result<()> {
    let plane = ControlPlane::new(handle);
    let mut events = plane.subscribe();
    plane.startup().await?;

    for event in plane.snapshot() {
        println!("{}", serde_json::to_string(&event)?);
    }
    info!("supervising; press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
        }
    }

    plane.shutdown().await;
    Ok(())
}

async fn login(handle: ConfigHandle, provider: &str) -> Result<()> {
    let plane = ControlPlane::new(handle);
    let started_here = !plane.proxy_status().running;
    if started_here {
        plane.start_proxy().await?;
    }

    let outcome = async {
        let token = plane.begin_oauth(provider).await?;
        println!("Complete the {provider} sign-in in your browser...");

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });
        let result = plane.wait_oauth(&token, &cancel).await;
        interrupt.abort();
        result
    }
    .await;

    if started_here {
        plane.shutdown().await;
    }
    outcome?;
    println!("{provider} account linked.");
    Ok(())
}

fn handle_tunnel_command(handle: &ConfigHandle, command: TunnelCommands) -> Result<()> {
    match command {
        TunnelCommands::List => {
            let config = handle.load_full();
            if config.tunnels.is_empty() {
                println!("No tunnels configured.");
            } else {
                for line in render_tunnels(&config) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        TunnelCommands::AddSsh {
            host,
            user,
            remote_port,
            port,
            key_file,
            remote_bind,
            common,
        } => add_tunnel(
            handle,
            common,
            TunnelTarget::Ssh {
                host,
                port,
                user,
                key_file,
                remote_port,
                remote_bind,
            },
        ),
        TunnelCommands::AddCloudflare { token, common } => {
            add_tunnel(handle, common, TunnelTarget::Cloudflare { token })
        }
        TunnelCommands::Remove { id } => {
            require_tunnel(handle, &id)?;
            handle.update(|config| config.tunnels.retain(|t| t.id != id))?;
            println!("Removed tunnel {id}");
            Ok(())
        }
        TunnelCommands::Enable { id } => set_enabled(handle, &id, true),
        TunnelCommands::Disable { id } => set_enabled(handle, &id, false),
    }
}

fn add_tunnel(handle: &ConfigHandle, args: TunnelArgs, target: TunnelTarget) -> Result<()> {
    let mut tunnel = TunnelConfig::new(target);
    if let Some(id) = args.id {
        tunnel.id = id;
    }
    tunnel.name = args.name;
    tunnel.local_port = args.local_port;
    tunnel.validate()?;
    if handle.load().tunnel(&tunnel.id).is_some() {
        bail!(TunnelError::DuplicateId(tunnel.id));
    }

    let id = tunnel.id.clone();
    handle.update(|config| config.tunnels.push(tunnel.clone()))?;
    println!("Added tunnel {id} (disabled; enable with `proxypal tunnel enable {id}`)");
    Ok(())
}

fn set_enabled(handle: &ConfigHandle, id: &str, enabled: bool) -> Result<()> {
    require_tunnel(handle, id)?;
    handle.update(|config| {
        for tunnel in &mut config.tunnels {
            if tunnel.id == id {
                tunnel.enabled = enabled;
            }
        }
    })?;
    println!(
        "Tunnel {id} {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn require_tunnel(handle: &ConfigHandle, id: &str) -> Result<()> {
    if handle.load().tunnel(id).is_none() {
        bail!(TunnelError::NotFound(id.to_string()));
    }
    Ok(())
}

async fn engine_listening(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_millis(300),
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await,
        Ok(Ok(_))
    )
}
