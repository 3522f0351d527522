use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `ProxyPal` - supervise the local AI proxy engine, its tunnels and
/// provider accounts.
#[derive(Parser, Debug)]
#[command(name = "proxypal")]
#[command(version)]
#[command(about = "Control core for the local AI proxy engine.", long_about = None)]
pub struct Cli {
    /// Log at debug level, including engine and tunnel client output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Supervise the engine and enabled tunnels until Ctrl-C, printing
    /// status events as JSON lines
    Run,

    /// Show configuration, linked accounts and tunnels
    Status,

    /// Manage tunnel definitions in the config file
    Tunnel {
        #[command(subcommand)]
        tunnel_command: TunnelCommands,
    },

    /// Link a provider account through its browser sign-in
    Login {
        /// Provider (claude, openai, gemini, qwen, iflow, antigravity)
        provider: String,
    },

    /// Unlink a provider by deleting its stored credentials
    Logout {
        /// Provider (claude, openai, gemini, qwen, iflow, vertex, antigravity)
        provider: String,
    },

    /// Import a Google service account JSON for Vertex
    ImportVertex {
        /// Path to the service account file
        path: PathBuf,
    },
}

/// Tunnel management subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TunnelCommands {
    /// List configured tunnels
    List,
    /// Add a reverse SSH tunnel (`ssh -R`)
    AddSsh {
        /// SSH server host name
        host: String,
        /// Login user on the SSH server
        #[arg(long)]
        user: String,
        /// Port exposed on the SSH server
        #[arg(long)]
        remote_port: u16,
        #[arg(long, default_value_t = 22)]
        port: u16,
        /// Private key file (defaults to the ssh agent / config)
        #[arg(long)]
        key_file: Option<String>,
        #[arg(long, default_value = "0.0.0.0")]
        remote_bind: String,
        #[command(flatten)]
        common: TunnelArgs,
    },
    /// Add a Cloudflare tunnel run with a connector token
    AddCloudflare {
        #[arg(long)]
        token: String,
        #[command(flatten)]
        common: TunnelArgs,
    },
    /// Remove a tunnel
    Remove { id: String },
    /// Mark a tunnel enabled; it connects on the next `run`
    Enable { id: String },
    /// Mark a tunnel disabled
    Disable { id: String },
}

/// Options shared by every `tunnel add-*` command.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct TunnelArgs {
    /// Tunnel id (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,
    /// Display name
    #[arg(long)]
    pub name: Option<String>,
    /// Local port to expose (defaults to the proxy port)
    #[arg(long)]
    pub local_port: Option<u16>,
}
