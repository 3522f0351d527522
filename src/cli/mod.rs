mod commands;

pub use commands::{Cli, Commands, TunnelArgs, TunnelCommands};
