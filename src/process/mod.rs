//! Spawning and owning external processes (the proxy engine, tunnel clients).

mod handle;
mod output;

pub use handle::{ProcessCommand, ProcessHandle};
pub use output::{OutputLine, OutputLines, OutputStream};
