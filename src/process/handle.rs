use super::output::{self, OutputLines, OutputStream};
use crate::error::ProcessError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A spawned OS process, exclusively owned by whoever spawned it.
///
/// Dropping the handle kills the child. [`ProcessHandle::terminate`]
/// consumes the handle, so a terminated process cannot be queried again.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    output: Option<OutputLines>,
    exit: Option<ExitStatus>,
}

impl ProcessHandle {
    pub fn spawn(command: &ProcessCommand) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ProcessError::NotFound {
                program: command.program.clone(),
            },
            std::io::ErrorKind::PermissionDenied => ProcessError::PermissionDenied {
                program: command.program.clone(),
            },
            _ => ProcessError::Spawn {
                program: command.program.clone(),
                source,
            },
        })?;

        let (tx, lines) = output::channel();
        if let Some(stdout) = child.stdout.take() {
            output::spawn_reader(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            output::spawn_reader(stderr, OutputStream::Stderr, tx);
        }

        let pid = child.id();
        tracing::debug!(program = %command.program, pid, "spawned child process");

        Ok(Self {
            child,
            pid,
            program: command.program.clone(),
            args: command.args.clone(),
            cwd: command.cwd.clone(),
            output: Some(lines),
            exit: None,
        })
    }

    /// Take the merged output stream. Only the first call returns it.
    pub fn take_output(&mut self) -> Option<OutputLines> {
        self.output.take()
    }

    /// Non-blocking exit check.
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => {
                    tracing::warn!(program = %self.program, "try_wait failed: {e}");
                }
            }
        }
        self.exit
    }

    /// Wait until the child exits.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        let status = self.child.wait().await.map_err(|source| ProcessError::Wait {
            program: self.program.clone(),
            source,
        })?;
        self.exit = Some(status);
        Ok(status)
    }

    /// Ask the child to stop, then force it after `grace`.
    pub async fn terminate(mut self, grace: Duration) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.poll_exit() {
            return Ok(status);
        }

        #[cfg(unix)]
        {
            self.send_sigterm()?;
            if let Ok(result) = tokio::time::timeout(grace, self.wait()).await {
                return result;
            }
            tracing::warn!(
                program = %self.program,
                pid = self.pid,
                "child ignored SIGTERM for {}s, killing",
                grace.as_secs()
            );
        }
        #[cfg(not(unix))]
        let _ = grace;

        if let Err(e) = self.child.start_kill() {
            // Raced with a natural exit.
            tracing::debug!(program = %self.program, "kill failed: {e}");
        }
        self.wait().await
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> Result<(), ProcessError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid).map_err(|_| ProcessError::Signal {
            program: self.program.clone(),
            message: format!("pid {pid} out of range"),
        })?;
        // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(ProcessError::Signal {
                    program: self.program.clone(),
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }
}
