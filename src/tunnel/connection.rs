use super::backoff::Backoff;
use super::traits::{Failure, FailureKind, LineSignal, TunnelClient};
use crate::config::ReliabilityConfig;
use crate::process::{OutputLine, OutputLines, ProcessHandle};
use crate::status::{EntityKind, StatusBus, StatusEvent};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long output is still read after the client exits, so the line that
/// explains the exit is not lost.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub id: String,
    pub state: TunnelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    pub retry_count: u32,
}

impl TunnelStatus {
    pub fn disconnected(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: TunnelState::Disconnected,
            message: None,
            public_url: None,
            retry_count: 0,
        }
    }

    pub fn to_event(&self) -> StatusEvent {
        let mut event = StatusEvent::new(EntityKind::Tunnel, &self.id, self.state)
            .with_public_url(self.public_url.clone())
            .with_retry_count(self.retry_count);
        if let Some(message) = &self.message {
            event = event.with_message(message.clone());
        }
        event
    }
}

/// Per-connection timings, resolved from settings when the tunnel is enabled.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub local_port: u16,
    pub backoff: Backoff,
    /// Consecutive reconnects allowed before giving up.
    pub max_reconnects: u32,
    pub ready_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl ConnectionSettings {
    pub fn from_config(local_port: u16, reliability: &ReliabilityConfig) -> Self {
        Self {
            local_port,
            backoff: Backoff::from_config(reliability),
            max_reconnects: reliability.tunnel_max_reconnects,
            ready_timeout: Duration::from_secs(reliability.tunnel_ready_timeout_secs.max(1)),
            shutdown_grace: reliability.shutdown_grace(),
        }
    }
}

struct Shared {
    status: Mutex<TunnelStatus>,
    bus: StatusBus,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TunnelStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a worker transition unless the connection was disabled.
    ///
    /// The cancellation check happens under the status lock, and disable
    /// cancels before it takes that lock, so a disabled connection never
    /// receives a late worker write.
    fn update(&self, cancel: &CancellationToken, apply: impl FnOnce(&mut TunnelStatus)) -> bool {
        let mut status = self.lock();
        if cancel.is_cancelled() {
            return false;
        }
        apply(&mut status);
        tracing::info!(
            tunnel = %status.id,
            state = %status.state,
            retry = status.retry_count,
            message = status.message.as_deref().unwrap_or(""),
            "tunnel state"
        );
        self.bus.publish(status.to_event());
        true
    }
}

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// One tunnel's lifecycle: a background worker that owns the client process
/// and moves the status through its state machine.
pub struct TunnelConnection {
    id: String,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl TunnelConnection {
    /// New connection in `Disconnected`, announced on the bus.
    pub fn new(id: &str, bus: StatusBus) -> Self {
        let status = TunnelStatus::disconnected(id);
        bus.publish(status.to_event());
        Self {
            id: id.to_string(),
            shared: Arc::new(Shared {
                status: Mutex::new(status),
                bus,
            }),
            worker: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TunnelStatus {
        self.shared.lock().clone()
    }

    /// Whether a worker is still connecting, connected or backing off.
    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.task.is_finished())
    }

    /// Start connecting. A no-op while a worker is already active.
    pub fn enable(&mut self, client: Box<dyn TunnelClient>, settings: ConnectionSettings) -> TunnelStatus {
        if self.is_active() {
            return self.status();
        }
        self.worker = None;

        let cancel = CancellationToken::new();
        self.shared.update(&cancel, |status| {
            *status = TunnelStatus {
                state: TunnelState::Connecting,
                ..TunnelStatus::disconnected(&self.id)
            };
        });
        tracing::info!(
            tunnel = %self.id,
            client = client.name(),
            local_port = settings.local_port,
            "enabling tunnel"
        );

        let task = tokio::spawn(run_worker(
            self.id.clone(),
            Arc::clone(&self.shared),
            cancel.clone(),
            client,
            settings,
        ));
        self.worker = Some(Worker { cancel, task });
        self.status()
    }

    /// Stop the tunnel: cancel first, report `Disconnected` at once, then
    /// wait for the worker to tear the process down. Idempotent.
    pub async fn disable(&mut self) -> TunnelStatus {
        let worker = self.worker.take();
        if let Some(worker) = &worker {
            worker.cancel.cancel();
        }

        {
            let mut status = self.shared.lock();
            if worker.is_some() || status.state != TunnelState::Disconnected {
                *status = TunnelStatus::disconnected(&self.id);
                self.shared.bus.publish(status.to_event());
                tracing::info!(tunnel = %self.id, "tunnel disabled");
            }
        }

        if let Some(worker) = worker
            && let Err(e) = worker.task.await
        {
            tracing::warn!(tunnel = %self.id, "tunnel worker ended abnormally: {e}");
        }
        self.status()
    }
}

impl Drop for TunnelConnection {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancel.cancel();
        }
    }
}

enum SessionOutcome {
    Cancelled,
    Ended { failure: Failure, was_connected: bool },
}

async fn run_worker(
    id: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    client: Box<dyn TunnelClient>,
    settings: ConnectionSettings,
) {
    // Consecutive reconnects since the last successful connection.
    let mut attempt: u32 = 0;

    loop {
        let (failure, was_connected) =
            match run_session(&id, &shared, &cancel, client.as_ref(), &settings).await {
                SessionOutcome::Cancelled => return,
                SessionOutcome::Ended {
                    failure,
                    was_connected,
                } => (failure, was_connected),
            };
        if was_connected {
            attempt = 0;
        }

        if !failure.kind.is_retryable() {
            tracing::error!(tunnel = %id, "{}", failure.describe());
            shared.update(&cancel, |status| {
                status.state = TunnelState::Error;
                status.message = Some(failure.describe());
                status.public_url = None;
            });
            return;
        }

        if attempt >= settings.max_reconnects {
            tracing::error!(
                tunnel = %id,
                attempts = attempt,
                "giving up: {}",
                failure.describe()
            );
            shared.update(&cancel, |status| {
                status.state = TunnelState::Error;
                status.message = Some(format!(
                    "{} (gave up after {attempt} reconnect attempts)",
                    failure.describe()
                ));
                status.public_url = None;
            });
            return;
        }

        attempt += 1;
        let delay = settings.backoff.delay(attempt);
        tracing::warn!(
            tunnel = %id,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "{}; reconnecting",
            failure.describe()
        );
        let published = shared.update(&cancel, |status| {
            status.state = TunnelState::Reconnecting;
            status.message = Some(failure.describe());
            status.public_url = None;
            status.retry_count = attempt;
        });
        if !published {
            return;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Per-session bookkeeping fed by the client's output.
struct SessionState {
    connected: bool,
    announced_url: Option<String>,
    failure: Option<Failure>,
}

impl SessionState {
    fn on_line(
        &mut self,
        id: &str,
        line: &OutputLine,
        client: &dyn TunnelClient,
        shared: &Shared,
        cancel: &CancellationToken,
    ) {
        let text = client.redact(&line.text);
        tracing::debug!(tunnel = %id, client = client.name(), stream = %line.stream, "{text}");

        match client.observe(&line.text) {
            LineSignal::Ready { public_url } => {
                if self.connected {
                    return;
                }
                self.connected = true;
                self.failure = None;
                let public_url = public_url.or_else(|| self.announced_url.take());
                shared.update(cancel, |status| {
                    status.state = TunnelState::Connected;
                    status.message = None;
                    status.public_url = public_url;
                    status.retry_count = 0;
                });
            }
            LineSignal::PublicUrl(url) => {
                self.announced_url = Some(url);
            }
            LineSignal::Failure(kind) => {
                // Keep a fatal classification once seen.
                let keep_existing = self
                    .failure
                    .as_ref()
                    .is_some_and(|f| !f.kind.is_retryable() && kind.is_retryable());
                if !keep_existing {
                    self.failure = Some(Failure::new(kind, text.trim()));
                }
            }
            LineSignal::Diagnostic => {}
        }
    }

    async fn drain(
        &mut self,
        id: &str,
        lines: &mut OutputLines,
        client: &dyn TunnelClient,
        shared: &Shared,
        cancel: &CancellationToken,
    ) {
        let _ = tokio::time::timeout(EXIT_DRAIN_TIMEOUT, async {
            while let Some(line) = lines.next().await {
                self.on_line(id, &line, client, shared, cancel);
            }
        })
        .await;
    }
}

async fn run_session(
    id: &str,
    shared: &Shared,
    cancel: &CancellationToken,
    client: &dyn TunnelClient,
    settings: &ConnectionSettings,
) -> SessionOutcome {
    let command = client.command(settings.local_port);
    let mut handle = match ProcessHandle::spawn(&command) {
        Ok(handle) => handle,
        Err(e) => {
            let kind = if e.is_missing_binary() {
                FailureKind::ConfigInvalid
            } else {
                FailureKind::Other
            };
            return SessionOutcome::Ended {
                failure: Failure::new(kind, client.redact(&e.to_string())),
                was_connected: false,
            };
        }
    };
    let Some(mut lines) = handle.take_output() else {
        return SessionOutcome::Ended {
            failure: Failure::new(FailureKind::Other, "client output unavailable"),
            was_connected: false,
        };
    };

    let mut session = SessionState {
        connected: false,
        announced_url: None,
        failure: None,
    };
    let mut lines_open = true;
    let ready_deadline = tokio::time::sleep(settings.ready_timeout);
    tokio::pin!(ready_deadline);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = handle.terminate(settings.shutdown_grace).await {
                    tracing::warn!(tunnel = %id, "failed to stop tunnel client: {e}");
                }
                return SessionOutcome::Cancelled;
            }
            line = lines.next(), if lines_open => match line {
                Some(line) => session.on_line(id, &line, client, shared, cancel),
                None => lines_open = false,
            },
            () = &mut ready_deadline, if !session.connected => {
                if let Err(e) = handle.terminate(settings.shutdown_grace).await {
                    tracing::warn!(tunnel = %id, "failed to stop unresponsive client: {e}");
                }
                let failure = session.failure.unwrap_or_else(|| {
                    Failure::new(
                        FailureKind::Other,
                        format!(
                            "{} did not become ready within {}s",
                            client.name(),
                            settings.ready_timeout.as_secs()
                        ),
                    )
                });
                return SessionOutcome::Ended { failure, was_connected: false };
            }
            exit = handle.wait() => {
                if lines_open {
                    session.drain(id, &mut lines, client, shared, cancel).await;
                }
                let exit = match exit {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                let failure = match session.failure {
                    Some(failure) => failure,
                    None if session.connected => Failure::new(
                        FailureKind::NetworkUnreachable,
                        format!("session dropped ({exit})"),
                    ),
                    None => Failure::new(
                        FailureKind::Other,
                        format!("{} exited before becoming ready ({exit})", client.name()),
                    ),
                };
                return SessionOutcome::Ended { failure, was_connected: session.connected };
            }
        }
    }
}
