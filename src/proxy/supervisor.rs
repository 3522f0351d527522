use super::engine_config;
use super::health::{EngineReachability, check_models};
use super::management::ManagementClient;
use crate::config::{Config, ConfigHandle, endpoint_for_port};
use crate::error::ProxyError;
use crate::process::{OutputLines, ProcessCommand, ProcessHandle};
use crate::status::{EntityKind, StatusBus, StatusEvent};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PROXY_ENTITY_ID: &str = "proxy";
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProxyState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Runtime view of the engine. `running` is true exactly when `state` is
/// `Running`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub running: bool,
    pub port: u16,
    pub endpoint: String,
    pub state: ProxyState,
}

impl ProxyStatus {
    fn stopped(port: u16) -> Self {
        Self {
            running: false,
            port,
            endpoint: endpoint_for_port(port),
            state: ProxyState::Stopped,
        }
    }
}

struct Monitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    monitor: Option<Monitor>,
}

/// Owns the proxy engine process and is the only writer of its status.
pub struct ProxySupervisor {
    config: ConfigHandle,
    bus: StatusBus,
    status: Arc<RwLock<ProxyStatus>>,
    lifecycle: Mutex<Lifecycle>,
}

impl ProxySupervisor {
    pub fn new(config: ConfigHandle, bus: StatusBus) -> Self {
        let port = config.load().proxy.port;
        Self {
            config,
            bus,
            status: Arc::new(RwLock::new(ProxyStatus::stopped(port))),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn status(&self) -> ProxyStatus {
        read_status(&self.status).clone()
    }

    pub fn is_running(&self) -> bool {
        read_status(&self.status).running
    }

    pub fn port(&self) -> u16 {
        read_status(&self.status).port
    }

    pub fn endpoint(&self) -> String {
        read_status(&self.status).endpoint.clone()
    }

    /// Management API client for the current settings.
    pub fn management(&self) -> ManagementClient {
        ManagementClient::for_settings(&self.config.load().proxy)
    }

    /// Query the engine's models endpoint with the first client API key.
    pub async fn check_health(&self) -> EngineReachability {
        if !self.is_running() {
            return EngineReachability::Offline;
        }
        let config = self.config.load_full();
        let base_url = format!("http://127.0.0.1:{}", self.port());
        match check_models(&base_url, config.proxy.api_keys.first().map(String::as_str)).await {
            Ok(latency) => EngineReachability::Healthy { latency },
            Err(e) => {
                tracing::debug!("engine health check failed: {e}");
                EngineReachability::Unhealthy
            }
        }
    }

    pub async fn start(&self) -> Result<ProxyStatus, ProxyError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.start_locked(&mut lifecycle).await
    }

    pub async fn stop(&self) -> Result<ProxyStatus, ProxyError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await
    }

    /// Stop if running, wait for the port to settle, then start with the
    /// current settings.
    pub async fn restart(&self) -> Result<ProxyStatus, ProxyError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_running() {
            self.stop_locked(&mut lifecycle).await?;
            tokio::time::sleep(self.config.load().proxy.restart_settle()).await;
        }
        self.start_locked(&mut lifecycle).await
    }

    async fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<ProxyStatus, ProxyError> {
        if read_status(&self.status).state != ProxyState::Stopped {
            return Err(ProxyError::AlreadyRunning);
        }
        // A monitor left over from an unexpected exit has already finished.
        lifecycle.monitor = None;

        let config = self.config.load_full();
        let port = config.proxy.port;
        self.transition(ProxyState::Starting, port, None);
        tracing::info!(port, engine = %config.proxy.engine_binary, "starting proxy engine");

        let handle = match launch(&config).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(port, "proxy engine failed to start: {e}");
                self.transition(ProxyState::Stopped, port, Some(e.to_string()));
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor_engine(
            handle,
            cancel.clone(),
            Arc::clone(&self.status),
            self.bus.clone(),
            config.reliability.shutdown_grace(),
        ));
        lifecycle.monitor = Some(Monitor { cancel, task });

        let status = self.transition(ProxyState::Running, port, None);
        tracing::info!(endpoint = %status.endpoint, "proxy engine running");

        let settings = config.proxy.clone();
        tokio::spawn(async move {
            let client = ManagementClient::for_settings(&settings);
            if let Err(e) = client.sync_hot_settings(&settings).await {
                tracing::warn!("could not sync engine settings: {e}");
            }
        });

        Ok(status)
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<ProxyStatus, ProxyError> {
        let monitor = lifecycle.monitor.take();
        let port = self.port();
        let Some(monitor) = monitor.filter(|_| self.is_running()) else {
            return Err(ProxyError::NotRunning);
        };

        monitor.cancel.cancel();
        self.transition(ProxyState::Stopping, port, None);
        tracing::info!(port, "stopping proxy engine");
        if let Err(e) = monitor.task.await {
            tracing::warn!("proxy monitor task failed: {e}");
        }
        Ok(self.transition(ProxyState::Stopped, port, None))
    }

    fn transition(&self, state: ProxyState, port: u16, message: Option<String>) -> ProxyStatus {
        apply_transition(&self.status, &self.bus, state, port, message)
    }
}

fn read_status(status: &RwLock<ProxyStatus>) -> std::sync::RwLockReadGuard<'_, ProxyStatus> {
    status.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn apply_transition(
    status: &RwLock<ProxyStatus>,
    bus: &StatusBus,
    state: ProxyState,
    port: u16,
    message: Option<String>,
) -> ProxyStatus {
    let mut guard = status.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    *guard = ProxyStatus {
        running: state == ProxyState::Running,
        port,
        endpoint: endpoint_for_port(port),
        state,
    };
    let mut event = StatusEvent::new(EntityKind::Proxy, PROXY_ENTITY_ID, state);
    if let Some(message) = message {
        event = event.with_message(message);
    }
    bus.publish(event);
    guard.clone()
}

/// Port pre-check, config write, spawn, then wait for the port to accept.
async fn launch(config: &Config) -> Result<ProcessHandle, ProxyError> {
    let settings = &config.proxy;
    let port = settings.port;

    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => drop(listener),
        Err(e) => {
            tracing::debug!(port, "port pre-check failed: {e}");
            return Err(ProxyError::PortInUse(port));
        }
    }

    let config_path = config.engine_config_path();
    engine_config::write(&config_path, settings)?;

    let state_dir = config.state_dir.display().to_string();
    let command = ProcessCommand::new(&settings.engine_binary)
        .args(settings.engine_args_for(&config_path))
        .current_dir(&config.state_dir)
        .env("WRITABLE_PATH", state_dir);
    let mut handle = ProcessHandle::spawn(&command)?;
    if let Some(lines) = handle.take_output() {
        tokio::spawn(forward_engine_output(lines));
    }

    let grace = config.reliability.shutdown_grace();
    let timeout = settings.start_timeout();
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(exit) = handle.poll_exit() {
            return Err(ProxyError::ExitedDuringStartup(exit.to_string()));
        }
        if port_accepts(port).await {
            return Ok(handle);
        }
        if Instant::now() >= deadline {
            if let Err(e) = handle.terminate(grace).await {
                tracing::warn!("failed to tear down unresponsive engine: {e}");
            }
            return Err(ProxyError::StartTimeout {
                port,
                secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

async fn port_accepts(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

async fn forward_engine_output(mut lines: OutputLines) {
    while let Some(line) = lines.next().await {
        tracing::debug!(target: "proxypal::engine", stream = %line.stream, "{}", line.text);
    }
}

/// Owns the running engine until it is cancelled or exits on its own.
async fn monitor_engine(
    mut handle: ProcessHandle,
    cancel: CancellationToken,
    status: Arc<RwLock<ProxyStatus>>,
    bus: StatusBus,
    grace: Duration,
) {
    tokio::select! {
        () = cancel.cancelled() => {
            if let Err(e) = handle.terminate(grace).await {
                tracing::warn!("failed to terminate proxy engine: {e}");
            }
        }
        exit = handle.wait() => {
            let message = match exit {
                Ok(status) => format!("proxy engine exited unexpectedly ({status})"),
                Err(e) => format!("lost track of proxy engine: {e}"),
            };
            // stop() already owns the transition once it has cancelled.
            if cancel.is_cancelled() {
                return;
            }
            tracing::error!("{message}");
            let port = read_status(&status).port;
            apply_transition(&status, &bus, ProxyState::Stopped, port, Some(message));
        }
    }
}
