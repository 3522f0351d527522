use super::*;
use crate::config::{Config, ConfigHandle, TunnelConfig, TunnelTarget};
use crate::error::TunnelError;

fn cloudflare_config(token: &str) -> TunnelConfig {
    TunnelConfig {
        id: "cf".into(),
        name: None,
        enabled: false,
        local_port: None,
        target: TunnelTarget::Cloudflare {
            token: token.into(),
        },
    }
}

/// Helper: assert `create_client` returns an error containing `needle`.
fn assert_client_err(cfg: &TunnelConfig, needle: &str) {
    match create_client(cfg) {
        Err(e) => assert!(
            e.to_string().contains(needle),
            "Expected error containing \"{needle}\", got: {e}"
        ),
        Ok(_) => panic!("Expected error containing \"{needle}\", but got Ok"),
    }
}

#[test]
fn factory_cloudflare_with_token_ok() {
    let client = create_client(&cloudflare_config("test-token")).unwrap();
    assert_eq!(client.name(), "cloudflare");
}

#[test]
fn factory_cloudflare_empty_token_errors() {
    assert_client_err(&cloudflare_config("  "), "cloudflare token must not be empty");
}

#[test]
fn factory_ssh_ok() {
    let cfg = TunnelConfig {
        target: TunnelTarget::Ssh {
            host: " vps.example.com ".into(),
            port: 22,
            user: "deploy".into(),
            key_file: None,
            remote_port: 18317,
            remote_bind: "0.0.0.0".into(),
        },
        ..cloudflare_config("unused")
    };
    let client = create_client(&cfg).unwrap();
    assert_eq!(client.name(), "ssh");
    let cmd = client.command(8317);
    assert!(cmd.args.contains(&"deploy@vps.example.com".to_string()));
}

#[test]
fn factory_ssh_missing_user_errors() {
    let cfg = TunnelConfig {
        target: TunnelTarget::Ssh {
            host: "vps.example.com".into(),
            port: 22,
            user: String::new(),
            key_file: None,
            remote_port: 18317,
            remote_bind: "0.0.0.0".into(),
        },
        ..cloudflare_config("unused")
    };
    assert_client_err(&cfg, "ssh user must not be empty");
}

#[test]
fn factory_custom_empty_program_errors() {
    let cfg = TunnelConfig {
        target: TunnelTarget::Custom {
            program: String::new(),
            args: vec![],
            ready_pattern: None,
        },
        ..cloudflare_config("unused")
    };
    assert_client_err(&cfg, "custom tunnel program must not be empty");
}

#[test]
fn status_event_carries_public_url_and_retries() {
    let status = TunnelStatus {
        id: "t1".into(),
        state: TunnelState::Reconnecting,
        message: Some("network unreachable: boom".into()),
        public_url: None,
        retry_count: 2,
    };
    let event = status.to_event();
    assert_eq!(event.state, "reconnecting");
    assert_eq!(event.retry_count, Some(2));
    assert_eq!(event.message.as_deref(), Some("network unreachable: boom"));
}

#[cfg(unix)]
mod lifecycle {
    use super::*;
    use crate::process::ProcessCommand;
    use crate::status::{EntityKind, StatusBus};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    /// Shell-driven client: `READY` lines mean connected, `unreachable` and
    /// `denied` lines are classified as network and auth failures.
    struct ScriptClient {
        script: String,
    }

    impl ScriptClient {
        fn boxed(script: impl Into<String>) -> Box<dyn TunnelClient> {
            Box::new(Self {
                script: script.into(),
            })
        }
    }

    impl TunnelClient for ScriptClient {
        fn name(&self) -> &str {
            "script"
        }

        fn command(&self, local_port: u16) -> ProcessCommand {
            ProcessCommand::new("sh")
                .arg("-c")
                .arg(self.script.replace("{port}", &local_port.to_string()))
        }

        fn observe(&self, line: &str) -> LineSignal {
            if line.contains("READY") {
                LineSignal::Ready {
                    public_url: line.split_whitespace().nth(1).map(str::to_string),
                }
            } else if line.contains("unreachable") {
                LineSignal::Failure(FailureKind::NetworkUnreachable)
            } else if line.contains("denied") {
                LineSignal::Failure(FailureKind::AuthRejected)
            } else {
                LineSignal::Diagnostic
            }
        }

        fn secrets(&self) -> Vec<String> {
            vec!["s3cret".into()]
        }
    }

    fn settings(max_reconnects: u32, initial_backoff_ms: u64) -> ConnectionSettings {
        ConnectionSettings {
            local_port: 8317,
            backoff: Backoff::new(
                Duration::from_millis(initial_backoff_ms),
                Duration::from_millis(initial_backoff_ms * 4),
                false,
            ),
            max_reconnects,
            ready_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    async fn wait_for(connection: &TunnelConnection, state: TunnelState) -> TunnelStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let status = connection.status();
            if status.state == state {
                return status;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "tunnel never reached {state}, last status: {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn spawn_count(path: &Path) -> usize {
        std::fs::read_to_string(path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    /// Script that records each launch in `counter` before running `body`.
    fn counted(counter: &Path, body: &str) -> String {
        format!("echo run >> '{}'; {body}", counter.display())
    }

    #[tokio::test]
    async fn connects_and_reports_public_url() {
        let bus = StatusBus::default();
        let mut conn = TunnelConnection::new("t1", bus.clone());
        assert_eq!(conn.status().state, TunnelState::Disconnected);

        let status = conn.enable(
            ScriptClient::boxed("echo 'READY https://t1.example.com'; sleep 30"),
            settings(3, 10),
        );
        assert_eq!(status.state, TunnelState::Connecting);

        let status = wait_for(&conn, TunnelState::Connected).await;
        assert_eq!(status.public_url.as_deref(), Some("https://t1.example.com"));
        assert_eq!(status.retry_count, 0);

        let latest = bus.latest(EntityKind::Tunnel, "t1").unwrap();
        assert_eq!(latest.state, "connected");

        let status = conn.disable().await;
        assert_eq!(status.state, TunnelState::Disconnected);
        assert!(!conn.is_active());
    }

    #[tokio::test]
    async fn repeated_enable_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("runs");
        let mut conn = TunnelConnection::new("t1", StatusBus::default());

        conn.enable(
            ScriptClient::boxed(counted(&counter, "echo READY; sleep 30")),
            settings(3, 10),
        );
        wait_for(&conn, TunnelState::Connected).await;
        let again = conn.enable(
            ScriptClient::boxed(counted(&counter, "echo READY; sleep 30")),
            settings(3, 10),
        );
        assert_eq!(again.state, TunnelState::Connected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(spawn_count(&counter), 1);
        conn.disable().await;
    }

    #[tokio::test]
    async fn disable_is_idempotent() {
        let bus = StatusBus::default();
        let mut conn = TunnelConnection::new("t1", bus.clone());
        let mut rx = bus.subscribe();

        assert_eq!(conn.disable().await.state, TunnelState::Disconnected);
        assert_eq!(conn.disable().await.state, TunnelState::Disconnected);

        let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(quiet.is_err(), "disabling an idle tunnel must not publish");
    }

    /// Script that records its pid in `pid_file`, then runs `body`.
    fn with_pid(pid_file: &Path, body: &str) -> String {
        format!("echo $$ > '{}'; {body}", pid_file.display())
    }

    async fn read_pid(pid_file: &Path) -> libc::pid_t {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(pid) = std::fs::read_to_string(pid_file)
                .ok()
                .and_then(|s| s.trim().parse().ok())
            {
                return pid;
            }
            assert!(tokio::time::Instant::now() < deadline, "client never started");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn assert_gone(pid: libc::pid_t) {
        // SAFETY: signal 0 only checks whether the pid exists.
        let rc = unsafe { libc::kill(pid, 0) };
        let err = std::io::Error::last_os_error();
        assert_eq!(rc, -1, "client {pid} still running");
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }

    #[tokio::test]
    async fn disable_while_connecting_leaves_no_process() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("pid");
        let mut conn = TunnelConnection::new("t1", StatusBus::default());

        conn.enable(
            ScriptClient::boxed(with_pid(&pid_file, "exec sleep 30")),
            settings(3, 10),
        );
        let pid = read_pid(&pid_file).await;
        assert_eq!(conn.status().state, TunnelState::Connecting);

        conn.disable().await;
        assert_gone(pid);
    }

    #[tokio::test]
    async fn disable_while_connected_leaves_no_process() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("pid");
        let mut conn = TunnelConnection::new("t1", StatusBus::default());

        conn.enable(
            ScriptClient::boxed(with_pid(&pid_file, "echo READY; exec sleep 30")),
            settings(3, 10),
        );
        wait_for(&conn, TunnelState::Connected).await;
        let pid = read_pid(&pid_file).await;

        conn.disable().await;
        assert_gone(pid);
    }

    #[tokio::test]
    async fn disable_while_reconnecting_stays_disconnected() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("runs");
        let mut conn = TunnelConnection::new("t1", StatusBus::default());

        conn.enable(
            ScriptClient::boxed(counted(&counter, "echo 'host unreachable'; exit 1")),
            settings(5, 5_000),
        );
        let status = wait_for(&conn, TunnelState::Reconnecting).await;
        assert_eq!(status.retry_count, 1);

        let status = conn.disable().await;
        assert_eq!(status.state, TunnelState::Disconnected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(conn.status().state, TunnelState::Disconnected);
        assert_eq!(spawn_count(&counter), 1);
    }

    #[tokio::test]
    async fn gives_up_after_exact_reconnect_ceiling() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("runs");
        let bus = StatusBus::default();
        let mut rx = bus.subscribe();
        let mut conn = TunnelConnection::new("t1", bus.clone());

        conn.enable(
            ScriptClient::boxed(counted(&counter, "echo 'network is unreachable'; exit 255")),
            settings(3, 10),
        );
        let status = wait_for(&conn, TunnelState::Error).await;

        let message = status.message.unwrap();
        assert!(message.starts_with("network unreachable"), "{message}");
        assert!(message.contains("gave up after 3 reconnect attempts"), "{message}");
        assert_eq!(status.retry_count, 3);
        assert_eq!(spawn_count(&counter), 4);

        let mut states = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            states.push(event.state);
        }
        let first_retry = states.iter().position(|s| s == "reconnecting").unwrap();
        assert!(
            states[first_retry..].iter().all(|s| s != "connecting"),
            "{states:?}"
        );
        assert_eq!(states.last().map(String::as_str), Some("error"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(spawn_count(&counter), 4);
        conn.disable().await;
    }

    #[tokio::test]
    async fn auth_rejection_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("runs");
        let mut conn = TunnelConnection::new("t1", StatusBus::default());

        conn.enable(
            ScriptClient::boxed(counted(
                &counter,
                "echo 'permission denied for s3cret'; echo 'then unreachable'; exit 1",
            )),
            settings(5, 10),
        );
        let status = wait_for(&conn, TunnelState::Error).await;

        let message = status.message.unwrap();
        assert!(message.starts_with("authentication rejected"), "{message}");
        assert!(!message.contains("s3cret"), "{message}");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(spawn_count(&counter), 1);
    }

    #[tokio::test]
    async fn retry_counter_resets_after_connecting() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("runs");
        let mut conn = TunnelConnection::new("t1", StatusBus::default());

        // Every session connects, then drops shortly after.
        conn.enable(
            ScriptClient::boxed(counted(&counter, "echo READY; sleep 0.1; exit 1")),
            settings(1, 10),
        );
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while spawn_count(&counter) < 4 {
            assert!(tokio::time::Instant::now() < deadline, "{:?}", conn.status());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_ne!(conn.status().state, TunnelState::Error);
        conn.disable().await;
    }

    #[tokio::test]
    async fn ready_timeout_fails_session() {
        let mut conn = TunnelConnection::new("t1", StatusBus::default());
        let settings = ConnectionSettings {
            ready_timeout: Duration::from_millis(300),
            ..settings(0, 10)
        };
        conn.enable(ScriptClient::boxed("sleep 30"), settings);

        let status = wait_for(&conn, TunnelState::Error).await;
        assert!(
            status.message.unwrap().contains("did not become ready"),
            "timeout message expected"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_config_error() {
        let mut conn = TunnelConnection::new("t1", StatusBus::default());
        let client = Box::new(CustomTunnel::new(
            "/nonexistent/proxypal-tunnel-bin".into(),
            vec![],
            None,
        ));
        conn.enable(client, settings(5, 10));

        let status = wait_for(&conn, TunnelState::Error).await;
        assert!(
            status.message.unwrap().starts_with("invalid configuration"),
            "missing binary should not be retried"
        );
    }

    fn custom_tunnel(id: &str, script: &str, enabled: bool) -> TunnelConfig {
        TunnelConfig {
            id: id.into(),
            name: None,
            enabled,
            local_port: Some(18317),
            target: TunnelTarget::Custom {
                program: "sh".into(),
                args: vec!["-c".into(), script.into()],
                ready_pattern: Some("READY".into()),
            },
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.reliability.tunnel_initial_backoff_ms = 10;
        config.reliability.tunnel_max_backoff_ms = 40;
        config.reliability.shutdown_grace_secs = 1;
        config
    }

    fn registry_with(store: Arc<dyn TunnelStore>, bus: StatusBus) -> TunnelRegistry {
        TunnelRegistry::new(ConfigHandle::in_memory(fast_config()), store, bus)
    }

    async fn wait_registry(registry: &TunnelRegistry, id: &str, state: TunnelState) -> TunnelStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let status = registry.get(id).await.unwrap();
            if status.state == state {
                return status;
            }
            assert!(tokio::time::Instant::now() < deadline, "{status:?}");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn registry_add_list_remove() {
        let bus = StatusBus::default();
        let store = Arc::new(InMemoryTunnelStore::default());
        let registry = registry_with(store.clone(), bus.clone());

        let status = registry
            .add(custom_tunnel("b", "echo READY; sleep 30", true))
            .await
            .unwrap();
        assert_eq!(status.state, TunnelState::Disconnected);
        registry
            .add(custom_tunnel("a", "echo READY; sleep 30", false))
            .await
            .unwrap();

        let ids: Vec<String> = registry.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.load().unwrap().iter().all(|t| !t.enabled));

        let mut rx = bus.subscribe();
        registry.remove("b").await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.is_removal());
        assert!(bus.latest(EntityKind::Tunnel, "b").is_none());
        assert_eq!(store.load().unwrap().len(), 1);
        assert!(matches!(
            registry.remove("b").await,
            Err(TunnelError::NotFound(_))
        ));
    }

    /// In-memory store whose writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryTunnelStore,
        failing: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn set_failing(&self, failing: bool) {
            self.failing
                .store(failing, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl TunnelStore for FlakyStore {
        fn load(&self) -> Result<Vec<TunnelConfig>, TunnelError> {
            self.inner.load()
        }

        fn save(&self, tunnels: &[TunnelConfig]) -> Result<(), TunnelError> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TunnelError::Store("disk full".into()));
            }
            self.inner.save(tunnels)
        }
    }

    #[tokio::test]
    async fn failed_remove_leaves_tunnel_running() {
        let store = Arc::new(FlakyStore::default());
        let registry = registry_with(store.clone(), StatusBus::default());
        registry
            .add(custom_tunnel("t", "echo READY; sleep 30", false))
            .await
            .unwrap();
        registry.toggle("t", true).await.unwrap();
        wait_registry(&registry, "t", TunnelState::Connected).await;

        store.set_failing(true);
        assert!(matches!(
            registry.remove("t").await,
            Err(TunnelError::Store(_))
        ));
        assert_eq!(
            registry.get("t").await.unwrap().state,
            TunnelState::Connected
        );
        assert!(registry.configs().await[0].enabled);

        store.set_failing(false);
        let off = registry.toggle("t", false).await.unwrap();
        assert_eq!(off.state, TunnelState::Disconnected);
        registry.remove("t").await.unwrap();
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_and_invalid() {
        let registry = registry_with(Arc::new(InMemoryTunnelStore::default()), StatusBus::default());
        registry
            .add(custom_tunnel("dup", "true", false))
            .await
            .unwrap();
        assert!(matches!(
            registry.add(custom_tunnel("dup", "true", false)).await,
            Err(TunnelError::DuplicateId(id)) if id == "dup"
        ));
        assert!(matches!(
            registry.add(cloudflare_config("")).await,
            Err(TunnelError::InvalidConfig(_))
        ));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn registry_toggle_connects_and_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let counter = tmp.path().join("runs");
        let store = Arc::new(InMemoryTunnelStore::default());
        let registry = registry_with(store.clone(), StatusBus::default());
        registry
            .add(custom_tunnel(
                "t",
                &counted(&counter, "echo 'READY http://t.example.com'; sleep 30"),
                false,
            ))
            .await
            .unwrap();

        registry.toggle("t", true).await.unwrap();
        let status = wait_registry(&registry, "t", TunnelState::Connected).await;
        assert_eq!(status.public_url.as_deref(), Some("http://t.example.com"));
        assert!(store.load().unwrap()[0].enabled);

        let again = registry.toggle("t", true).await.unwrap();
        assert_eq!(again.state, TunnelState::Connected);
        assert_eq!(spawn_count(&counter), 1);

        let off = registry.toggle("t", false).await.unwrap();
        assert_eq!(off.state, TunnelState::Disconnected);
        assert!(!store.load().unwrap()[0].enabled);
        let off_again = registry.toggle("t", false).await.unwrap();
        assert_eq!(off_again.state, TunnelState::Disconnected);

        assert!(matches!(
            registry.toggle("missing", true).await,
            Err(TunnelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn registry_restore_reconnects_enabled_tunnels() {
        let store = Arc::new(InMemoryTunnelStore::new(vec![
            custom_tunnel("on", "echo READY; sleep 30", true),
            custom_tunnel("off", "echo READY; sleep 30", false),
            TunnelConfig {
                id: "broken".into(),
                enabled: true,
                ..cloudflare_config("")
            },
        ]));
        let registry = registry_with(store, StatusBus::default());

        let restored = registry.restore().await.unwrap();
        assert_eq!(restored.len(), 3);

        wait_registry(&registry, "on", TunnelState::Connected).await;
        assert_eq!(
            registry.get("off").await.unwrap().state,
            TunnelState::Disconnected
        );
        assert_eq!(
            registry.get("broken").await.unwrap().state,
            TunnelState::Disconnected
        );

        registry.shutdown().await;
        assert_eq!(
            registry.get("on").await.unwrap().state,
            TunnelState::Disconnected
        );
        assert!(registry.configs().await.iter().any(|t| t.id == "on" && t.enabled));
    }

    #[tokio::test]
    async fn registry_persists_through_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            config_path: tmp.path().join("config.toml"),
            state_dir: tmp.path().to_path_buf(),
            ..fast_config()
        };
        let handle = ConfigHandle::new(config);
        let registry = TunnelRegistry::new(
            handle.clone(),
            Arc::new(ConfigFileStore::new(handle.clone())),
            StatusBus::default(),
        );

        registry
            .add(custom_tunnel("persisted", "echo READY; sleep 30", false))
            .await
            .unwrap();
        registry.toggle("persisted", true).await.unwrap();
        registry.shutdown().await;

        let reloaded = Config::load_from(&tmp.path().join("config.toml")).unwrap();
        let tunnel = reloaded.tunnel("persisted").unwrap();
        assert!(tunnel.enabled);
        assert_eq!(tunnel.local_port, Some(18317));
    }
}
