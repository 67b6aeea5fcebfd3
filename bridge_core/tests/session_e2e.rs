//! End-to-end session tests against a scripted engine.
//!
//! The engine side of the management socket is played by a task that
//! writes a canned sequence of protocol lines, which exercises the whole
//! path: bind, accept, dispatch, status publication, statistics sampling
//! and teardown.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use bridge_core::device::{DeviceConfigurator, DeviceError, DeviceHandle, DeviceResult};
use bridge_core::engine::{EngineError, EngineResult, VpnEngine};
use bridge_core::{BridgeError, SessionController};
use bridge_shared::{BridgeSettings, ConnectionStatus, TunnelConfigState};

const WAIT: Duration = Duration::from_secs(5);

fn test_settings(runtime_dir: &Path) -> BridgeSettings {
    BridgeSettings {
        runtime_dir: runtime_dir.to_path_buf(),
        bind_retry_limit: 10,
        bind_retry_delay_ms: 2,
        stats_interval_ms: 20,
        shutdown_grace_ms: 500,
        ..BridgeSettings::default()
    }
}

#[derive(Default)]
struct MockDevice {
    establishes: AtomicUsize,
    releases: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl DeviceConfigurator for MockDevice {
    async fn establish(&self, _config: &TunnelConfigState) -> DeviceResult<DeviceHandle> {
        if self.fail {
            return Err(DeviceError::Setup("no device available".into()));
        }
        let n = self.establishes.fetch_add(1, Ordering::SeqCst);
        Ok(DeviceHandle {
            name: format!("tun{n}"),
            raw_fd: 7 + n as i32,
        })
    }

    async fn release(&self, _handle: DeviceHandle) -> DeviceResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays the engine's half of the management connection: connects to the
/// socket, writes the scripted lines, then drains replies until the
/// bridge closes the connection.
struct ScriptedEngine {
    script: Vec<String>,
    started: AtomicUsize,
    stopped: AtomicUsize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedEngine {
    fn new(script: &[&str]) -> Self {
        Self {
            script: script.iter().map(|s| s.to_string()).collect(),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl VpnEngine for ScriptedEngine {
    async fn start(&self, _config: &Path, mgmt_socket: &Path) -> EngineResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        let socket: PathBuf = mgmt_socket.to_path_buf();
        let task = tokio::spawn(async move {
            let stream = match UnixStream::connect(&socket).await {
                Ok(stream) => stream,
                Err(_) => return,
            };
            let (read_half, mut write_half) = stream.into_split();
            for line in script {
                if write_half
                    .write_all(format!("{line}\n").as_bytes())
                    .await
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });
        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn stop(&self) -> EngineResult<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        Ok(())
    }
}

/// An engine that refuses to start.
struct BrokenEngine;

#[async_trait]
impl VpnEngine for BrokenEngine {
    async fn start(&self, _config: &Path, _mgmt_socket: &Path) -> EngineResult<()> {
        Err(EngineError::Start("binary not found".into()))
    }

    async fn stop(&self) -> EngineResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn full_session_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(MockDevice::default());
    let engine = Arc::new(ScriptedEngine::new(&[
        ">INFO:OpenVPN Management Interface Version 5",
        ">PASSWORD:Need 'Auth' username/password",
        ">STATE:1000,WAIT",
        ">STATE:1001,CONNECTED",
        ">BYTECOUNT:100,200",
        ">BYTECOUNT:300,400",
    ]));
    let controller = SessionController::new(
        test_settings(dir.path()),
        device.clone(),
        engine.clone(),
    );

    let mut status_rx = controller.watch_status();
    controller.connect("client\nremote vpn.example.com 1194\n").await.unwrap();

    // Connecting is published synchronously inside connect, well before
    // the scripted CONNECTED line can arrive
    assert_eq!(*status_rx.borrow_and_update(), ConnectionStatus::Connecting);

    timeout(WAIT, status_rx.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .expect("never reached Connected")
        .unwrap();

    // the sampler must surface the last reported counters
    let mut stats_rx = controller.watch_statistics();
    let snapshot = timeout(
        WAIT,
        stats_rx.wait_for(|s| s.as_ref().map(|v| v.bytes_received) == Some(300)),
    )
    .await
    .expect("sampled statistics never caught up")
    .unwrap()
    .clone()
    .unwrap();
    assert_eq!(snapshot.bytes_sent, 400);
    assert!(snapshot.observed_at_epoch_millis > 0);

    controller.disconnect().await;
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    assert_eq!(controller.statistics(), None);
    assert_eq!(device.establishes.load(Ordering::SeqCst), 1);
    assert_eq!(device.releases.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stopped.load(Ordering::SeqCst), 1);
    assert!(!dir.path().join("mgmt.sock").exists());
    assert!(!dir.path().join("session.ovpn").exists());
}

#[tokio::test]
async fn disconnect_is_idempotent_and_publishes_once() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(MockDevice::default());
    let engine = Arc::new(ScriptedEngine::new(&[">STATE:1000,CONNECTED"]));
    let controller =
        SessionController::new(test_settings(dir.path()), device.clone(), engine.clone());

    let mut status_rx = controller.watch_status();
    controller.connect("client\n").await.unwrap();
    timeout(WAIT, status_rx.wait_for(|s| *s == ConnectionStatus::Connected))
        .await
        .expect("never reached Connected")
        .unwrap();

    controller.disconnect().await;
    controller.disconnect().await;

    // value-deduplicated publication: one Disconnected, no matter how
    // many stop calls race
    let mut seen_disconnected = 0;
    while timeout(Duration::from_millis(50), status_rx.changed())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
    {
        if *status_rx.borrow() == ConnectionStatus::Disconnected {
            seen_disconnected += 1;
        }
    }
    assert_eq!(seen_disconnected, 1);
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn bind_exhaustion_surfaces_attempt_count() {
    let dir = tempfile::tempdir().unwrap();
    // a directory on the socket path defeats both the stale-file cleanup
    // and every bind attempt
    std::fs::create_dir(dir.path().join("mgmt.sock")).unwrap();
    let device = Arc::new(MockDevice::default());
    let engine = Arc::new(ScriptedEngine::new(&[]));
    let controller =
        SessionController::new(test_settings(dir.path()), device.clone(), engine.clone());

    let err = controller.connect("client\n").await.unwrap_err();
    match err {
        BridgeError::BindFailed { attempts, .. } => assert_eq!(attempts, 10),
        other => panic!("expected BindFailed, got {other:?}"),
    }
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    assert_eq!(device.establishes.load(Ordering::SeqCst), 0);
    assert_eq!(engine.started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mgmt.sock"), b"").unwrap();
    let device = Arc::new(MockDevice::default());
    let engine = Arc::new(ScriptedEngine::new(&[">INFO:hello"]));
    let controller =
        SessionController::new(test_settings(dir.path()), device.clone(), engine.clone());

    controller.connect("client\n").await.unwrap();
    assert_eq!(engine.started.load(Ordering::SeqCst), 1);
    controller.disconnect().await;
}

#[tokio::test]
async fn empty_configuration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(MockDevice::default());
    let engine = Arc::new(ScriptedEngine::new(&[]));
    let controller =
        SessionController::new(test_settings(dir.path()), device.clone(), engine.clone());

    let err = controller.connect("   \n  ").await.unwrap_err();
    assert!(matches!(err, BridgeError::ConfigInvalid(_)));
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    assert_eq!(engine.started.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn device_failure_aborts_the_connect() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(MockDevice {
        fail: true,
        ..Default::default()
    });
    let engine = Arc::new(ScriptedEngine::new(&[]));
    let controller =
        SessionController::new(test_settings(dir.path()), device.clone(), engine.clone());

    let err = controller.connect("client\n").await.unwrap_err();
    assert!(matches!(err, BridgeError::DeviceSetup(_)));
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    assert_eq!(engine.started.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("mgmt.sock").exists());
}

#[tokio::test]
async fn engine_start_failure_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let device = Arc::new(MockDevice::default());
    let controller = SessionController::new(
        test_settings(dir.path()),
        device.clone(),
        Arc::new(BrokenEngine),
    );

    let err = controller.connect("client\n").await.unwrap_err();
    assert!(matches!(err, BridgeError::EngineStart(_)));
    assert_eq!(controller.status(), ConnectionStatus::Disconnected);
    // the eagerly established device must not leak
    assert_eq!(device.establishes.load(Ordering::SeqCst), 1);
    assert_eq!(device.releases.load(Ordering::SeqCst), 1);
}
