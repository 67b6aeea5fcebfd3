//! Session lifecycle and status publication.
//!
//! The [`SessionController`] owns the management socket, the per-session
//! background tasks and the authoritative connection status. One session
//! exists per connection attempt; `connect` fully tears down any prior
//! session before creating a new one.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use bridge_shared::{
    BridgeSettings, ConnectionStatus, StatsTracker, TunnelConfigState, TunnelStatistics,
};

use crate::device::{DeviceConfigurator, DeviceHandle};
use crate::dispatch::DirectiveHandler;
use crate::engine::VpnEngine;
use crate::error::{BridgeError, BridgeResult};

/// Publishes status transitions and keeps the statistics channel
/// consistent with them.
///
/// Publication is value-deduplicated: setting the current status again is
/// a no-op, which is what makes racing teardown paths publish
/// `Disconnected` exactly once. Statistics become present at the
/// transition to `Connected` and absent at the transition to
/// `Disconnected`.
#[derive(Clone)]
pub struct StatusSink {
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    stats_tx: Arc<watch::Sender<Option<TunnelStatistics>>>,
    stats: Arc<Mutex<StatsTracker>>,
}

impl StatusSink {
    pub fn new(
        status_tx: Arc<watch::Sender<ConnectionStatus>>,
        stats_tx: Arc<watch::Sender<Option<TunnelStatistics>>>,
        stats: Arc<Mutex<StatsTracker>>,
    ) -> Self {
        Self {
            status_tx,
            stats_tx,
            stats,
        }
    }

    pub fn set(&self, next: ConnectionStatus) {
        let changed = self.status_tx.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
        if !changed {
            return;
        }
        match next {
            ConnectionStatus::Connected => {
                let snapshot = self.stats.lock().unwrap().snapshot();
                self.stats_tx.send_replace(Some(snapshot));
            }
            ConnectionStatus::Disconnected => {
                self.stats_tx.send_replace(None);
            }
            _ => {}
        }
    }
}

/// Everything needed to drive a session back to Idle. Shared between
/// `disconnect` and the read loop so an engine crash takes the same
/// teardown path as an explicit stop.
#[derive(Clone)]
struct SessionTeardown {
    stopping: Arc<AtomicBool>,
    sink: StatusSink,
    engine: Arc<dyn VpnEngine>,
    device: Arc<dyn DeviceConfigurator>,
    device_handle: Arc<Mutex<Option<DeviceHandle>>>,
}

impl SessionTeardown {
    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Stop the engine, release the device and settle the status.
    /// Idempotent; release errors are logged and swallowed.
    async fn run(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            // another teardown path got here first
            self.sink.set(ConnectionStatus::Disconnected);
            return;
        }
        self.sink.set(ConnectionStatus::Disconnecting);
        if let Err(e) = self.engine.stop().await {
            debug!(error = %e, "engine stop reported an error");
        }
        let handle = self.device_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = self.device.release(handle).await {
                debug!(error = %e, "device release reported an error");
            }
        }
        self.sink.set(ConnectionStatus::Disconnected);
    }
}

struct ActiveSession {
    id: Uuid,
    shutdown_tx: Option<oneshot::Sender<()>>,
    reader: JoinHandle<()>,
    sampler: JoinHandle<()>,
    teardown: SessionTeardown,
    socket_path: PathBuf,
    config_path: PathBuf,
}

/// Owns the control-protocol socket lifecycle and the observable
/// connection state.
pub struct SessionController {
    settings: BridgeSettings,
    device: Arc<dyn DeviceConfigurator>,
    engine: Arc<dyn VpnEngine>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    stats_tx: Arc<watch::Sender<Option<TunnelStatistics>>>,
    active: AsyncMutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(
        settings: BridgeSettings,
        device: Arc<dyn DeviceConfigurator>,
        engine: Arc<dyn VpnEngine>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (stats_tx, _) = watch::channel(None);
        Self {
            settings,
            device,
            engine,
            status_tx: Arc::new(status_tx),
            stats_tx: Arc::new(stats_tx),
            active: AsyncMutex::new(None),
        }
    }

    /// Start a new session from the given engine configuration text.
    ///
    /// Any prior session is torn down first. On failure the status is
    /// forced back to `Disconnected` and the error is surfaced; nothing
    /// is retried automatically.
    pub async fn connect(&self, config_text: &str) -> BridgeResult<()> {
        self.disconnect().await;

        let id = Uuid::new_v4();
        let stats = Arc::new(Mutex::new(StatsTracker::new()));
        let config_state = Arc::new(Mutex::new(TunnelConfigState::new()));
        let sink = StatusSink::new(self.status_tx.clone(), self.stats_tx.clone(), stats.clone());

        info!(session_id = %id, "starting session");
        sink.set(ConnectionStatus::Connecting);

        if config_text.trim().is_empty() {
            sink.set(ConnectionStatus::Disconnected);
            return Err(BridgeError::ConfigInvalid(
                "session configuration is empty".into(),
            ));
        }
        if let Err(e) = std::fs::create_dir_all(&self.settings.runtime_dir) {
            sink.set(ConnectionStatus::Disconnected);
            return Err(BridgeError::ConfigInvalid(format!(
                "failed to create runtime directory: {e}"
            )));
        }
        let config_path = self.settings.config_path();
        if let Err(e) = tokio::fs::write(&config_path, config_text).await {
            sink.set(ConnectionStatus::Disconnected);
            return Err(BridgeError::ConfigInvalid(format!(
                "failed to persist session configuration: {e}"
            )));
        }

        let socket_path = self.settings.socket_path();
        let listener = match bind_with_retry(
            &socket_path,
            self.settings.bind_retry_limit,
            self.settings.bind_retry_delay(),
        )
        .await
        {
            Ok(listener) => listener,
            Err(e) => {
                sink.set(ConnectionStatus::Disconnected);
                remove_quietly(&config_path);
                return Err(e);
            }
        };

        // Establish the device up front so a host that cannot create
        // interfaces fails the connect call instead of the first OPENTUN.
        let device_handle = Arc::new(Mutex::new(None));
        let initial_view = config_state.lock().unwrap().establish_view();
        match self.device.establish(&initial_view).await {
            Ok(handle) => {
                *device_handle.lock().unwrap() = Some(handle);
            }
            Err(e) => {
                sink.set(ConnectionStatus::Disconnected);
                remove_quietly(&config_path);
                remove_quietly(&socket_path);
                return Err(BridgeError::DeviceSetup(e));
            }
        }

        let teardown = SessionTeardown {
            stopping: Arc::new(AtomicBool::new(false)),
            sink: sink.clone(),
            engine: self.engine.clone(),
            device: self.device.clone(),
            device_handle: device_handle.clone(),
        };
        let handler = DirectiveHandler::new(
            config_state,
            stats.clone(),
            self.device.clone(),
            device_handle,
            sink,
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(listener, handler, shutdown_rx, teardown.clone(), id));
        let sampler = tokio::spawn(sampler_loop(
            stats,
            self.status_tx.subscribe(),
            self.stats_tx.clone(),
            self.settings.stats_interval(),
        ));

        *self.active.lock().await = Some(ActiveSession {
            id,
            shutdown_tx: Some(shutdown_tx),
            reader,
            sampler,
            teardown,
            socket_path: socket_path.clone(),
            config_path: config_path.clone(),
        });

        if let Err(e) = self.engine.start(&config_path, &socket_path).await {
            self.disconnect().await;
            return Err(BridgeError::EngineStart(e));
        }

        Ok(())
    }

    /// Tear down the active session. Idempotent and infallible; resource
    /// release errors are logged and swallowed.
    pub async fn disconnect(&self) {
        let taken = self.active.lock().await.take();
        let Some(mut session) = taken else {
            // No active session; make sure observers still see a settled
            // disconnected state.
            self.stats_tx.send_if_modified(|s| {
                if s.is_some() {
                    *s = None;
                    true
                } else {
                    false
                }
            });
            self.status_tx.send_if_modified(|s| {
                if *s != ConnectionStatus::Disconnected {
                    *s = ConnectionStatus::Disconnected;
                    true
                } else {
                    false
                }
            });
            return;
        };

        info!(session_id = %session.id, "tearing down session");
        if let Some(tx) = session.shutdown_tx.take() {
            let _ = tx.send(());
        }
        session.teardown.run().await;

        if tokio::time::timeout(self.settings.shutdown_grace(), &mut session.reader)
            .await
            .is_err()
        {
            warn!(session_id = %session.id, "read loop did not exit in time, aborting it");
            session.reader.abort();
        }
        session.sampler.abort();
        // the sampler may have raced a final snapshot past the clear in
        // teardown; settle the channel now that it is gone
        self.stats_tx.send_if_modified(|s| {
            if s.is_some() {
                *s = None;
                true
            } else {
                false
            }
        });

        remove_quietly(&session.socket_path);
        remove_quietly(&session.config_path);
        info!(session_id = %session.id, "session torn down");
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Latest statistics snapshot, absent while not connected.
    pub fn statistics(&self) -> Option<TunnelStatistics> {
        self.stats_tx.borrow().clone()
    }

    /// Stream of status transitions; latest-wins for slow observers,
    /// cancellable by dropping the receiver.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Stream of statistics snapshots, sampled once per interval while
    /// connected.
    pub fn watch_statistics(&self) -> watch::Receiver<Option<TunnelStatistics>> {
        self.stats_tx.subscribe()
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "failed to remove session file");
        }
    }
}

/// Bind the management socket, retrying on contention with a fixed delay.
/// A stale socket file from a previous session is removed once up front.
async fn bind_with_retry(
    path: &Path,
    attempts: u32,
    delay: Duration,
) -> BridgeResult<UnixListener> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    let mut last_err = None;
    for attempt in 1..=attempts {
        match UnixListener::bind(path) {
            Ok(listener) => {
                if attempt > 1 {
                    debug!(attempt, path = %path.display(), "management socket bound after retry");
                }
                return Ok(listener);
            }
            Err(e) => {
                debug!(attempt, path = %path.display(), error = %e, "management socket bind failed");
                last_err = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(BridgeError::BindFailed {
        attempts,
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "no bind attempts were made")),
    })
}

/// Accept the engine's control connection and process directives until
/// shutdown, disconnect or an I/O failure. A failure while no stop was
/// requested forces the shared teardown path.
async fn read_loop(
    listener: UnixListener,
    handler: DirectiveHandler,
    mut shutdown_rx: oneshot::Receiver<()>,
    teardown: SessionTeardown,
    session_id: Uuid,
) {
    let stream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, _)) => stream,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "failed to accept engine connection");
                teardown.run().await;
                return;
            }
        },
        _ = &mut shutdown_rx => {
            debug!(session_id = %session_id, "shutdown before the engine connected");
            return;
        }
    };
    info!(session_id = %session_id, "engine connected to the management socket");

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut stop_requested = false;
    loop {
        tokio::select! {
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    debug!(session_id = %session_id, line = %line, "management line");
                    if let Some(reply) = handler.handle_line(&line).await {
                        if let Err(e) = write_half.write_all(format!("{reply}\n").as_bytes()).await {
                            warn!(session_id = %session_id, error = %e, "failed to write management reply");
                        }
                    }
                }
                Ok(None) => {
                    info!(session_id = %session_id, "engine closed the management connection");
                    break;
                }
                Err(e) => {
                    if !teardown.stopping() {
                        error!(session_id = %session_id, error = %e, "management read failed");
                    }
                    break;
                }
            },
            _ = &mut shutdown_rx => {
                // best-effort termination request before the connection drops
                let _ = write_half.write_all(b"signal SIGTERM\n").await;
                stop_requested = true;
                break;
            }
        }
    }
    if !stop_requested {
        teardown.run().await;
    }
}

/// Publish a statistics snapshot once per interval while connected.
/// Cancelled by aborting the task during teardown.
async fn sampler_loop(
    stats: Arc<Mutex<StatsTracker>>,
    status_rx: watch::Receiver<ConnectionStatus>,
    stats_tx: Arc<watch::Sender<Option<TunnelStatistics>>>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if *status_rx.borrow() == ConnectionStatus::Connected {
            let snapshot = stats.lock().unwrap().snapshot();
            stats_tx.send_replace(Some(snapshot));
        }
    }
}
