//! Engine boundary.
//!
//! The VPN engine is an external collaborator that speaks the management
//! protocol and performs packet encryption. The bridge only starts and
//! stops it, handing it the persisted config and the management endpoint.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors from the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be started
    #[error("engine refused to start: {0}")]
    Start(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle of the external VPN engine.
#[async_trait]
pub trait VpnEngine: Send + Sync {
    /// Start the engine with the persisted config and the management
    /// socket it should connect back to.
    async fn start(&self, config: &Path, mgmt_socket: &Path) -> EngineResult<()>;

    /// Request engine shutdown. Must be safe to call when the engine is
    /// not running.
    async fn stop(&self) -> EngineResult<()>;
}

/// Runs the engine as a child process.
pub struct ProcessEngine {
    program: String,
    child: Mutex<Option<Child>>,
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl VpnEngine for ProcessEngine {
    async fn start(&self, config: &Path, mgmt_socket: &Path) -> EngineResult<()> {
        let mut guard = self.child.lock().await;
        if guard.is_some() {
            return Err(EngineError::Start("engine already running".into()));
        }

        let child = Command::new(&self.program)
            .arg("--config")
            .arg(config)
            .arg("--management")
            .arg(mgmt_socket)
            .arg("unix")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Start(format!("failed to spawn {}: {e}", self.program)))?;

        info!(program = %self.program, pid = child.id(), "engine process started");
        *guard = Some(child);
        Ok(())
    }

    async fn stop(&self) -> EngineResult<()> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            debug!("engine stop requested with no running process");
            return Ok(());
        };

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "engine process was already gone");
            return Ok(());
        }
        match tokio::time::timeout(Duration::from_millis(500), child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "engine process exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to reap engine process"),
            Err(_) => warn!("engine process did not exit after kill"),
        }
        Ok(())
    }
}
