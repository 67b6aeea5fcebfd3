//! Error types for session operations.

use std::io;
use thiserror::Error;

use crate::device::DeviceError;
use crate::engine::EngineError;

/// Result type for session operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors surfaced to the `connect` caller.
///
/// None of these are retried automatically; the caller must re-invoke
/// `connect`. Malformed protocol lines are recovered inside the read loop
/// and never reach this type.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The session configuration could not be persisted or read back
    #[error("invalid session configuration: {0}")]
    ConfigInvalid(String),

    /// The management socket could not be bound within the retry limit
    #[error("failed to bind management socket after {attempts} attempts: {source}")]
    BindFailed {
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Device establishment was rejected or returned no handle
    #[error("device setup failed: {0}")]
    DeviceSetup(#[from] DeviceError),

    /// The underlying engine refused to start
    #[error("engine failed to start: {0}")]
    EngineStart(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
