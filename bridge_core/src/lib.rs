//! Session control plane for an external OpenVPN engine.
//!
//! The bridge owns the management-protocol socket, translates engine
//! directives into virtual-device configuration and status transitions,
//! tracks traffic counters and publishes both to observers.

pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod session;

pub use error::{BridgeError, BridgeResult};
pub use session::SessionController;
