//! Virtual-device boundary.
//!
//! The session controller and the `OPENTUN` directive handler talk to the
//! platform through the [`DeviceConfigurator`] trait; the handle it returns
//! is what the engine needs to read and write packets.

use async_trait::async_trait;
use thiserror::Error;

use bridge_shared::TunnelConfigState;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::TunDeviceConfigurator;

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors from the device layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device establishment was rejected
    #[error("device setup rejected: {0}")]
    Setup(String),

    /// A netmask could not be interpreted
    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle for an established virtual network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Interface name assigned by the platform
    pub name: String,
    /// Raw descriptor handed to the engine via `tun-fd`
    pub raw_fd: i32,
}

/// Boundary consumed by the directive handlers and the session controller.
///
/// Callers are expected to pass a config with establish-time defaults
/// already applied (see `TunnelConfigState::establish_view`). The handle's
/// lifetime is scoped to the session; `release` is invoked during teardown.
#[async_trait]
pub trait DeviceConfigurator: Send + Sync {
    /// Create and configure the virtual device.
    async fn establish(&self, config: &TunnelConfigState) -> DeviceResult<DeviceHandle>;

    /// Tear the device down and close its descriptor.
    async fn release(&self, handle: DeviceHandle) -> DeviceResult<()>;
}

/// CIDR prefix length of a dotted-quad netmask.
///
/// Sums the set bits of each octet without checking that the mask is a
/// contiguous prefix; discontiguous masks are accepted silently for
/// compatibility with the engine's observed behavior.
pub fn cidr_prefix_len(netmask: &str) -> Option<u8> {
    let mut bits = 0u8;
    let mut octets = 0u8;
    for part in netmask.split('.') {
        // the engine can deliver arbitrary text here; stop before the
        // bit count can exceed what four octets allow
        if octets == 4 {
            return None;
        }
        let value: u8 = part.trim().parse().ok()?;
        bits += value.count_ones() as u8;
        octets += 1;
    }
    (octets == 4).then_some(bits)
}
