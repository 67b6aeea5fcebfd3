//! Shared building blocks for the OpenVPN management bridge.
//!
//! This crate provides the data model and the management-protocol line
//! grammar used by the session controller, along with settings loading
//! and the logging bootstrap.

pub mod config_state;
pub mod logging;
pub mod proto;
pub mod settings;
pub mod stats;
pub mod status;

// Re-export commonly used types for convenience
pub use config_state::{RouteInfo, TunnelConfigState};
pub use settings::BridgeSettings;
pub use stats::{StatsTracker, TunnelStatistics};
pub use status::ConnectionStatus;
