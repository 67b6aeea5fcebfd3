//! Connection status reported by the bridge.

use std::fmt;
use std::str::FromStr;

/// State of the VPN connection as observed by the session controller.
///
/// The underlying engine is the source of truth, so transitions are not
/// strictly validated; a direct `Disconnected -> Connected` step is
/// tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No active session
    #[default]
    Disconnected,
    /// A session is starting or the engine is negotiating
    Connecting,
    /// The tunnel is up
    Connected,
    /// A session is being torn down
    Disconnecting,
    /// Status could not be determined
    Unknown,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnecting => "disconnecting",
            ConnectionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = std::convert::Infallible;

    /// Unrecognized values map to `Unknown` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "disconnected" => ConnectionStatus::Disconnected,
            "connecting" => ConnectionStatus::Connecting,
            "connected" => ConnectionStatus::Connected,
            "disconnecting" => ConnectionStatus::Disconnecting,
            _ => ConnectionStatus::Unknown,
        })
    }
}
