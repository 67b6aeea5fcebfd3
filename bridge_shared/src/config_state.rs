//! Interface configuration accumulated from the management channel.
//!
//! The engine pushes address, route and DNS directives incrementally while
//! a session is being established; this module collects them until the
//! virtual device is created.

/// One route pushed by the engine.
///
/// Duplicates are permitted; the engine delivers directives at least once
/// and the device layer is expected to tolerate repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Destination network, dotted IPv4
    pub network: String,
    /// Dotted-quad netmask
    pub netmask: String,
    /// Gateway address
    pub gateway: String,
}

/// Defaults applied when the engine never pushed the corresponding
/// directive before device establishment.
pub const DEFAULT_LOCAL_ADDRESS: &str = "10.8.0.6";
pub const DEFAULT_NETMASK: &str = "255.255.255.0";
pub const DEFAULT_DNS_SERVERS: [&str; 2] = ["8.8.8.8", "8.8.4.4"];
pub const DEFAULT_GATEWAY: &str = "10.8.0.1";
pub const CATCH_ALL_NETWORK: &str = "0.0.0.0";
pub const CATCH_ALL_NETMASK: &str = "0.0.0.0";

/// Mutable interface configuration for the current connection attempt.
///
/// Cleared at the start of each attempt, populated by `IFCONFIG` / `ROUTE`
/// / `DNS` directives, consumed once to establish the device and then
/// retained for diagnostics until the next attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelConfigState {
    /// Local tunnel address, if the engine has pushed one
    pub local_address: Option<String>,
    /// Dotted-quad netmask paired with `local_address`
    pub netmask: Option<String>,
    /// DNS servers in insertion order, deduplicated by value
    pub dns_servers: Vec<String>,
    /// Routes in arrival order, duplicates kept
    pub routes: Vec<RouteInfo>,
}

impl TunnelConfigState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local(&mut self, address: &str, netmask: &str) {
        self.local_address = Some(address.to_string());
        self.netmask = Some(netmask.to_string());
    }

    /// Append a DNS server. Empty strings and duplicates are dropped;
    /// returns whether the server was added.
    pub fn add_dns(&mut self, server: &str) -> bool {
        if server.is_empty() || self.dns_servers.iter().any(|s| s == server) {
            return false;
        }
        self.dns_servers.push(server.to_string());
        true
    }

    pub fn add_route(&mut self, route: RouteInfo) {
        self.routes.push(route);
    }

    /// Copy of this state with establish-time defaults applied: local
    /// address and netmask when unset, public DNS servers when none were
    /// pushed, and a catch-all route unless one is already present.
    pub fn establish_view(&self) -> TunnelConfigState {
        let mut view = self.clone();
        if view.local_address.is_none() {
            view.local_address = Some(DEFAULT_LOCAL_ADDRESS.to_string());
            view.netmask = Some(DEFAULT_NETMASK.to_string());
        }
        if view.netmask.is_none() {
            view.netmask = Some(DEFAULT_NETMASK.to_string());
        }
        if view.dns_servers.is_empty() {
            view.dns_servers = DEFAULT_DNS_SERVERS.iter().map(|s| s.to_string()).collect();
        }
        let has_catch_all = view
            .routes
            .iter()
            .any(|r| r.network == CATCH_ALL_NETWORK && r.netmask == CATCH_ALL_NETMASK);
        if !has_catch_all {
            view.routes.push(RouteInfo {
                network: CATCH_ALL_NETWORK.to_string(),
                netmask: CATCH_ALL_NETMASK.to_string(),
                gateway: DEFAULT_GATEWAY.to_string(),
            });
        }
        view
    }
}
