//! Directive handlers for the management read loop.
//!
//! Each incoming line is classified by `bridge_shared::proto` and handled
//! here: handlers mutate the accumulated tunnel config and traffic
//! counters, drive status transitions, and produce the reply line the
//! engine expects. Handlers are total: a malformed directive yields its
//! `cancel` acknowledgment instead of an error, so a single bad line can
//! never stall the control channel.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use bridge_shared::proto::{self, reply, Directive, NeedKind};
use bridge_shared::{RouteInfo, StatsTracker, TunnelConfigState};

use crate::device::{DeviceConfigurator, DeviceHandle};
use crate::session::StatusSink;

const DEFAULT_ROUTE_GATEWAY: &str = "0.0.0.0";

/// Per-session handler state shared with the read loop.
pub struct DirectiveHandler {
    config: Arc<Mutex<TunnelConfigState>>,
    stats: Arc<Mutex<StatsTracker>>,
    device: Arc<dyn DeviceConfigurator>,
    device_handle: Arc<Mutex<Option<DeviceHandle>>>,
    status: StatusSink,
}

impl DirectiveHandler {
    pub fn new(
        config: Arc<Mutex<TunnelConfigState>>,
        stats: Arc<Mutex<StatsTracker>>,
        device: Arc<dyn DeviceConfigurator>,
        device_handle: Arc<Mutex<Option<DeviceHandle>>>,
        status: StatusSink,
    ) -> Self {
        Self {
            config,
            stats,
            device,
            device_handle,
            status,
        }
    }

    /// Handle one line from the management connection; returns the reply
    /// to write back, if the directive calls for one.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        match proto::parse_line(line) {
            Directive::PasswordPrompt => Some(reply::password()),
            Directive::NeedOk { kind, args } => Some(self.handle_need_ok(kind, args).await),
            Directive::State(Some(status)) => {
                info!(status = %status, "engine reported state change");
                self.status.set(status);
                None
            }
            Directive::State(None) => {
                debug!(line = %line, "engine state with no recognized phase");
                None
            }
            Directive::ByteCount {
                bytes_in,
                bytes_out,
            } => {
                self.stats.lock().unwrap().record(bytes_in, bytes_out);
                None
            }
            Directive::Informational => {
                debug!(line = %line, "management info");
                None
            }
            Directive::Ignored => None,
        }
    }

    async fn handle_need_ok(&self, kind: NeedKind, args: Vec<String>) -> String {
        match kind {
            NeedKind::OpenTun => self.open_tun().await,
            NeedKind::Ifconfig => self.ifconfig(&args),
            NeedKind::Route => self.route(&args),
            NeedKind::Dns => self.dns(&args),
            NeedKind::Other(_) => {
                debug!(kind = kind.as_str(), "acknowledging unrecognized need");
                reply::needok_ok(&kind)
            }
        }
    }

    /// Establish the device from the accumulated config. The engine may
    /// deliver `OPENTUN` more than once; a previously established device
    /// is released and replaced.
    async fn open_tun(&self) -> String {
        let view = self.config.lock().unwrap().establish_view();
        match self.device.establish(&view).await {
            Ok(handle) => {
                info!(interface = %handle.name, fd = handle.raw_fd, "device established");
                let previous = self.device_handle.lock().unwrap().replace(handle.clone());
                if let Some(old) = previous {
                    if let Err(e) = self.device.release(old).await {
                        warn!(error = %e, "failed to release superseded device");
                    }
                }
                reply::tun_fd(handle.raw_fd)
            }
            Err(e) => {
                warn!(error = %e, "device establishment failed");
                reply::needok_cancel(&NeedKind::OpenTun)
            }
        }
    }

    fn ifconfig(&self, args: &[String]) -> String {
        let (Some(address), Some(netmask)) = (args.first(), args.get(1)) else {
            warn!("malformed IFCONFIG directive, cancelling");
            return reply::needok_cancel(&NeedKind::Ifconfig);
        };
        self.config.lock().unwrap().set_local(address, netmask);
        debug!(address = %address, netmask = %netmask, "local address configured");
        reply::needok_ok(&NeedKind::Ifconfig)
    }

    fn route(&self, args: &[String]) -> String {
        let (Some(network), Some(netmask)) = (args.first(), args.get(1)) else {
            warn!("malformed ROUTE directive, cancelling");
            return reply::needok_cancel(&NeedKind::Route);
        };
        let gateway = args
            .get(2)
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROUTE_GATEWAY.to_string());
        debug!(network = %network, netmask = %netmask, gateway = %gateway, "route added");
        self.config.lock().unwrap().add_route(RouteInfo {
            network: network.clone(),
            netmask: netmask.clone(),
            gateway,
        });
        reply::needok_ok(&NeedKind::Route)
    }

    fn dns(&self, args: &[String]) -> String {
        let Some(server) = args.first() else {
            warn!("malformed DNS directive, cancelling");
            return reply::needok_cancel(&NeedKind::Dns);
        };
        if self.config.lock().unwrap().add_dns(server) {
            debug!(server = %server, "DNS server added");
        }
        reply::needok_ok(&NeedKind::Dns)
    }
}
