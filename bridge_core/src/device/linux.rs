//! Linux implementation of the device boundary on top of the `tun` crate.

use std::os::unix::io::AsRawFd;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use tun::{Configuration, Device, Layer};

use bridge_shared::TunnelConfigState;

use super::{cidr_prefix_len, DeviceConfigurator, DeviceError, DeviceHandle, DeviceResult};

const DEFAULT_MTU: i32 = 1500;

/// Creates TUN interfaces and hands their descriptors to the engine.
pub struct TunDeviceConfigurator {
    mtu: i32,
}

impl TunDeviceConfigurator {
    pub fn new() -> Self {
        Self { mtu: DEFAULT_MTU }
    }

    async fn run_command(&self, cmd: &str, args: &[&str]) -> DeviceResult<()> {
        debug!(command = cmd, ?args, "running network command");
        let output = Command::new(cmd)
            .args(args)
            .output()
            .await
            .map_err(|e| DeviceError::Setup(format!("failed to execute {cmd}: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeviceError::Setup(format!(
                "{cmd} failed with status {}: {stderr}",
                output.status
            )));
        }
        Ok(())
    }
}

impl Default for TunDeviceConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceConfigurator for TunDeviceConfigurator {
    async fn establish(&self, config: &TunnelConfigState) -> DeviceResult<DeviceHandle> {
        let local = config
            .local_address
            .as_deref()
            .ok_or_else(|| DeviceError::Setup("no local address in tunnel config".into()))?;
        let netmask = config
            .netmask
            .as_deref()
            .ok_or_else(|| DeviceError::Setup("no netmask in tunnel config".into()))?;
        let prefix = cidr_prefix_len(netmask)
            .ok_or_else(|| DeviceError::InvalidNetmask(netmask.to_string()))?;

        let mut tun_config = Configuration::default();
        tun_config.layer(Layer::L3);
        tun_config.mtu(self.mtu);

        let device = tun::create(&tun_config)
            .map_err(|e| DeviceError::Setup(format!("failed to create TUN device: {e}")))?;
        let name = device.name().to_string();
        let raw_fd = device.as_raw_fd();
        // The descriptor must outlive this call; the engine owns the
        // packet path until the session releases the handle.
        std::mem::forget(device);

        self.run_command("ip", &["addr", "add", &format!("{local}/{prefix}"), "dev", &name])
            .await?;
        self.run_command("ip", &["link", "set", "dev", &name, "up"])
            .await?;

        for dns in &config.dns_servers {
            debug!(server = %dns, "DNS server recorded for the tunnel");
        }
        for route in &config.routes {
            match cidr_prefix_len(&route.netmask) {
                Some(route_prefix) => debug!(
                    network = %route.network,
                    prefix = route_prefix,
                    gateway = %route.gateway,
                    "route recorded for the tunnel"
                ),
                None => warn!(
                    network = %route.network,
                    netmask = %route.netmask,
                    "skipping route with unparseable netmask"
                ),
            }
        }

        info!(interface = %name, fd = raw_fd, address = %local, prefix, "TUN device established");
        Ok(DeviceHandle { name, raw_fd })
    }

    async fn release(&self, handle: DeviceHandle) -> DeviceResult<()> {
        debug!(interface = %handle.name, fd = handle.raw_fd, "releasing TUN device");
        if unsafe { libc::close(handle.raw_fd) } != 0 {
            debug!(
                interface = %handle.name,
                error = %std::io::Error::last_os_error(),
                "TUN descriptor was already closed"
            );
        }
        if let Err(e) = self
            .run_command("ip", &["link", "delete", &handle.name])
            .await
        {
            debug!(interface = %handle.name, error = %e, "TUN link already gone");
        }
        Ok(())
    }
}
