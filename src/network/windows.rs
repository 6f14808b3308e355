//! Windows network inspection via ipconfig, route and netsh
//!
//! The tools print localized labels, so adapters are recognised by shape
//! (header lines, dotted quads) rather than exact English wording.

use super::parse::{self, InterfaceAddrs};
use super::NetworkInspector;
use crate::error::{GatewayError, GatewayResult};
use crate::exec::CommandRunner;
use crate::validation;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

pub struct WindowsNetwork {
    runner: Arc<dyn CommandRunner>,
}

impl WindowsNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn adapters(&self) -> Vec<InterfaceAddrs> {
        match self.runner.stdout_of("ipconfig", &[]).await {
            Some(out) => parse::parse_ipconfig(&out),
            None => Vec::new(),
        }
    }

    async fn set_forwarding(&self, enabled: bool) -> GatewayResult<()> {
        if self.is_ip_forwarding_enabled().await? == enabled {
            debug!("IP forwarding already {}", if enabled { "enabled" } else { "disabled" });
            return Ok(());
        }

        let setting = if enabled { "forwarding=enabled" } else { "forwarding=disabled" };
        self.runner
            .run_checked("netsh", &["interface", "ipv4", "set", "global", setting])
            .await?;
        info!("IP forwarding {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }
}

/// Adapter carrying the default route: one with both a gateway and an
/// address, else any adapter with a usable address outside the TUN block.
fn pick_default_adapter(adapters: &[InterfaceAddrs]) -> Option<&InterfaceAddrs> {
    adapters
        .iter()
        .find(|a| !a.gateways.is_empty() && parse::first_usable_ipv4(&a.ipv4).is_some())
        .or_else(|| {
            adapters.iter().find(|a| {
                parse::first_usable_ipv4(&a.ipv4).map_or(false, |ip| !parse::is_tun_address(&ip))
            })
        })
}

#[async_trait]
impl NetworkInspector for WindowsNetwork {
    async fn detect_default_interface(&self) -> GatewayResult<String> {
        let adapters = self.adapters().await;
        pick_default_adapter(&adapters)
            .map(|a| a.name.clone())
            .ok_or_else(|| GatewayError::NotFound("default network adapter".to_string()))
    }

    async fn detect_interface_ip(&self, interface: &str) -> GatewayResult<Ipv4Addr> {
        validation::validate_adapter_name(interface)?;

        let adapters = self.adapters().await;
        parse::addrs_of(&adapters, interface)
            .and_then(|a| parse::first_usable_ipv4(&a.ipv4))
            .ok_or_else(|| GatewayError::NotFound(format!("IPv4 address of {}", interface)))
    }

    async fn detect_gateway(&self) -> GatewayResult<Ipv4Addr> {
        if let Some(out) = self.runner.stdout_of("route", &["print", "0.0.0.0"]).await {
            if let Some(gateway) = parse::parse_route_print_gateway(&out) {
                return Ok(gateway);
            }
        }

        let adapters = self.adapters().await;
        pick_default_adapter(&adapters)
            .and_then(|a| a.gateways.first().copied())
            .ok_or_else(|| GatewayError::NotFound("default gateway".to_string()))
    }

    async fn detect_tun_interface(&self) -> GatewayResult<String> {
        let adapters = self.adapters().await;
        parse::find_tun_interface(&adapters)
            .ok_or_else(|| GatewayError::NotFound(format!("TUN interface in {}", super::TUN_NETWORK)))
    }

    async fn is_ip_forwarding_enabled(&self) -> GatewayResult<bool> {
        let output = self
            .runner
            .run_checked("netsh", &["interface", "ipv4", "show", "global"])
            .await?;
        parse::parse_netsh_forwarding(&output.stdout).ok_or_else(|| {
            GatewayError::ParseError("no forwarding state in netsh output".to_string())
        })
    }

    async fn enable_ip_forwarding(&self) -> GatewayResult<()> {
        self.set_forwarding(true).await
    }

    async fn disable_ip_forwarding(&self) -> GatewayResult<()> {
        self.set_forwarding(false).await
    }

    async fn disable_firewall_interference(&self) {
        // Windows Firewall does not filter forwarded traffic
        debug!("no firewall changes needed on Windows");
    }

    async fn clear_firewall_rules(&self) {
        debug!("no firewall rules to clear on Windows");
    }
}
