//! Linux network inspection via iproute2, procfs and sysfs

use super::parse::{self, DefaultRoute, InterfaceAddrs};
use super::NetworkInspector;
use crate::error::{GatewayError, GatewayResult};
use crate::exec::CommandRunner;
use crate::validation;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Conventional names probed when the routing table yields nothing
const FALLBACK_INTERFACES: &[&str] = &["eth0", "ens33", "enp0s3", "eno1", "wlan0"];

/// FORWARD rule inserted while the gateway runs, tagged so it can be found again
const FORWARD_RULE: &[&str] = &["FORWARD", "-m", "comment", "--comment", "lan-proxy-gateway", "-j", "ACCEPT"];

pub struct LinuxNetwork {
    runner: Arc<dyn CommandRunner>,
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl LinuxNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_roots(runner, PathBuf::from("/proc"), PathBuf::from("/sys"))
    }

    /// Use alternative procfs/sysfs mount points
    pub fn with_roots(runner: Arc<dyn CommandRunner>, proc_root: PathBuf, sys_root: PathBuf) -> Self {
        Self { runner, proc_root, sys_root }
    }

    fn forwarding_path(&self) -> PathBuf {
        self.proc_root.join("sys/net/ipv4/ip_forward")
    }

    async fn default_route(&self) -> Option<DefaultRoute> {
        // Structured output first; busybox and old iproute2 lack -json
        if let Some(out) = self.runner.stdout_of("ip", &["-json", "route", "show", "default"]).await {
            if let Some(route) = parse::parse_ip_route_json(&out) {
                return Some(route);
            }
        }

        let out = self.runner.stdout_of("ip", &["route", "show", "default"]).await?;
        parse::parse_ip_route_text(&out)
    }

    async fn interfaces(&self, dev: Option<&str>) -> Vec<InterfaceAddrs> {
        let mut json_args = vec!["-json", "addr", "show"];
        let mut text_args = vec!["addr", "show"];
        if let Some(dev) = dev {
            json_args.extend_from_slice(&["dev", dev]);
            text_args.extend_from_slice(&["dev", dev]);
        }

        if let Some(out) = self.runner.stdout_of("ip", &json_args).await {
            if let Some(interfaces) = parse::parse_ip_addr_json(&out) {
                return interfaces;
            }
        }

        match self.runner.stdout_of("ip", &text_args).await {
            Some(out) => parse::parse_ip_addr_text(&out),
            None => Vec::new(),
        }
    }

    async fn operstate_up(&self, interface: &str) -> bool {
        let path = self.sys_root.join("class/net").join(interface).join("operstate");
        match fs::read_to_string(&path).await {
            Ok(state) => state.trim().eq_ignore_ascii_case("up"),
            Err(_) => false,
        }
    }

    async fn set_forwarding(&self, enabled: bool) -> GatewayResult<()> {
        if self.is_ip_forwarding_enabled().await? == enabled {
            debug!("IP forwarding already {}", if enabled { "enabled" } else { "disabled" });
            return Ok(());
        }

        let path = self.forwarding_path();
        fs::write(&path, if enabled { "1" } else { "0" })
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied(
                    format!("cannot write {}: run as root", path.display())
                ),
                _ => GatewayError::Io(e),
            })?;

        info!("IP forwarding {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    fn forward_rule_args(action: &'static str) -> Vec<&'static str> {
        let mut args = vec![action];
        args.extend_from_slice(FORWARD_RULE);
        args
    }

    async fn has_forward_rule(&self) -> bool {
        self.runner
            .stdout_of("iptables", &Self::forward_rule_args("-C"))
            .await
            .is_some()
    }
}

#[async_trait]
impl NetworkInspector for LinuxNetwork {
    async fn detect_default_interface(&self) -> GatewayResult<String> {
        if let Some(name) = self.default_route().await.and_then(|r| r.interface) {
            return Ok(name);
        }

        for name in FALLBACK_INTERFACES {
            if self.operstate_up(name).await {
                debug!("no default route, falling back to {}", name);
                return Ok(name.to_string());
            }
        }

        Err(GatewayError::NotFound("default network interface".to_string()))
    }

    async fn detect_interface_ip(&self, interface: &str) -> GatewayResult<Ipv4Addr> {
        validation::validate_interface_name(interface)?;

        let interfaces = self.interfaces(Some(interface)).await;
        parse::addrs_of(&interfaces, interface)
            .and_then(|iface| parse::first_usable_ipv4(&iface.ipv4))
            .ok_or_else(|| GatewayError::NotFound(format!("IPv4 address of {}", interface)))
    }

    async fn detect_gateway(&self) -> GatewayResult<Ipv4Addr> {
        self.default_route()
            .await
            .and_then(|r| r.gateway)
            .ok_or_else(|| GatewayError::NotFound("default gateway".to_string()))
    }

    async fn detect_tun_interface(&self) -> GatewayResult<String> {
        let interfaces = self.interfaces(None).await;
        parse::find_tun_interface(&interfaces)
            .ok_or_else(|| GatewayError::NotFound(format!("TUN interface in {}", super::TUN_NETWORK)))
    }

    async fn is_ip_forwarding_enabled(&self) -> GatewayResult<bool> {
        let path = self.forwarding_path();
        let content = fs::read_to_string(&path).await?;
        match content.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(GatewayError::ParseError(
                format!("unexpected value '{}' in {}", other, path.display())
            )),
        }
    }

    async fn enable_ip_forwarding(&self) -> GatewayResult<()> {
        self.set_forwarding(true).await
    }

    async fn disable_ip_forwarding(&self) -> GatewayResult<()> {
        self.set_forwarding(false).await
    }

    async fn disable_firewall_interference(&self) {
        // Docker and some distributions default the FORWARD chain to DROP,
        // which silently eats LAN traffic on its way into the TUN interface.
        // The policy itself is left alone; one tagged ACCEPT rule goes first.
        let rules = match self.runner.stdout_of("iptables", &["-S", "FORWARD"]).await {
            Some(rules) => rules,
            None => {
                debug!("iptables unavailable, nothing to relax");
                return;
            }
        };

        if !rules.lines().any(|l| l.trim() == "-P FORWARD DROP") {
            return;
        }
        if self.has_forward_rule().await {
            debug!("FORWARD accept rule already present");
            return;
        }

        match self.runner.run_checked("iptables", &Self::forward_rule_args("-I")).await {
            Ok(_) => info!("Inserted iptables FORWARD accept rule"),
            Err(e) => warn!("Failed to insert iptables FORWARD rule: {}", e),
        }
    }

    async fn clear_firewall_rules(&self) {
        if !self.has_forward_rule().await {
            debug!("no FORWARD accept rule to remove");
            return;
        }

        match self.runner.run_checked("iptables", &Self::forward_rule_args("-D")).await {
            Ok(_) => info!("Removed iptables FORWARD accept rule"),
            Err(e) => warn!("Failed to remove iptables FORWARD rule: {}", e),
        }
    }
}
