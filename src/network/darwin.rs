//! macOS network inspection via route, ifconfig, ipconfig, sysctl and pfctl

use super::parse;
use super::NetworkInspector;
use crate::error::{GatewayError, GatewayResult};
use crate::exec::CommandRunner;
use crate::validation;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

const FORWARDING_KEY: &str = "net.inet.ip.forwarding";

/// Built-in Ethernet/Wi-Fi ports probed when `route` yields nothing
const FALLBACK_INTERFACES: &[&str] = &["en0", "en1", "en2"];

pub struct DarwinNetwork {
    runner: Arc<dyn CommandRunner>,
}

impl DarwinNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn default_route(&self) -> Option<parse::DefaultRoute> {
        let out = self.runner.stdout_of("route", &["-n", "get", "default"]).await?;
        parse::parse_route_get(&out)
    }

    async fn set_forwarding(&self, enabled: bool) -> GatewayResult<()> {
        if self.is_ip_forwarding_enabled().await? == enabled {
            debug!("IP forwarding already {}", if enabled { "enabled" } else { "disabled" });
            return Ok(());
        }

        let assignment = format!("{}={}", FORWARDING_KEY, if enabled { 1 } else { 0 });
        self.runner.run_checked("sysctl", &["-w", &assignment]).await?;
        info!("IP forwarding {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    async fn disable_pf(&self) {
        // pfctl -d fails when pf was never enabled; that is the state we want
        match self.runner.run("pfctl", &["-d"]).await {
            Ok(output) if output.success() => info!("pf packet filter disabled"),
            Ok(output) => debug!("pfctl -d: {}", output.stderr.trim()),
            Err(e) => debug!("pfctl unavailable: {}", e),
        }
    }
}

#[async_trait]
impl NetworkInspector for DarwinNetwork {
    async fn detect_default_interface(&self) -> GatewayResult<String> {
        if let Some(name) = self.default_route().await.and_then(|r| r.interface) {
            return Ok(name);
        }

        for name in FALLBACK_INTERFACES {
            if let Some(out) = self.runner.stdout_of("ifconfig", &[name]).await {
                if parse::ifconfig_is_active(&out) {
                    debug!("no default route, falling back to active {}", name);
                    return Ok(name.to_string());
                }
            }
        }

        Err(GatewayError::NotFound("default network interface".to_string()))
    }

    async fn detect_interface_ip(&self, interface: &str) -> GatewayResult<Ipv4Addr> {
        validation::validate_interface_name(interface)?;

        // ipconfig prints just the address when there is one
        if let Some(out) = self.runner.stdout_of("ipconfig", &["getifaddr", interface]).await {
            if let Ok(ip) = out.trim().parse::<Ipv4Addr>() {
                if !ip.is_loopback() {
                    return Ok(ip);
                }
            }
        }

        let out = self.runner.stdout_of("ifconfig", &[interface]).await.unwrap_or_default();
        let interfaces = parse::parse_ifconfig(&out);
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
        let out = self.runner.stdout_of("ifconfig", &[]).await.unwrap_or_default();
        parse::find_tun_interface(&parse::parse_ifconfig(&out))
            .ok_or_else(|| GatewayError::NotFound(format!("TUN interface in {}", super::TUN_NETWORK)))
    }

    async fn is_ip_forwarding_enabled(&self) -> GatewayResult<bool> {
        let output = self.runner.run_checked("sysctl", &["-n", FORWARDING_KEY]).await?;
        parse::parse_sysctl_flag(&output.stdout).ok_or_else(|| GatewayError::ParseError(
            format!("unexpected {} value '{}'", FORWARDING_KEY, output.stdout.trim())
        ))
    }

    async fn enable_ip_forwarding(&self) -> GatewayResult<()> {
        self.set_forwarding(true).await
    }

    async fn disable_ip_forwarding(&self) -> GatewayResult<()> {
        self.set_forwarding(false).await
    }

    async fn disable_firewall_interference(&self) {
        self.disable_pf().await;
    }

    async fn clear_firewall_rules(&self) {
        self.disable_pf().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;

    const ROUTE_GET: &str = "   route to: default\ndestination: default\n    gateway: 192.168.31.1\n  interface: en0\n";

    #[tokio::test]
    async fn test_route_get() {
        let runner = Arc::new(ScriptedRunner::new().ok("route -n get default", ROUTE_GET));
        let net = DarwinNetwork::new(runner);
        assert_eq!(net.detect_default_interface().await.unwrap(), "en0");
        assert_eq!(net.detect_gateway().await.unwrap(), Ipv4Addr::new(192, 168, 31, 1));
    }

    #[tokio::test]
    async fn test_fallback_to_active_port() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("route -n get default", 1, "", "route: writing to routing socket: not in table")
                .ok("ifconfig en0", "en0: flags=8863<UP> mtu 1500\n\tstatus: inactive\n")
                .ok("ifconfig en1", "en1: flags=8863<UP> mtu 1500\n\tinet 10.0.0.5 netmask 0xffffff00\n\tstatus: active\n"),
        );
        let net = DarwinNetwork::new(runner);
        assert_eq!(net.detect_default_interface().await.unwrap(), "en1");
    }

    #[tokio::test]
    async fn test_no_interface_is_not_found() {
        let net = DarwinNetwork::new(Arc::new(ScriptedRunner::new()));
        assert!(net.detect_default_interface().await.unwrap_err().is_not_found());
        assert!(net.detect_tun_interface().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_interface_ip_falls_back_to_ifconfig() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("ipconfig getifaddr en0", 1, "", "")
                .ok("ifconfig en0", "en0: flags=8863<UP> mtu 1500\n\tinet 127.0.0.1 netmask 0xff000000\n\tinet 192.168.31.20 netmask 0xffffff00\n"),
        );
        let net = DarwinNetwork::new(runner);
        assert_eq!(net.detect_interface_ip("en0").await.unwrap(), Ipv4Addr::new(192, 168, 31, 20));
    }

    #[tokio::test]
    async fn test_enable_forwarding_skips_when_enabled() {
        let runner = Arc::new(ScriptedRunner::new().ok("sysctl -n net.inet.ip.forwarding", "1\n"));
        let net = DarwinNetwork::new(runner.clone());
        net.enable_ip_forwarding().await.unwrap();
        net.enable_ip_forwarding().await.unwrap();
        assert!(!runner.calls().iter().any(|c| c.starts_with("sysctl -w")));
    }

    #[tokio::test]
    async fn test_disable_forwarding_writes_once() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("sysctl -n net.inet.ip.forwarding", "1\n")
                .ok("sysctl -n net.inet.ip.forwarding", "0\n")
                .ok("sysctl -w net.inet.ip.forwarding=0", "net.inet.ip.forwarding: 1 -> 0\n"),
        );
        let net = DarwinNetwork::new(runner.clone());
        net.disable_ip_forwarding().await.unwrap();
        net.disable_ip_forwarding().await.unwrap();
        let writes = runner.calls().iter().filter(|c| c.starts_with("sysctl -w")).count();
        assert_eq!(writes, 1);
    }

    #[tokio::test]
    async fn test_forwarding_permission_error_surfaces() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("sysctl -n net.inet.ip.forwarding", "0\n")
                .reply("sysctl -w net.inet.ip.forwarding=1", 1, "", "sysctl: net.inet.ip.forwarding=1: Operation not permitted"),
        );
        let err = DarwinNetwork::new(runner).enable_ip_forwarding().await.unwrap_err();
        assert!(err.to_string().contains("Operation not permitted"));
    }

    #[tokio::test]
    async fn test_pf_failures_swallowed() {
        let runner = Arc::new(ScriptedRunner::new().reply("pfctl -d", 1, "", "pfctl: pf not enabled"));
        let net = DarwinNetwork::new(runner.clone());
        net.disable_firewall_interference().await;
        net.clear_firewall_rules().await;
        assert_eq!(runner.calls(), vec!["pfctl -d", "pfctl -d"]);
    }
}
