//! Network inspection and kernel network state
//!
//! Each OS backend answers the same questions (default interface, its IPv4
//! address, the default gateway, the engine's TUN interface, the forwarding
//! flag) by running the platform's own tools and parsing what they print.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │    NetworkInspector (one contract)   │
//! └──────────────┬───────────────────────┘
//!                │
//!    ┌───────────┼──────────────┐
//!    ▼           ▼              ▼
//! ┌───────┐  ┌────────┐   ┌─────────┐
//! │ Linux │  │ macOS  │   │ Windows │   <- shell tools + parse.rs
//! │  ip   │  │ route, │   │ipconfig,│
//! │ /proc │  │ifconfig│   │  netsh  │
//! └───────┘  └────────┘   └─────────┘
//! ```
//!
//! Inspection is advisory: every query returns `NotFound` rather than a tool
//! error when nothing usable comes back, and `topology()` folds all of them
//! into a value that never fails.

pub mod darwin;
pub mod linux;
pub mod parse;
pub mod windows;

use crate::error::GatewayResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::debug;

pub use darwin::DarwinNetwork;
pub use linux::LinuxNetwork;
pub use parse::{is_tun_address, DefaultRoute, InterfaceAddrs};
pub use windows::WindowsNetwork;

/// Address block the engine uses for its TUN interface
pub const TUN_NETWORK: &str = "198.18.0.0/16";

/// Snapshot of the host's network topology, recomputed on every query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTopology {
    pub default_interface: Option<String>,
    pub interface_ip: Option<Ipv4Addr>,
    pub gateway_ip: Option<Ipv4Addr>,
    pub tun_interface: Option<String>,
}

/// Queries and mutates kernel network state
#[async_trait]
pub trait NetworkInspector: Send + Sync {
    /// Interface carrying the default route
    async fn detect_default_interface(&self) -> GatewayResult<String>;

    /// First non-loopback IPv4 address bound to `interface`
    async fn detect_interface_ip(&self, interface: &str) -> GatewayResult<Ipv4Addr>;

    /// Next hop of the default route
    async fn detect_gateway(&self) -> GatewayResult<Ipv4Addr>;

    /// Interface holding an address in the engine's TUN block
    async fn detect_tun_interface(&self) -> GatewayResult<String>;

    async fn is_ip_forwarding_enabled(&self) -> GatewayResult<bool>;

    /// Enable packet forwarding. Already enabled is success.
    async fn enable_ip_forwarding(&self) -> GatewayResult<()>;

    /// Disable packet forwarding. Already disabled is success.
    async fn disable_ip_forwarding(&self) -> GatewayResult<()>;

    /// Stop the OS firewall from filtering redirected traffic. Best effort:
    /// a host without a firewall subsystem is fine, so nothing is reported.
    async fn disable_firewall_interference(&self);

    /// Undo what `disable_firewall_interference` changed, best effort.
    async fn clear_firewall_rules(&self);

    /// Gather everything into one snapshot. Missing pieces stay `None`.
    async fn topology(&self) -> NetworkTopology {
        let default_interface = match self.detect_default_interface().await {
            Ok(name) => Some(name),
            Err(e) => {
                debug!("default interface undetected: {}", e);
                None
            }
        };

        let interface_ip = match &default_interface {
            Some(name) => self.detect_interface_ip(name).await.ok(),
            None => None,
        };

        NetworkTopology {
            default_interface,
            interface_ip,
            gateway_ip: self.detect_gateway().await.ok(),
            tun_interface: self.detect_tun_interface().await.ok(),
        }
    }
}

/// CPU architecture in the naming the engine's release assets use
pub fn detect_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "x86" => "386".to_string(),
        "arm" => "armv7".to_string(),
        other => {
            // Fall back to what the kernel reports for anything unusual
            std::process::Command::new("uname")
                .arg("-m")
                .output()
                .ok()
                .filter(|o| o.status.success())
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    /// Fixed answers, to check how `topology()` folds failures
    struct Fixed {
        interface: Option<&'static str>,
        tun: Option<&'static str>,
    }

    #[async_trait]
    impl NetworkInspector for Fixed {
        async fn detect_default_interface(&self) -> GatewayResult<String> {
            self.interface
                .map(String::from)
                .ok_or_else(|| GatewayError::NotFound("default interface".into()))
        }
        async fn detect_interface_ip(&self, _interface: &str) -> GatewayResult<Ipv4Addr> {
            Ok(Ipv4Addr::new(192, 168, 1, 100))
        }
        async fn detect_gateway(&self) -> GatewayResult<Ipv4Addr> {
            Err(GatewayError::NotFound("gateway".into()))
        }
        async fn detect_tun_interface(&self) -> GatewayResult<String> {
            self.tun
                .map(String::from)
                .ok_or_else(|| GatewayError::NotFound("TUN interface".into()))
        }
        async fn is_ip_forwarding_enabled(&self) -> GatewayResult<bool> {
            Ok(false)
        }
        async fn enable_ip_forwarding(&self) -> GatewayResult<()> {
            Ok(())
        }
        async fn disable_ip_forwarding(&self) -> GatewayResult<()> {
            Ok(())
        }
        async fn disable_firewall_interference(&self) {}
        async fn clear_firewall_rules(&self) {}
    }

    #[tokio::test]
    async fn test_topology_folds_failures() {
        let topology = Fixed { interface: Some("eth0"), tun: None }.topology().await;
        assert_eq!(topology.default_interface.as_deref(), Some("eth0"));
        assert_eq!(topology.interface_ip, Some(Ipv4Addr::new(192, 168, 1, 100)));
        assert_eq!(topology.gateway_ip, None);
        assert_eq!(topology.tun_interface, None);
    }

    #[tokio::test]
    async fn test_topology_without_interface_skips_ip() {
        let topology = Fixed { interface: None, tun: Some("utun4") }.topology().await;
        assert_eq!(topology, NetworkTopology {
            default_interface: None,
            interface_ip: None,
            gateway_ip: None,
            tun_interface: Some("utun4".to_string()),
        });
    }

    #[test]
    fn test_topology_serializes() {
        let topology = NetworkTopology {
            default_interface: Some("en0".into()),
            interface_ip: Some(Ipv4Addr::new(10, 0, 0, 2)),
            gateway_ip: None,
            tun_interface: None,
        };
        let json = serde_json::to_value(&topology).unwrap();
        assert_eq!(json["default_interface"], "en0");
        assert_eq!(json["interface_ip"], "10.0.0.2");
        assert!(json["gateway_ip"].is_null());
    }

    #[test]
    fn test_detect_arch_not_empty() {
        assert!(!detect_arch().is_empty());
    }
}
