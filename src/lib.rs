//! libgateway - platform layer of the LAN proxy gateway
//!
//! Turns a host into a transparent proxy gateway for its LAN by driving the
//! mihomo proxy engine on Linux, macOS and Windows:
//! - Network inspection (default interface, gateway, TUN interface, IP forwarding)
//! - Engine process control (locate, start detached, two-phase stop)
//! - Persistent service registration (systemd, launchd, Windows SCM)
//!
//! Everything OS-specific sits behind three traits, selected once by
//! [`PlatformProvider`].

pub mod config;
pub mod error;
pub mod exec;
pub mod network;
pub mod platform;
pub mod process;
pub mod service;
pub mod validation;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use exec::{CommandOutput, CommandRunner, SystemRunner};
pub use network::{NetworkInspector, NetworkTopology};
pub use platform::{PlatformProvider, TargetOs};
pub use process::{EngineSpec, ProcessController, ProcessState, StopPhase};
pub use service::{ServiceDescriptor, ServiceInstaller};
