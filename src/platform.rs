//! OS backend selection
//!
//! `PlatformProvider` is built once and hands out the network, process and
//! service backends for one target OS. Callers never branch on the OS
//! themselves.

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::exec::{CommandRunner, SystemRunner};
use crate::network::{DarwinNetwork, LinuxNetwork, NetworkInspector, WindowsNetwork};
use crate::process::{DarwinProcess, EngineSpec, LinuxProcess, ProcessController, WindowsProcess};
use crate::service::{LaunchdInstaller, ScInstaller, ServiceInstaller, SystemdInstaller};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Operating systems with a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Linux,
    MacOs,
    Windows,
}

impl TargetOs {
    /// The OS this binary was built for
    pub fn current() -> GatewayResult<Self> {
        if cfg!(target_os = "linux") {
            Ok(TargetOs::Linux)
        } else if cfg!(target_os = "macos") {
            Ok(TargetOs::MacOs)
        } else if cfg!(windows) {
            Ok(TargetOs::Windows)
        } else {
            Err(GatewayError::NotSupported(format!(
                "operating system '{}'",
                std::env::consts::OS
            )))
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Linux => write!(f, "linux"),
            TargetOs::MacOs => write!(f, "macos"),
            TargetOs::Windows => write!(f, "windows"),
        }
    }
}

/// Engine to manage on `os`, with configured overrides applied.
///
/// The process-table name is the explicit `name`, else the file name of a
/// configured `binary`, else the platform default.
pub fn engine_for(os: TargetOs, config: &GatewayConfig) -> EngineSpec {
    let mut engine = EngineSpec::for_os(os);
    let binary_name = config
        .engine
        .binary
        .as_ref()
        .and_then(|b| b.file_name())
        .map(|n| n.to_string_lossy().into_owned());
    if let Some(name) = config.engine.name.clone().or(binary_name) {
        engine.name = name;
    }
    match &config.engine.binary {
        Some(binary) => engine.prefer_binary(binary.clone()),
        None => engine,
    }
}

pub struct PlatformProvider {
    os: TargetOs,
    runner: Arc<dyn CommandRunner>,
    network: Box<dyn NetworkInspector>,
    process: Box<dyn ProcessController>,
    service: Box<dyn ServiceInstaller>,
}

impl PlatformProvider {
    /// Backends for the running OS, talking to the real system
    pub fn native(config: &GatewayConfig) -> GatewayResult<Self> {
        Ok(Self::for_os(TargetOs::current()?, Arc::new(SystemRunner::new()), config))
    }

    /// Backends for `os` driven through `runner`
    pub fn for_os(os: TargetOs, runner: Arc<dyn CommandRunner>, config: &GatewayConfig) -> Self {
        let engine = engine_for(os, config);
        let grace = config.engine.stop_grace();
        let restart_sec = config.service.restart_sec;
        debug!("selecting {} backends for engine '{}'", os, engine.name);

        let (network, process, service): (
            Box<dyn NetworkInspector>,
            Box<dyn ProcessController>,
            Box<dyn ServiceInstaller>,
        ) = match os {
            TargetOs::Linux => (
                Box::new(LinuxNetwork::new(runner.clone())),
                Box::new(LinuxProcess::new(engine).with_grace(grace)),
                Box::new(SystemdInstaller::new(runner.clone()).with_restart_sec(restart_sec)),
            ),
            TargetOs::MacOs => (
                Box::new(DarwinNetwork::new(runner.clone())),
                Box::new(DarwinProcess::new(runner.clone(), engine).with_grace(grace)),
                Box::new(LaunchdInstaller::new(runner.clone())),
            ),
            TargetOs::Windows => (
                Box::new(WindowsNetwork::new(runner.clone())),
                Box::new(WindowsProcess::new(runner.clone(), engine).with_grace(grace)),
                Box::new(ScInstaller::new(runner.clone()).with_restart_sec(restart_sec)),
            ),
        };

        Self { os, runner, network, process, service }
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    pub fn network(&self) -> &dyn NetworkInspector {
        self.network.as_ref()
    }

    pub fn process(&self) -> &dyn ProcessController {
        self.process.as_ref()
    }

    pub fn service(&self) -> &dyn ServiceInstaller {
        self.service.as_ref()
    }

    /// Fail with `PermissionDenied` unless running as root / Administrator
    pub async fn require_elevated(&self) -> GatewayResult<()> {
        let elevated = match self.os {
            TargetOs::Windows => {
                // `net session` only succeeds in an elevated shell
                match self.runner.run("net", &["session"]).await {
                    Ok(output) => output.success(),
                    Err(_) => false,
                }
            }
            TargetOs::Linux | TargetOs::MacOs => effective_uid_is_root(),
        };

        if elevated {
            Ok(())
        } else {
            Err(GatewayError::PermissionDenied(match self.os {
                TargetOs::Windows => "run this command as Administrator".to_string(),
                _ => "run this command as root (sudo)".to_string(),
            }))
        }
    }
}

#[cfg(unix)]
fn effective_uid_is_root() -> bool {
    // SAFETY: geteuid cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn effective_uid_is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::process::ProcessState;
    use std::path::PathBuf;

    #[test]
    fn test_current_os() {
        let os = TargetOs::current().unwrap();
        if cfg!(target_os = "linux") {
            assert_eq!(os, TargetOs::Linux);
        }
        assert!(!os.to_string().is_empty());
    }

    #[test]
    fn test_engine_for_applies_overrides() {
        let mut config = GatewayConfig::default();
        config.engine.name = Some("mihomo-alpha".to_string());
        config.engine.binary = Some(PathBuf::from("/usr/bin/mihomo-stub"));

        let engine = engine_for(TargetOs::Linux, &config);
        assert_eq!(engine.name, "mihomo-alpha");
        assert_eq!(engine.candidates[0], PathBuf::from("/usr/bin/mihomo-stub"));
        assert_eq!(engine.candidates[1], PathBuf::from("/usr/local/bin/mihomo"));
    }

    #[test]
    fn test_engine_name_follows_configured_binary() {
        let mut config = GatewayConfig::default();
        assert_eq!(engine_for(TargetOs::Linux, &config).name, "mihomo");
        assert_eq!(engine_for(TargetOs::Windows, &config).name, "mihomo.exe");

        config.engine.binary = Some(PathBuf::from("/usr/bin/mihomo-stub"));
        assert_eq!(engine_for(TargetOs::Linux, &config).name, "mihomo-stub");
    }

    #[tokio::test]
    async fn test_macos_lookup_uses_binary_name() {
        let runner = Arc::new(ScriptedRunner::new().ok("pgrep -x mihomo-stub", "4417\n"));
        let mut config = GatewayConfig::default();
        config.engine.binary = Some(PathBuf::from("/usr/local/bin/mihomo-stub"));
        let provider = PlatformProvider::for_os(TargetOs::MacOs, runner.clone(), &config);

        assert_eq!(provider.process().is_running().await, ProcessState { running: true, pid: Some(4417) });
        assert!(!runner.called("pgrep -x mihomo"));
    }

    #[tokio::test]
    async fn test_windows_backends_use_runner() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply("net session", 2, "", "System error 5 has occurred.\n\nAccess is denied.")
                .ok("sc query lan-proxy-gateway", "STATE : 4 RUNNING"),
        );
        let provider = PlatformProvider::for_os(TargetOs::Windows, runner.clone(), &GatewayConfig::default());

        assert_eq!(provider.os(), TargetOs::Windows);
        assert!(provider.service().is_installed().await);
        assert!(provider.service().definition_location().contains("lan-proxy-gateway"));

        let err = provider.require_elevated().await.unwrap_err();
        assert!(matches!(err, GatewayError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_macos_backends() {
        let runner = Arc::new(ScriptedRunner::new().ok("pgrep -x mihomo", "77\n"));
        let provider = PlatformProvider::for_os(TargetOs::MacOs, runner, &GatewayConfig::default());

        assert_eq!(provider.process().is_running().await.pid, Some(77));
        assert!(provider.service().definition_location().ends_with("com.lan-proxy-gateway.plist"));
    }
}
