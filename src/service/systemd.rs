//! systemd unit installation

use super::{ensure_log_dir, remove_definition, write_definition, ServiceDescriptor, ServiceInstaller};
use super::{DISPLAY_NAME, SERVICE_NAME};
use crate::error::GatewayResult;
use crate::exec::CommandRunner;
use crate::validation;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const UNIT_PATH: &str = "/etc/systemd/system/lan-proxy-gateway.service";

pub struct SystemdInstaller {
    runner: Arc<dyn CommandRunner>,
    unit_path: PathBuf,
    restart_sec: u32,
}

impl SystemdInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            unit_path: PathBuf::from(UNIT_PATH),
            restart_sec: 5,
        }
    }

    pub fn with_unit_path(mut self, unit_path: PathBuf) -> Self {
        self.unit_path = unit_path;
        self
    }

    pub fn with_restart_sec(mut self, restart_sec: u32) -> Self {
        self.restart_sec = restart_sec;
        self
    }

    async fn systemctl(&self, args: &[&str]) -> GatewayResult<()> {
        self.runner.run_checked("systemctl", args).await.map(|_| ())
    }
}

/// Quote one `ExecStart=` word: `%` introduces specifiers and whitespace
/// splits words unless quoted.
fn exec_word(value: &str) -> String {
    let value = value.replace('%', "%%");
    if value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value
    }
}

/// Render the unit file.
///
/// `gateway start` returns once the engine runs detached, so the unit is
/// `forking` and systemd adopts the engine as the main process.
/// `Restart=on-failure` restarts after a crash or non-zero exit only, so an
/// administrator `systemctl stop` or a clean exit leaves the service stopped.
pub fn render_unit(descriptor: &ServiceDescriptor, restart_sec: u32) -> GatewayResult<String> {
    let binary = validation::sanitize_path_value(&descriptor.binary_path)?;
    let work_dir = validation::sanitize_path_value(&descriptor.work_dir)?;
    let log_dir = validation::sanitize_path_value(&descriptor.log_dir)?;

    let mut exec_start = vec![exec_word(&binary)];
    exec_start.extend(descriptor.arguments()?.iter().map(|a| exec_word(a)));

    Ok(format!(
        "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target

[Service]
Type=forking
ExecStart={exec_start}
WorkingDirectory={work_dir}
Restart=on-failure
RestartSec={restart_sec}
StandardOutput=append:{log_dir}/service.log
StandardError=append:{log_dir}/service-error.log

[Install]
WantedBy=multi-user.target
",
        description = DISPLAY_NAME,
        exec_start = exec_start.join(" "),
        work_dir = work_dir,
        restart_sec = restart_sec,
        log_dir = log_dir,
    ))
}

#[async_trait]
impl ServiceInstaller for SystemdInstaller {
    fn definition_location(&self) -> String {
        self.unit_path.display().to_string()
    }

    async fn is_installed(&self) -> bool {
        tokio::fs::metadata(&self.unit_path).await.is_ok()
    }

    async fn install(&self, descriptor: &ServiceDescriptor) -> GatewayResult<()> {
        descriptor.validate()?;
        let unit = render_unit(descriptor, self.restart_sec)?;

        ensure_log_dir(descriptor).await?;
        write_definition(&self.unit_path, &unit).await?;
        info!("Wrote {}", self.unit_path.display());

        self.systemctl(&["daemon-reload"]).await?;
        // enable --now on an enabled, running unit changes nothing
        self.systemctl(&["enable", "--now", SERVICE_NAME]).await?;
        info!("Service {} enabled and started", SERVICE_NAME);
        Ok(())
    }

    async fn uninstall(&self) -> GatewayResult<()> {
        // A unit can stay loaded after its file was deleted, so always ask
        // systemd to let go before looking at the file
        if let Err(e) = self.systemctl(&["disable", "--now", SERVICE_NAME]).await {
            warn!("Failed to disable {}: {}", SERVICE_NAME, e);
        }

        if !remove_definition(&self.unit_path).await? {
            info!("{} already absent", self.unit_path.display());
        }

        if let Err(e) = self.systemctl(&["daemon-reload"]).await {
            warn!("systemctl daemon-reload failed: {}", e);
        }
        info!("Service {} removed", SERVICE_NAME);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::service::fixtures;
    use std::path::Path;
    use tempfile::TempDir;

    fn systemctl_ok() -> ScriptedRunner {
        ScriptedRunner::new()
            .ok("systemctl daemon-reload", "")
            .ok("systemctl enable --now lan-proxy-gateway", "")
            .ok("systemctl disable --now lan-proxy-gateway", "")
    }

    #[test]
    fn test_render_unit() {
        let descriptor = fixtures::descriptor(Path::new("/opt/gw"));
        let unit = render_unit(&descriptor, 5).unwrap();

        assert!(unit.contains("Description=LAN Proxy Gateway\n"));
        assert!(unit.contains("Type=forking\n"));
        assert!(unit.contains(
            "ExecStart=/opt/gw/bin/gateway start --config /opt/gw/gateway.toml --data-dir /opt/gw/data\n"
        ));
        assert!(unit.contains("WorkingDirectory=/opt/gw\n"));
        assert!(unit.contains("Restart=on-failure\nRestartSec=5\n"));
        assert!(unit.contains("StandardOutput=append:/opt/gw/logs/service.log\n"));
        assert!(unit.contains("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn test_render_quotes_spaces_and_specifiers() {
        let mut descriptor = fixtures::descriptor(Path::new("/opt/gw"));
        descriptor.data_dir = PathBuf::from("/srv/proxy data/100%");
        let unit = render_unit(&descriptor, 10).unwrap();
        assert!(unit.contains("--data-dir \"/srv/proxy data/100%%\"\n"));
        assert!(unit.contains("RestartSec=10\n"));
    }

    #[test]
    fn test_render_rejects_newline() {
        let mut descriptor = fixtures::descriptor(Path::new("/opt/gw"));
        descriptor.config_file = PathBuf::from("/etc/gw.toml\nExecStartPre=/bin/sh");
        assert!(render_unit(&descriptor, 5).is_err());
    }

    #[tokio::test]
    async fn test_install_uninstall_round_trip() {
        let dir = TempDir::new().unwrap();
        let unit_path = dir.path().join("systemd").join("lan-proxy-gateway.service");
        let runner = Arc::new(systemctl_ok());
        let installer = SystemdInstaller::new(runner.clone()).with_unit_path(unit_path.clone());
        let descriptor = fixtures::descriptor(dir.path());

        installer.install(&descriptor).await.unwrap();
        assert!(installer.is_installed().await);
        assert!(dir.path().join("logs").is_dir());
        assert_eq!(
            runner.calls(),
            vec!["systemctl daemon-reload", "systemctl enable --now lan-proxy-gateway"]
        );

        // A second install replaces the unit rather than adding another
        installer.install(&descriptor).await.unwrap();
        assert_eq!(std::fs::read_dir(unit_path.parent().unwrap()).unwrap().count(), 1);

        installer.uninstall().await.unwrap();
        assert!(!unit_path.exists());
        assert!(!installer.is_installed().await);
        assert!(runner.called("systemctl disable --now lan-proxy-gateway"));

        // Already absent
        installer.uninstall().await.unwrap();
    }

    #[tokio::test]
    async fn test_enable_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok("systemctl daemon-reload", "")
                .reply(
                    "systemctl enable --now lan-proxy-gateway",
                    1,
                    "",
                    "Failed to enable unit: Access denied",
                ),
        );
        let installer = SystemdInstaller::new(runner).with_unit_path(dir.path().join("gw.service"));
        let err = installer.install(&fixtures::descriptor(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_uninstall_tolerates_disable_failure() {
        let dir = TempDir::new().unwrap();
        let unit_path = dir.path().join("gw.service");
        std::fs::write(&unit_path, "[Unit]\n").unwrap();
        let runner = Arc::new(ScriptedRunner::new().reply(
            "systemctl disable --now lan-proxy-gateway",
            1,
            "",
            "Unit lan-proxy-gateway.service not loaded.",
        ));
        let installer = SystemdInstaller::new(runner).with_unit_path(unit_path.clone());
        installer.uninstall().await.unwrap();
        assert!(!unit_path.exists());
    }

    #[tokio::test]
    async fn test_uninstall_without_unit_file_still_disables() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(systemctl_ok());
        let installer = SystemdInstaller::new(runner.clone()).with_unit_path(dir.path().join("gw.service"));

        installer.uninstall().await.unwrap();
        assert_eq!(
            runner.calls(),
            vec!["systemctl disable --now lan-proxy-gateway", "systemctl daemon-reload"]
        );
    }
}
