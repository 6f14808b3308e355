//! launchd daemon installation

use super::{ensure_log_dir, remove_definition, write_definition, ServiceDescriptor, ServiceInstaller};
use super::LAUNCHD_LABEL;
use crate::error::GatewayResult;
use crate::exec::CommandRunner;
use crate::validation;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

pub const PLIST_PATH: &str = "/Library/LaunchDaemons/com.lan-proxy-gateway.plist";

pub struct LaunchdInstaller {
    runner: Arc<dyn CommandRunner>,
    plist_path: PathBuf,
}

impl LaunchdInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner, plist_path: PathBuf::from(PLIST_PATH) }
    }

    pub fn with_plist_path(mut self, plist_path: PathBuf) -> Self {
        self.plist_path = plist_path;
        self
    }

    fn service_target() -> String {
        format!("system/{}", LAUNCHD_LABEL)
    }

    /// Unload whatever copy launchd currently holds; failures mean nothing was loaded
    async fn unload(&self) {
        let plist = self.plist_path.display().to_string();
        for args in [
            vec!["bootout".to_string(), Self::service_target()],
            vec!["unload".to_string(), "-w".to_string(), plist],
        ] {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match self.runner.run("launchctl", &args).await {
                Ok(output) if output.success() => {
                    debug!("launchctl {} succeeded", args[0]);
                    return;
                }
                Ok(output) => debug!("launchctl {}: {}", args[0], output.stderr.trim()),
                Err(e) => debug!("launchctl unavailable: {}", e),
            }
        }
    }
}

fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render the LaunchDaemon property list.
///
/// `KeepAlive` relaunches after a crash or non-zero exit; a clean exit
/// (`SuccessfulExit = false` means "keep alive unless it exited 0") is final.
pub fn render_plist(descriptor: &ServiceDescriptor) -> GatewayResult<String> {
    let binary = validation::sanitize_path_value(&descriptor.binary_path)?;
    let log_dir = validation::sanitize_path_value(&descriptor.log_dir)?;
    let work_dir = validation::sanitize_path_value(&descriptor.work_dir)?;

    let mut program_arguments = format!("        <string>{}</string>\n", xml_escape(&binary));
    for arg in descriptor.arguments()? {
        program_arguments.push_str(&format!("        <string>{}</string>\n", xml_escape(&arg)));
    }

    Ok(format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{program_arguments}    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <dict>
        <key>SuccessfulExit</key>
        <false/>
        <key>Crashed</key>
        <true/>
    </dict>
    <key>StandardOutPath</key>
    <string>{log_dir}/service.log</string>
    <key>StandardErrorPath</key>
    <string>{log_dir}/service-error.log</string>
    <key>WorkingDirectory</key>
    <string>{work_dir}</string>
    <key>UserName</key>
    <string>root</string>
</dict>
</plist>
"#,
        label = LAUNCHD_LABEL,
        program_arguments = program_arguments,
        log_dir = xml_escape(&log_dir),
        work_dir = xml_escape(&work_dir),
    ))
}

#[async_trait]
impl ServiceInstaller for LaunchdInstaller {
    fn definition_location(&self) -> String {
        self.plist_path.display().to_string()
    }

    async fn is_installed(&self) -> bool {
        tokio::fs::metadata(&self.plist_path).await.is_ok()
    }

    async fn install(&self, descriptor: &ServiceDescriptor) -> GatewayResult<()> {
        descriptor.validate()?;
        let plist = render_plist(descriptor)?;

        ensure_log_dir(descriptor).await?;

        // bootstrap refuses a label that is already loaded
        if self.is_installed().await {
            self.unload().await;
        }

        write_definition(&self.plist_path, &plist).await?;
        info!("Wrote {}", self.plist_path.display());

        let path = self.plist_path.display().to_string();
        match self.runner.run_checked("launchctl", &["bootstrap", "system", &path]).await {
            Ok(_) => {}
            Err(bootstrap_err) => {
                // Pre-10.11 launchctl only knows load
                debug!("launchctl bootstrap failed ({}), trying load -w", bootstrap_err);
                if self.runner.run_checked("launchctl", &["load", "-w", &path]).await.is_err() {
                    return Err(bootstrap_err);
                }
            }
        }

        info!("LaunchDaemon {} loaded", LAUNCHD_LABEL);
        Ok(())
    }

    async fn uninstall(&self) -> GatewayResult<()> {
        // The job may still be loaded even when its plist is gone
        self.unload().await;
        if remove_definition(&self.plist_path).await? {
            info!("LaunchDaemon {} removed", LAUNCHD_LABEL);
        } else {
            info!("{} already absent", self.plist_path.display());
        }
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

    #[test]
    fn test_render_plist() {
        let descriptor = fixtures::descriptor(Path::new("/opt/gw"));
        let plist = render_plist(&descriptor).unwrap();

        assert!(plist.contains("<string>com.lan-proxy-gateway</string>"));
        assert!(plist.contains(
            "        <string>/opt/gw/bin/gateway</string>\n        <string>start</string>\n        <string>--config</string>\n        <string>/opt/gw/gateway.toml</string>\n        <string>--data-dir</string>\n        <string>/opt/gw/data</string>\n    </array>"
        ));
        assert!(plist.contains("<key>SuccessfulExit</key>\n        <false/>"));
        assert!(plist.contains("<string>/opt/gw/logs/service-error.log</string>"));
        assert!(plist.contains("<key>UserName</key>\n    <string>root</string>"));
    }

    #[test]
    fn test_render_escapes_xml() {
        let mut descriptor = fixtures::descriptor(Path::new("/opt/gw"));
        descriptor.work_dir = PathBuf::from("/Users/a&b/<gw>");
        let plist = render_plist(&descriptor).unwrap();
        assert!(plist.contains("<string>/Users/a&amp;b/&lt;gw&gt;</string>"));
    }

    #[tokio::test]
    async fn test_install_falls_back_to_load() {
        let dir = TempDir::new().unwrap();
        let plist_path = dir.path().join("com.lan-proxy-gateway.plist");
        let path = plist_path.display().to_string();
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(&format!("launchctl bootstrap system {}", path), 5, "", "Bootstrap failed: 5: Input/output error")
                .ok(&format!("launchctl load -w {}", path), ""),
        );
        let installer = LaunchdInstaller::new(runner.clone()).with_plist_path(plist_path.clone());
        installer.install(&fixtures::descriptor(dir.path())).await.unwrap();
        assert!(plist_path.exists());
        assert!(runner.called(&format!("launchctl load -w {}", path)));
    }

    #[tokio::test]
    async fn test_install_reports_bootstrap_error() {
        let dir = TempDir::new().unwrap();
        let plist_path = dir.path().join("gw.plist");
        let runner = Arc::new(ScriptedRunner::new().reply(
            &format!("launchctl bootstrap system {}", plist_path.display()),
            1,
            "",
            "Bootstrap failed: 1: Operation not permitted",
        ));
        let installer = LaunchdInstaller::new(runner).with_plist_path(plist_path);
        let err = installer.install(&fixtures::descriptor(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("Operation not permitted"));
    }

    #[tokio::test]
    async fn test_reinstall_boots_out_first_then_uninstall() {
        let dir = TempDir::new().unwrap();
        let plist_path = dir.path().join("gw.plist");
        let path = plist_path.display().to_string();
        let runner = Arc::new(
            ScriptedRunner::new()
                .ok(&format!("launchctl bootstrap system {}", path), "")
                .ok("launchctl bootout system/com.lan-proxy-gateway", ""),
        );
        let installer = LaunchdInstaller::new(runner.clone()).with_plist_path(plist_path.clone());
        let descriptor = fixtures::descriptor(dir.path());

        installer.install(&descriptor).await.unwrap();
        assert!(!runner.called("launchctl bootout system/com.lan-proxy-gateway"));

        installer.install(&descriptor).await.unwrap();
        assert!(runner.called("launchctl bootout system/com.lan-proxy-gateway"));

        installer.uninstall().await.unwrap();
        assert!(!plist_path.exists());
        installer.uninstall().await.unwrap();
    }

    #[tokio::test]
    async fn test_uninstall_without_plist_still_boots_out() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::new().ok("launchctl bootout system/com.lan-proxy-gateway", ""));
        let installer = LaunchdInstaller::new(runner.clone()).with_plist_path(dir.path().join("gw.plist"));

        installer.uninstall().await.unwrap();
        assert!(runner.called("launchctl bootout system/com.lan-proxy-gateway"));
    }
}
