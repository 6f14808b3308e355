//! Windows service control manager registration through `sc`
//!
//! `sc` exits with the Win32 error code, which is how "already running" and
//! "does not exist" are told apart from real failures.

use super::{ensure_log_dir, ServiceDescriptor, ServiceInstaller, DISPLAY_NAME, SERVICE_NAME};
use crate::error::GatewayResult;
use crate::exec::CommandRunner;
use crate::validation;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;
const ERROR_SERVICE_MARKED_FOR_DELETE: i32 = 1072;

/// Seconds without failures after which the SCM failure count resets
const FAILURE_RESET_SECS: u32 = 86_400;

pub struct ScInstaller {
    runner: Arc<dyn CommandRunner>,
    restart_sec: u32,
}

impl ScInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner, restart_sec: 5 }
    }

    pub fn with_restart_sec(mut self, restart_sec: u32) -> Self {
        self.restart_sec = restart_sec;
        self
    }

    /// Run `sc`, treating the listed exit codes as success
    async fn sc(&self, args: &[&str], tolerated: &[i32]) -> GatewayResult<()> {
        let output = self.runner.run("sc", args).await?;
        if let Some(code) = output.status_code {
            if tolerated.contains(&code) {
                debug!("sc {}: tolerated code {}", args.join(" "), code);
                return Ok(());
            }
        }
        output.into_result(&format!("sc {}", args.join(" ")))?;
        Ok(())
    }
}

/// `binPath=` value: quoted binary followed by the fixed invocation
pub fn render_bin_path(descriptor: &ServiceDescriptor) -> GatewayResult<String> {
    let binary = validation::sanitize_path_value(&descriptor.binary_path)?;
    let config = validation::sanitize_path_value(&descriptor.config_file)?;
    let data_dir = validation::sanitize_path_value(&descriptor.data_dir)?;
    Ok(format!(
        "\"{}\" start --config \"{}\" --data-dir \"{}\"",
        binary, config, data_dir
    ))
}

#[async_trait]
impl ServiceInstaller for ScInstaller {
    fn definition_location(&self) -> String {
        format!(r"HKLM\SYSTEM\CurrentControlSet\Services\{}", SERVICE_NAME)
    }

    async fn is_installed(&self) -> bool {
        match self.runner.run("sc", &["query", SERVICE_NAME]).await {
            Ok(output) => output.success(),
            Err(_) => false,
        }
    }

    async fn install(&self, descriptor: &ServiceDescriptor) -> GatewayResult<()> {
        descriptor.validate()?;
        let bin_path = render_bin_path(descriptor)?;
        ensure_log_dir(descriptor).await?;

        // sc create fails with 1073 on an existing service, so reconfigure instead
        let verb = if self.is_installed().await { "config" } else { "create" };
        self.sc(
            &[
                verb,
                SERVICE_NAME,
                "binPath=",
                &bin_path,
                "start=",
                "auto",
                "DisplayName=",
                DISPLAY_NAME,
            ],
            &[],
        )
        .await?;
        info!("Service {} registered ({})", SERVICE_NAME, verb);

        // Restart on crash only: SCM failure actions do not fire on a clean stop
        let actions = format!("restart/{}", u64::from(self.restart_sec) * 1000);
        let reset = FAILURE_RESET_SECS.to_string();
        if let Err(e) = self
            .sc(&["failure", SERVICE_NAME, "reset=", &reset, "actions=", &actions], &[])
            .await
        {
            warn!("Failed to configure crash restart for {}: {}", SERVICE_NAME, e);
        }

        self.sc(&["start", SERVICE_NAME], &[ERROR_SERVICE_ALREADY_RUNNING]).await?;
        info!("Service {} started", SERVICE_NAME);
        Ok(())
    }

    async fn uninstall(&self) -> GatewayResult<()> {
        if let Err(e) = self
            .sc(&["stop", SERVICE_NAME], &[ERROR_SERVICE_NOT_ACTIVE, ERROR_SERVICE_DOES_NOT_EXIST])
            .await
        {
            warn!("Failed to stop {}: {}", SERVICE_NAME, e);
        }

        self.sc(
            &["delete", SERVICE_NAME],
            &[ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_MARKED_FOR_DELETE],
        )
        .await?;
        info!("Service {} removed", SERVICE_NAME);
        Ok(())
    }
}
