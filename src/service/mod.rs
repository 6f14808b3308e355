//! Persistent service registration
//!
//! Each OS service manager gets a definition that runs
//! `<binary> start --config <file> --data-dir <dir>` at boot and restarts it
//! after a crash. The definition is the only state this layer leaves behind.

pub mod launchd;
pub mod systemd;
pub mod windows;

use crate::error::{GatewayError, GatewayResult};
use crate::validation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub use launchd::LaunchdInstaller;
pub use systemd::SystemdInstaller;
pub use windows::ScInstaller;

/// Service name for systemd and the Windows service control manager
pub const SERVICE_NAME: &str = "lan-proxy-gateway";

/// launchd job label
pub const LAUNCHD_LABEL: &str = "com.lan-proxy-gateway";

pub const DISPLAY_NAME: &str = "LAN Proxy Gateway";

/// Paths embedded into a service definition. All must be absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub binary_path: PathBuf,
    pub data_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl ServiceDescriptor {
    /// Describe the running executable as a service. Relative paths are
    /// resolved against the current directory, `work_dir` defaults to it and
    /// `log_dir` to `<work_dir>/logs`.
    pub fn resolve(
        config_file: &Path,
        data_dir: &Path,
        work_dir: Option<&Path>,
        log_dir: Option<&Path>,
    ) -> GatewayResult<Self> {
        let cwd = std::env::current_dir()?;
        let binary_path = absolutize(&std::env::current_exe()?, &cwd);
        let work_dir = work_dir.map(|p| absolutize(p, &cwd)).unwrap_or_else(|| cwd.clone());
        let log_dir = log_dir
            .map(|p| absolutize(p, &cwd))
            .unwrap_or_else(|| work_dir.join("logs"));

        let descriptor = Self {
            binary_path,
            data_dir: absolutize(data_dir, &cwd),
            config_file: absolutize(config_file, &cwd),
            log_dir,
            work_dir,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Reject relative paths and values that cannot be written into a definition file
    pub fn validate(&self) -> GatewayResult<()> {
        for (path, what) in self.fields() {
            validation::validate_absolute_path(path, what)?;
            validation::sanitize_path_value(path)?;
        }
        Ok(())
    }

    /// Arguments following the binary in the service invocation
    pub fn arguments(&self) -> GatewayResult<Vec<String>> {
        Ok(vec![
            "start".to_string(),
            "--config".to_string(),
            validation::sanitize_path_value(&self.config_file)?,
            "--data-dir".to_string(),
            validation::sanitize_path_value(&self.data_dir)?,
        ])
    }

    fn fields(&self) -> [(&Path, &str); 5] {
        [
            (&self.binary_path, "binary path"),
            (&self.data_dir, "data directory"),
            (&self.config_file, "config file"),
            (&self.log_dir, "log directory"),
            (&self.work_dir, "working directory"),
        ]
    }
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Registers the gateway with the OS service manager
#[async_trait]
pub trait ServiceInstaller: Send + Sync {
    /// Where the OS keeps the definition (file path or registry key)
    fn definition_location(&self) -> String;

    async fn is_installed(&self) -> bool;

    /// Write the definition, then register, enable and start it.
    /// Installing over an existing definition replaces it.
    async fn install(&self, descriptor: &ServiceDescriptor) -> GatewayResult<()>;

    /// Stop, unregister and delete the definition. Succeeds when nothing is installed.
    async fn uninstall(&self) -> GatewayResult<()>;
}

pub(crate) async fn ensure_log_dir(descriptor: &ServiceDescriptor) -> GatewayResult<()> {
    fs::create_dir_all(&descriptor.log_dir).await.map_err(|e| {
        GatewayError::ServiceError(format!(
            "Failed to create log directory {}: {}",
            descriptor.log_dir.display(),
            e
        ))
    })
}

/// Write a definition file readable by the service manager (0644 on Unix)
pub(crate) async fn write_definition(path: &Path, content: &str) -> GatewayResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied(
            format!("cannot write {}: run as administrator", path.display())
        ),
        _ => GatewayError::ServiceError(format!("Failed to write {}: {}", path.display(), e)),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).await?;
    }
    Ok(())
}

/// Delete a definition file. Returns false when it was already gone.
pub(crate) async fn remove_definition(path: &Path) -> GatewayResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GatewayError::ServiceError(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}
