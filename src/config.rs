//! Configuration for the gateway platform layer

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file
#[cfg(not(windows))]
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lan-proxy-gateway/gateway.toml";
#[cfg(windows)]
pub const DEFAULT_CONFIG_PATH: &str = r"C:\ProgramData\lan-proxy-gateway\gateway.toml";

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Proxy engine settings
    #[serde(default)]
    pub engine: EngineSettings,
    /// Persistent service settings
    #[serde(default)]
    pub service: ServiceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Executable name used to find the engine in the process table.
    /// Unset means the file name of `binary`, or the platform default.
    #[serde(default)]
    pub name: Option<String>,
    /// Explicit engine binary, skips the install-location search
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Engine data directory (passed as `-d`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Combined stdout/stderr of the engine, truncated on every start
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Wait before checking that a freshly started engine survived
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
    /// Grace period between a graceful stop request and a forced kill
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Directory for service manager logs, defaults to `<work_dir>/logs`
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Delay before the service manager restarts a crashed gateway
    #[serde(default = "default_restart_sec")]
    pub restart_sec: u32,
}

fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\lan-proxy-gateway\data")
    } else {
        PathBuf::from("/etc/lan-proxy-gateway/data")
    }
}

fn default_log_file() -> PathBuf {
    std::env::temp_dir().join("lan-proxy-gateway.log")
}

fn default_startup_delay() -> u64 {
    5
}

fn default_stop_grace() -> u64 {
    2
}

fn default_restart_sec() -> u32 {
    5
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            name: None,
            binary: None,
            data_dir: default_data_dir(),
            log_file: default_log_file(),
            startup_delay_secs: default_startup_delay(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            restart_sec: default_restart_sec(),
        }
    }
}

impl EngineSettings {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl GatewayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::ConfigError(format!(
                "Failed to read config {}: {}", path.as_ref().display(), e
            )))?;

        Ok(toml::from_str(&content)?)
    }

    /// Load an explicitly named file, or the default file if it exists, or built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> GatewayResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GatewayResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GatewayError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::ConfigError(format!("Failed to create directory {:?}: {}", parent, e)))?;
        }

        std::fs::write(path.as_ref(), content)
            .map_err(|e| GatewayError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Write this configuration to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn save_if_missing<P: AsRef<Path>>(&self, path: P) -> GatewayResult<bool> {
        if path.as_ref().exists() {
            return Ok(false);
        }
        self.save(path)?;
        Ok(true)
    }

    /// Ensure the data directory and the log file's directory exist
    pub fn ensure_directories(&self) -> GatewayResult<()> {
        let mut dirs = vec![self.engine.data_dir.as_path()];
        if let Some(parent) = self.engine.log_file.parent() {
            dirs.push(parent);
        }
        for dir in dirs {
            if dir.as_os_str().is_empty() {
                continue;
            }
            std::fs::create_dir_all(dir)
                .map_err(|e| GatewayError::ConfigError(format!("Failed to create directory {:?}: {}", dir, e)))?;
        }
        Ok(())
    }
}
