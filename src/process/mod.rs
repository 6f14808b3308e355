//! Proxy engine process control
//!
//! The engine is never tracked in memory: it is found by executable name in
//! the OS process table, started detached, and stopped by PID or image name.
//!
//! Stopping is a two-phase transition:
//!
//! ```text
//!   running ──Graceful──> (grace period) ──still running?──Forced──> stopped
//!      │                                        │
//!      └── not running: nothing to do           └── no: stopped
//! ```

pub mod darwin;
pub mod linux;
pub mod parse;
pub mod spawn;
pub mod windows;

use crate::error::{GatewayError, GatewayResult};
use crate::platform::TargetOs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub use darwin::DarwinProcess;
pub use linux::LinuxProcess;
pub use windows::WindowsProcess;

/// Wait between a graceful stop request and a forced kill
pub const GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Pause after a forced kill before the final liveness check
const FORCED_SETTLE: Duration = Duration::from_millis(300);

/// Whether the engine is running, and as which PID
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    pub running: bool,
    pub pid: Option<u32>,
}

impl ProcessState {
    pub fn stopped() -> Self {
        Self::default()
    }

    /// First matching PID wins when several instances are running
    pub fn from_pids(pids: &[u32]) -> Self {
        match pids.first() {
            Some(&pid) => Self { running: true, pid: Some(pid) },
            None => Self::stopped(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    /// SIGTERM / taskkill without /F
    Graceful,
    /// SIGKILL / taskkill /F
    Forced,
}

impl StopPhase {
    pub fn next(self) -> Option<StopPhase> {
        match self {
            StopPhase::Graceful => Some(StopPhase::Forced),
            StopPhase::Forced => None,
        }
    }
}

/// Which executable is managed and where it is normally installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSpec {
    /// Executable name as it appears in the process table
    pub name: String,
    /// Install locations searched, in order, before `PATH`
    pub candidates: Vec<PathBuf>,
}

impl EngineSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), candidates: Vec::new() }
    }

    /// The engine under its default name with the package-manager locations of `os`
    pub fn for_os(os: TargetOs) -> Self {
        match os {
            TargetOs::Linux => Self::new("mihomo").with_candidates(vec![
                PathBuf::from("/usr/local/bin/mihomo"),
                PathBuf::from("/usr/bin/mihomo"),
            ]),
            TargetOs::MacOs => Self::new("mihomo").with_candidates(vec![
                PathBuf::from("/opt/homebrew/opt/mihomo/bin/mihomo"),
                PathBuf::from("/usr/local/opt/mihomo/bin/mihomo"),
            ]),
            TargetOs::Windows => {
                let candidates = ["ProgramFiles", "LOCALAPPDATA"]
                    .iter()
                    .filter_map(|var| std::env::var_os(var))
                    .map(|base| PathBuf::from(base).join("mihomo").join("mihomo.exe"))
                    .collect();
                Self::new("mihomo.exe").with_candidates(candidates)
            }
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Put an explicitly configured binary ahead of the conventional locations
    pub fn prefer_binary(mut self, binary: PathBuf) -> Self {
        self.candidates.insert(0, binary);
        self
    }

    /// Candidates first, then `PATH`
    pub fn locate(&self) -> GatewayResult<PathBuf> {
        if let Some(found) = self.candidates.iter().find(|p| is_executable(p)) {
            return Ok(found.clone());
        }

        if let Some(found) = find_in_path(&self.name) {
            return Ok(found);
        }

        let searched: Vec<String> = self.candidates.iter().map(|p| p.display().to_string()).collect();
        Err(GatewayError::NotFound(format!(
            "{} binary (searched {}{}PATH)",
            self.name,
            searched.join(", "),
            if searched.is_empty() { "" } else { ", " }
        )))
    }
}

/// Finds, starts and stops the engine
#[async_trait]
pub trait ProcessController: Send + Sync {
    fn engine(&self) -> &EngineSpec;

    fn grace_period(&self) -> Duration {
        GRACE_PERIOD
    }

    /// Send the signal/request for `phase` to every matching process
    async fn signal_all(&self, phase: StopPhase) -> GatewayResult<()>;

    /// Look up the engine in the process table
    async fn is_running(&self) -> ProcessState;

    async fn find_binary(&self) -> GatewayResult<PathBuf> {
        self.engine().locate()
    }

    /// Start `binary -d <data_dir>` detached with its output in `log_file`
    /// (truncated). Returns as soon as the process exists.
    async fn start_process(&self, binary: &Path, data_dir: &Path, log_file: &Path) -> GatewayResult<u32> {
        let pid = spawn::spawn_detached(binary, data_dir, log_file)?;
        info!("Started {} (pid {}), logging to {}", binary.display(), pid, log_file.display());
        Ok(pid)
    }

    /// Stop every instance, escalating to a forced kill after the grace period
    async fn stop_process(&self) -> GatewayResult<()> {
        if !self.is_running().await.running {
            debug!("{} is not running", self.engine().name);
            return Ok(());
        }

        let mut phase = StopPhase::Graceful;
        loop {
            info!("Stopping {} ({:?})", self.engine().name, phase);
            if let Err(e) = self.signal_all(phase).await {
                warn!("{:?} stop of {} failed: {}", phase, self.engine().name, e);
            }

            let wait = match phase {
                StopPhase::Graceful => self.grace_period(),
                StopPhase::Forced => FORCED_SETTLE,
            };
            sleep(wait).await;

            if !self.is_running().await.running {
                info!("{} stopped", self.engine().name);
                return Ok(());
            }

            match phase.next() {
                Some(next) => phase = next,
                None => {
                    warn!("{} still running after forced kill", self.engine().name);
                    return Ok(());
                }
            }
        }
    }
}

/// Wait `delay`, then check that a freshly started engine is still alive
pub async fn wait_until_running(controller: &dyn ProcessController, delay: Duration) -> ProcessState {
    sleep(delay).await;
    controller.is_running().await
}

/// Last `n` lines of a log file
pub async fn tail_log(path: &Path, n: usize) -> GatewayResult<Vec<String>> {
    let content = fs::read(path).await?;
    let content = String::from_utf8_lossy(&content);
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

/// Search `PATH` for `name` the way a shell would
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
