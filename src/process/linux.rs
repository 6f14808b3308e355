//! Linux engine control through procfs and POSIX signals

use super::{parse, spawn, EngineSpec, ProcessController, ProcessState, StopPhase, GRACE_PERIOD};
use crate::error::GatewayResult;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

pub struct LinuxProcess {
    engine: EngineSpec,
    proc_root: PathBuf,
    grace: Duration,
}

impl LinuxProcess {
    pub fn new(engine: EngineSpec) -> Self {
        Self {
            engine,
            proc_root: PathBuf::from("/proc"),
            grace: GRACE_PERIOD,
        }
    }

    pub fn with_proc_root(mut self, proc_root: PathBuf) -> Self {
        self.proc_root = proc_root;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Live processes whose `comm` matches the engine name, lowest PID first
    async fn matching_pids(&self) -> Vec<u32> {
        let mut entries = match fs::read_dir(&self.proc_root).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read {}: {}", self.proc_root.display(), e);
                return Vec::new();
            }
        };

        let mut pids = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let pid: u32 = match entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                Some(pid) => pid,
                None => continue,
            };

            // Processes may exit between listing and reading
            let comm = match fs::read_to_string(entry.path().join("comm")).await {
                Ok(comm) => comm,
                Err(_) => continue,
            };
            if !parse::comm_matches(&comm, &self.engine.name) {
                continue;
            }

            let state = fs::read_to_string(entry.path().join("stat"))
                .await
                .ok()
                .and_then(|stat| parse::proc_stat_state(&stat));
            if matches!(state, Some('Z') | Some('X')) {
                debug!("pid {} is a zombie, ignoring", pid);
                continue;
            }

            pids.push(pid);
        }

        pids.sort_unstable();
        pids
    }
}

#[async_trait]
impl ProcessController for LinuxProcess {
    fn engine(&self) -> &EngineSpec {
        &self.engine
    }

    fn grace_period(&self) -> Duration {
        self.grace
    }

    async fn signal_all(&self, phase: StopPhase) -> GatewayResult<()> {
        let mut result = Ok(());
        for pid in self.matching_pids().await {
            if let Err(e) = spawn::signal_pid(pid, phase) {
                warn!("Failed to signal pid {}: {}", pid, e);
                result = Err(e);
            }
            spawn::reap(pid);
        }
        result
    }

    async fn is_running(&self) -> ProcessState {
        ProcessState::from_pids(&self.matching_pids().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_proc(entries: &[(u32, &str, char)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (pid, comm, state) in entries {
            let p = dir.path().join(pid.to_string());
            std::fs::create_dir_all(&p).unwrap();
            std::fs::write(p.join("comm"), format!("{}\n", comm)).unwrap();
            std::fs::write(p.join("stat"), format!("{} ({}) {} 1 1 1 0 -1", pid, comm, state)).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("sys")).unwrap();
        std::fs::write(dir.path().join("uptime"), "1.0 1.0\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_scan_reports_lowest_live_pid() {
        let root = fake_proc(&[
            (900, "mihomo", 'S'),
            (120, "mihomo", 'Z'),
            (450, "mihomo", 'R'),
            (300, "sshd", 'S'),
        ]);
        let controller = LinuxProcess::new(EngineSpec::new("mihomo")).with_proc_root(root.path().to_path_buf());
        assert_eq!(controller.is_running().await, ProcessState { running: true, pid: Some(450) });
    }

    #[tokio::test]
    async fn test_scan_nothing_running() {
        let root = fake_proc(&[(300, "sshd", 'S'), (301, "mihomo-alpha", 'S')]);
        let controller = LinuxProcess::new(EngineSpec::new("mihomo")).with_proc_root(root.path().to_path_buf());
        assert_eq!(controller.is_running().await, ProcessState::stopped());
    }

    #[tokio::test]
    async fn test_stop_when_absent_is_noop() {
        let root = fake_proc(&[]);
        let controller = LinuxProcess::new(EngineSpec::new("mihomo")).with_proc_root(root.path().to_path_buf());
        controller.stop_process().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_proc_root() {
        let controller = LinuxProcess::new(EngineSpec::new("mihomo"))
            .with_proc_root(PathBuf::from("/nonexistent-proc-root"));
        assert!(!controller.is_running().await.running);
    }
}
