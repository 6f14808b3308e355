//! macOS engine control: pgrep for lookup, POSIX signals for stopping

use super::{parse, spawn, EngineSpec, ProcessController, ProcessState, StopPhase, GRACE_PERIOD};
use crate::error::GatewayResult;
use crate::exec::CommandRunner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct DarwinProcess {
    runner: Arc<dyn CommandRunner>,
    engine: EngineSpec,
    grace: Duration,
}

impl DarwinProcess {
    pub fn new(runner: Arc<dyn CommandRunner>, engine: EngineSpec) -> Self {
        Self { runner, engine, grace: GRACE_PERIOD }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn matching_pids(&self) -> Vec<u32> {
        // pgrep exits 1 when nothing matches, which stdout_of maps to None
        match self.runner.stdout_of("pgrep", &["-x", &self.engine.name]).await {
            Some(out) => parse::parse_pgrep(&out),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ProcessController for DarwinProcess {
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
