//! Windows engine control through tasklist and taskkill

use super::{parse, EngineSpec, ProcessController, ProcessState, StopPhase, GRACE_PERIOD};
use crate::error::GatewayResult;
use crate::exec::CommandRunner;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// taskkill exit status when no process matches the filter
const TASKKILL_NOT_FOUND: i32 = 128;

pub struct WindowsProcess {
    runner: Arc<dyn CommandRunner>,
    engine: EngineSpec,
    grace: Duration,
}

impl WindowsProcess {
    pub fn new(runner: Arc<dyn CommandRunner>, engine: EngineSpec) -> Self {
        Self { runner, engine, grace: GRACE_PERIOD }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

#[async_trait]
impl ProcessController for WindowsProcess {
    fn engine(&self) -> &EngineSpec {
        &self.engine
    }

    fn grace_period(&self) -> Duration {
        self.grace
    }

    async fn signal_all(&self, phase: StopPhase) -> GatewayResult<()> {
        let mut args = vec!["/IM", self.engine.name.as_str()];
        if phase == StopPhase::Forced {
            args.push("/F");
        }

        let output = self.runner.run("taskkill", &args).await?;
        if output.status_code == Some(TASKKILL_NOT_FOUND) {
            debug!("taskkill: no {} process left", self.engine.name);
            return Ok(());
        }
        output.into_result(&format!("taskkill {}", args.join(" ")))?;
        Ok(())
    }

    async fn is_running(&self) -> ProcessState {
        let filter = format!("IMAGENAME eq {}", self.engine.name);
        match self
            .runner
            .stdout_of("tasklist", &["/FI", &filter, "/FO", "CSV", "/NH"])
            .await
        {
            Some(out) => ProcessState::from_pids(&parse::parse_tasklist_csv(&out, &self.engine.name)),
            None => ProcessState::stopped(),
        }
    }
}
