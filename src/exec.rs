//! External tool execution
//!
//! Every platform query ends up here: a program name, its arguments, and the
//! captured text it printed. Backends only see the `CommandRunner` trait so the
//! parsing and decision logic can be driven from captured output in tests.

use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// Turn a non-zero exit into `CommandFailed`, keeping the tool's stderr verbatim.
    pub fn into_result(self, cmd: &str) -> GatewayResult<CommandOutput> {
        if self.success() {
            return Ok(self);
        }
        // Some tools (sc, netsh) report failures on stdout only
        let stderr = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(GatewayError::CommandFailed {
            cmd: cmd.to_string(),
            code: self.status_code,
            stderr,
        })
    }
}

/// Runs OS tools
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output. A non-zero exit is
    /// *not* an error at this level; a program that cannot be spawned is.
    async fn run(&self, program: &str, args: &[&str]) -> GatewayResult<CommandOutput>;

    /// Run and require a zero exit status.
    async fn run_checked(&self, program: &str, args: &[&str]) -> GatewayResult<CommandOutput> {
        let output = self.run(program, args).await?;
        output.into_result(&command_line(program, args))
    }

    /// Run and return stdout when the tool succeeded, `None` otherwise.
    async fn stdout_of(&self, program: &str, args: &[&str]) -> Option<String> {
        match self.run(program, args).await {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(output) => {
                debug!(
                    "{} exited with {:?}: {}",
                    command_line(program, args),
                    output.status_code,
                    output.stderr.trim()
                );
                None
            }
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }
}

/// Render a command line for logs and error messages
pub fn command_line(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// `CommandRunner` backed by real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> GatewayResult<CommandOutput> {
        let cmd_str = command_line(program, args);
        debug!("exec: {}", cmd_str);

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| GatewayError::CommandFailed {
                cmd: cmd_str.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        Ok(CommandOutput {
            status_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
