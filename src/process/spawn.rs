//! Detached process creation and signalling
//!
//! The engine must outlive the invocation that started it, so it is placed in
//! its own session (Unix) or process group without a console (Windows) and
//! its handle is dropped right after spawning.

use super::StopPhase;
use crate::error::{GatewayError, GatewayResult};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Create (or truncate) the engine log, creating its directory if needed
pub fn open_log(path: &Path) -> GatewayResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(file)
}

/// Start `binary -d <data_dir>` detached, stdout and stderr both going to `log_file`
pub fn spawn_detached(binary: &Path, data_dir: &Path, log_file: &Path) -> GatewayResult<u32> {
    let log = open_log(log_file)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(binary);
    cmd.arg("-d")
        .arg(data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    detach(&mut cmd);

    let child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => GatewayError::NotFound(format!("engine binary {}", binary.display())),
        io::ErrorKind::PermissionDenied => GatewayError::PermissionDenied(
            format!("cannot execute {}: {}", binary.display(), e)
        ),
        _ => GatewayError::ServiceError(format!("Failed to start {}: {}", binary.display(), e)),
    })?;

    let pid = child.id();
    debug!("spawned {} as pid {}", binary.display(), pid);
    // Dropping the handle neither waits for nor kills the child
    drop(child);
    Ok(pid)
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no parent memory
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut Command) {}

/// Deliver the signal for `phase` to `pid`. A process that is already gone
/// counts as success.
#[cfg(unix)]
pub fn signal_pid(pid: u32, phase: StopPhase) -> GatewayResult<()> {
    let signal = match phase {
        StopPhase::Graceful => libc::SIGTERM,
        StopPhase::Forced => libc::SIGKILL,
    };

    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| GatewayError::InvalidParameter(format!("pid {} out of range", pid)))?;
    // SAFETY: plain syscall on a positive pid
    if unsafe { libc::kill(pid, signal) } == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(()),
        Some(libc::EPERM) => Err(GatewayError::PermissionDenied(
            format!("not allowed to signal pid {}", pid)
        )),
        _ => Err(GatewayError::Io(err)),
    }
}

#[cfg(not(unix))]
pub fn signal_pid(pid: u32, _phase: StopPhase) -> GatewayResult<()> {
    Err(GatewayError::NotSupported(format!("signalling pid {} on this platform", pid)))
}

/// Collect the exit status if `pid` is a child of this process, so a stopped
/// engine does not linger as a zombie. No-op for foreign processes.
#[cfg(unix)]
pub fn reap(pid: u32) {
    if let Ok(pid) = libc::pid_t::try_from(pid) {
        let mut status = 0;
        // SAFETY: WNOHANG never blocks; ECHILD for non-children is ignored
        unsafe {
            libc::waitpid(pid, &mut status, libc::WNOHANG);
        }
    }
}

#[cfg(not(unix))]
pub fn reap(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_truncates_and_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("engine.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "old run\n").unwrap();

        open_log(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        let nested = dir.path().join("a").join("b").join("engine.log");
        open_log(&nested).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let dir = TempDir::new().unwrap();
        let err = spawn_detached(
            &dir.path().join("no-such-engine"),
            dir.path(),
            &dir.path().join("engine.log"),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_vanished_pid_is_ok() {
        // Spawn and wait so the pid is known to be gone
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(signal_pid(pid, StopPhase::Graceful).is_ok());
    }
}
