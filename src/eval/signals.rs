//! Suspend/resume signalling primitives.
//!
//! A worker announces readiness by stopping itself with `SIGSTOP`. Its parent
//! observes the stop with `waitpid(pid, WUNTRACED)`. The kernel keeps an
//! unreported stop pending until it is collected, so a stop that happens
//! before the parent starts waiting is still observed. Resume is `SIGCONT`.

use crate::error::{EvalError, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Why a worker process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Any other wait status.
    Unknown,
}

impl TerminationReason {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Unknown => "terminated for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Map a terminal `WaitStatus` to a [`TerminationReason`].
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        _ => TerminationReason::Unknown,
    }
}

/// What the counting-wait observed for one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The child stopped itself and is waiting for resume.
    Suspended,
    /// The child terminated without suspending. It has been reaped.
    Terminated(TerminationReason),
}

fn waitpid_restarting(pid: Pid, flags: Option<WaitPidFlag>) -> Result<WaitStatus> {
    loop {
        match waitpid(pid, flags) {
            Ok(status) => return Ok(status),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(EvalError::Signal(format!(
                    "waitpid({}) failed: {}",
                    pid, e
                )));
            }
        }
    }
}

/// Block until `pid` either stops with `SIGSTOP` or terminates.
///
/// Stops caused by job-control signals are not readiness and are skipped.
pub fn wait_until_suspended(pid: Pid) -> Result<Readiness> {
    loop {
        match waitpid_restarting(pid, Some(WaitPidFlag::WUNTRACED))? {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => return Ok(Readiness::Suspended),
            WaitStatus::Stopped(_, other) => {
                tracing::debug!(pid = %pid, signal = ?other, "Ignoring job-control stop");
            }
            status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
                return Ok(Readiness::Terminated(analyze_wait_status(status)));
            }
            other => {
                tracing::debug!(pid = %pid, status = ?other, "Ignoring wait status");
            }
        }
    }
}

/// Block until `pid` terminates and reap it.
pub fn wait_for_exit(pid: Pid) -> Result<TerminationReason> {
    loop {
        match waitpid_restarting(pid, None)? {
            status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
                return Ok(analyze_wait_status(status));
            }
            _ => continue,
        }
    }
}

/// Stop the calling process until someone sends `SIGCONT`.
pub fn suspend_self() -> Result<()> {
    signal::raise(Signal::SIGSTOP)
        .map_err(|e| EvalError::Signal(format!("raise(SIGSTOP) failed: {}", e)))
}

/// Send `SIGCONT` to a suspended worker.
pub fn resume(pid: Pid) -> Result<()> {
    signal::kill(pid, Signal::SIGCONT)
        .map_err(|e| EvalError::Signal(format!("kill({}, SIGCONT) failed: {}", pid, e)))
}

/// Ignore `SIGPIPE` so writes to a vanished reader fail with `EPIPE`.
pub fn ignore_sigpipe() {
    // Safety: installing SIG_IGN does not run any handler code.
    unsafe {
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn).ok();
    }
}
