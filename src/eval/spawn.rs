//! Worker spawning.
//!
//! Every worker is a forked copy of its parent. The channel to the new worker
//! is created before the fork, and each side closes the end it does not use
//! right after it: the parent keeps only the read end, the child keeps only
//! the write end and drops everything else it inherited from the parent
//! (sibling read ends and the parent's own upstream write end).

use super::channel::channel;
use super::proc::Child;
use super::trace::TransitionLog;
use super::worker_main::run_worker;
use crate::error::{EvalError, Result};
use crate::tree::Expr;
use nix::unistd::{ForkResult, Pid, fork, setpgid};

/// Settings every worker of an evaluation inherits.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Transition log shared by all processes.
    pub log: TransitionLog,
    /// Set each worker's process name to its node label.
    pub name_processes: bool,
}

/// Where a new worker sits in the process hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Root of the worker tree: gets its own process group.
    Root,
    /// Any other worker: stays in its parent's group.
    Nested,
}

/// Fork a worker for `expr`.
///
/// Returns the handle in the parent only; the child runs the worker body and
/// never returns. `release_inherited` runs in the child right after the fork
/// and must drop every handle the child inherited but does not own.
pub fn spawn_worker(
    expr: &Expr,
    node: String,
    placement: Placement,
    ctx: &WorkerContext,
    release_inherited: &mut dyn FnMut(),
) -> Result<Child> {
    let (reader, writer) = channel()?;

    // Safety: the child only runs the worker body, which leaves through `_exit`
    // and never returns into the caller's frames.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(reader);
            release_inherited();
            if placement == Placement::Root {
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
            }
            run_worker(expr, node, writer, ctx)
        }
        Ok(ForkResult::Parent { child }) => {
            drop(writer);
            if placement == Placement::Root {
                // Also set from the parent so the group exists before we signal it.
                let _ = setpgid(child, child);
            }
            tracing::debug!(node = %node, pid = %child, "Spawned worker");
            Ok(Child::new(child, node, reader))
        }
        Err(e) => Err(EvalError::Spawn(format!(
            "fork failed for worker {}: {}",
            node, e
        ))),
    }
}
