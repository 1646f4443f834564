//! Worker process body.
//!
//! Runs in every forked worker. A leaf sends its operand upstream; an internal
//! worker spawns its children, reads one frame from each child in declared
//! order, waits until all children have suspended, and sends the combined
//! value upstream. Every worker then suspends itself until its parent resumes
//! it, resumes and reaps its own children, and exits.
//!
//! A worker that fails sends a failure frame upstream instead of a value,
//! releases and reaps whatever children it has, and exits non-zero without
//! suspending, so its parent's counting-wait sees the termination right away.

use super::channel::ChannelWriter;
use super::proc::{Child, ChildState, wait_for_suspended};
use super::protocol::Frame;
use super::signals;
use super::spawn::{Placement, WorkerContext, spawn_worker};
use super::trace::{TraceEvent, WorkerState};
use crate::error::{ChannelError, EvalError, Result, Stage};
use crate::tree::{Expr, Operator, child_path};
use nix::unistd::{Pid, getpid};
use tracing::{debug, error, info, warn};

/// Exit code of a worker whose subtree failed.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Run the worker for `expr` in the current (freshly forked) process.
///
/// Never returns: the process leaves through `_exit`.
pub fn run_worker(expr: &Expr, node: String, upstream: ChannelWriter, ctx: &WorkerContext) -> ! {
    signals::ignore_sigpipe();
    if ctx.name_processes {
        set_process_name(&expr.label());
    }

    let worker = Worker {
        node,
        pid: getpid(),
        ctx,
    };
    let code = match worker.run(expr, upstream) {
        Ok(()) => 0,
        Err(e) => {
            error!(node = %worker.node, pid = %worker.pid, error = %e, "Worker failed");
            FAILURE_EXIT_CODE
        }
    };
    exit_now(code)
}

fn exit_now(code: i32) -> ! {
    // Safety: `_exit` ends the process without running destructors or atexit
    // handlers that belong to the parent's copied image.
    unsafe { nix::libc::_exit(code) }
}

#[cfg(target_os = "linux")]
fn set_process_name(label: &str) {
    if let Ok(name) = std::ffi::CString::new(label) {
        let _ = nix::sys::prctl::set_name(&name);
    }
}

#[cfg(not(target_os = "linux"))]
fn set_process_name(_label: &str) {}

struct Worker<'a> {
    node: String,
    pid: Pid,
    ctx: &'a WorkerContext,
}

impl Worker<'_> {
    fn transition(&self, state: WorkerState) {
        debug!(node = %self.node, pid = %self.pid, state = ?state, "Worker transition");
        self.ctx.log.record(TraceEvent::Transition {
            node: self.node.clone(),
            pid: self.pid.as_raw(),
            state,
        });
    }

    fn run(&self, expr: &Expr, upstream: ChannelWriter) -> Result<()> {
        self.transition(WorkerState::Created);
        self.transition(WorkerState::Running);
        match expr {
            Expr::Leaf(value) => self.run_leaf(*value, upstream),
            Expr::Node { op, children } => self.run_internal(*op, children, upstream),
        }
    }

    fn run_leaf(&self, value: i32, upstream: ChannelWriter) -> Result<()> {
        self.transition(WorkerState::Computed);
        if let Err(e) = upstream.send(Frame::Value(value)) {
            self.transition(WorkerState::Failed);
            return Err(e.into());
        }
        if let Err(e) = self.suspend() {
            self.transition(WorkerState::Failed);
            return Err(e);
        }
        self.transition(WorkerState::Exited);
        Ok(())
    }

    fn run_internal(&self, op: Operator, exprs: &[Expr], upstream: ChannelWriter) -> Result<()> {
        let mut upstream = Some(upstream);
        let mut children: Vec<Child> = Vec::with_capacity(exprs.len());
        let mut failure: Option<Stage> = None;

        for (i, expr) in exprs.iter().enumerate() {
            let spawned = spawn_worker(
                expr,
                child_path(&self.node, i),
                Placement::Nested,
                self.ctx,
                &mut || {
                    drop(upstream.take());
                    children.clear();
                },
            );
            match spawned {
                Ok(child) => children.push(child),
                Err(e) => {
                    error!(node = %self.node, error = %e, "Failed to spawn child");
                    failure = Some(e.stage());
                    break;
                }
            }
        }

        let Some(upstream) = upstream.take() else {
            self.abort(&mut children);
            return Err(ChannelError::Consumed.into());
        };
        self.combine(op, children, failure, upstream)
    }

    /// Collect the children's frames, wait for them to suspend, and report
    /// the combined value (or the first failure) upstream.
    fn combine(
        &self,
        op: Operator,
        mut children: Vec<Child>,
        mut failure: Option<Stage>,
        upstream: ChannelWriter,
    ) -> Result<()> {
        self.transition(WorkerState::AwaitingChildren);
        let mut values = Vec::with_capacity(children.len());
        for child in &mut children {
            match child.recv() {
                Ok(Frame::Value(value)) => values.push(value),
                Ok(Frame::Failure(stage)) => {
                    warn!(node = %self.node, child = %child.node(), %stage, "Child reported failure");
                    failure.get_or_insert(stage);
                }
                Err(e) => {
                    warn!(node = %self.node, child = %child.node(), error = %e, "Bad frame from child");
                    failure.get_or_insert(Stage::Channel);
                }
            }
        }

        let expected = children.len();
        let log = &self.ctx.log;
        let observed = wait_for_suspended(&mut children, |child| {
            log.record(TraceEvent::ObservedReady {
                node: self.node.clone(),
                child: child.node().to_string(),
            });
        });
        match observed {
            Ok(count) if count == expected => {}
            Ok(count) => {
                warn!(node = %self.node, suspended = count, expected, "Children terminated before suspending");
                failure.get_or_insert(Stage::Signal);
            }
            Err(e) => {
                warn!(node = %self.node, error = %e, "Counting-wait failed");
                failure.get_or_insert(Stage::Signal);
            }
        }

        let outcome = match failure {
            Some(stage) => Err(stage),
            None => op.fold(&values).ok_or(Stage::Arithmetic),
        };

        match outcome {
            Ok(result) => {
                info!(node = %self.node, pid = %self.pid, %op, ?values, result, "Computed");
                self.transition(WorkerState::Computed);
                if let Err(e) = upstream.send(Frame::Value(result)) {
                    self.abort(&mut children);
                    return Err(e.into());
                }
                if let Err(e) = self.suspend() {
                    self.abort(&mut children);
                    return Err(e);
                }
                if let Err(e) = self.release_children(&mut children) {
                    self.transition(WorkerState::Failed);
                    return Err(e);
                }
                self.transition(WorkerState::Exited);
                Ok(())
            }
            Err(stage) => {
                warn!(node = %self.node, %stage, "Reporting failure upstream");
                if let Err(e) = upstream.send(Frame::Failure(stage)) {
                    warn!(node = %self.node, error = %e, "Could not report failure upstream");
                }
                self.abort(&mut children);
                Err(EvalError::WorkerFailed {
                    stage,
                    node: self.node.clone(),
                })
            }
        }
    }

    /// Announce readiness by stopping, and continue once resumed.
    fn suspend(&self) -> Result<()> {
        self.transition(WorkerState::Suspended);
        signals::suspend_self()?;
        self.transition(WorkerState::Resumed);
        Ok(())
    }

    /// Resume every suspended child and reap all of them, in declared order.
    fn release_children(&self, children: &mut [Child]) -> Result<()> {
        let mut first_error = None;
        for child in children.iter_mut() {
            if *child.state() == ChildState::Running {
                // Only reachable on failure paths that skipped the counting-wait.
                if let Err(e) = child.wait_until_suspended() {
                    warn!(node = %self.node, child = %child.node(), error = %e, "Lost track of child");
                    first_error.get_or_insert(e);
                    continue;
                }
            }
            if *child.state() == ChildState::Suspended {
                self.ctx.log.record(TraceEvent::ResumeSent {
                    node: self.node.clone(),
                    child: child.node().to_string(),
                });
            }
            if let Err(e) = child.resume() {
                first_error.get_or_insert(e);
                continue;
            }
            match child.reap() {
                Ok(reason) if reason.is_success() => {
                    debug!(node = %self.node, child = %child.node(), "Child exited");
                }
                Ok(reason) => {
                    first_error.get_or_insert(EvalError::WorkerTerminated {
                        node: child.node().to_string(),
                        pid: child.pid().as_raw(),
                        reason: reason.description(),
                    });
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Failure path: release and reap the children without reporting their
    /// exit statuses, then mark this worker failed.
    fn abort(&self, children: &mut [Child]) {
        if let Err(e) = self.release_children(children) {
            debug!(node = %self.node, error = %e, "Errors while releasing children");
        }
        self.transition(WorkerState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::channel::channel;
    use crate::eval::trace::TransitionLog;
    use nix::unistd::{ForkResult, fork};
    use std::path::Path;

    // The test process plays worker `r`. Only failure paths are exercised
    // here: the success path would stop the test process itself.
    fn context(path: &Path) -> WorkerContext {
        WorkerContext {
            log: TransitionLog::to_file(path),
            name_processes: false,
        }
    }

    fn leaf(value: i32, node: &str, ctx: &WorkerContext) -> Child {
        spawn_worker(&Expr::Leaf(value), node.to_string(), Placement::Nested, ctx, &mut || {})
            .unwrap()
    }

    /// A child that exits without writing its frame.
    fn silent(node: &str) -> Child {
        let (reader, writer) = channel().unwrap();
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                drop(writer);
                drop(reader);
                exit_now(0)
            }
            ForkResult::Parent { child } => {
                drop(writer);
                Child::new(child, node.to_string(), reader)
            }
        }
    }

    fn last_state(events: &[TraceEvent], node: &str) -> Option<WorkerState> {
        events.iter().rev().find_map(|e| match e {
            TraceEvent::Transition { node: n, state, .. } if n == node => Some(*state),
            _ => None,
        })
    }

    #[test]
    fn test_child_closing_without_frame_fails_with_channel_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let ctx = context(&path);
        let worker = Worker {
            node: "r".to_string(),
            pid: getpid(),
            ctx: &ctx,
        };

        let children = vec![leaf(4, "r.0", &ctx), silent("r.1")];
        let (reader, writer) = channel().unwrap();
        let err = worker
            .combine(Operator::Add, children, None, writer)
            .unwrap_err();

        match err {
            EvalError::WorkerFailed { stage, node } => {
                assert_eq!(stage, Stage::Channel);
                assert_eq!(node, "r");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(reader.recv().unwrap(), Frame::Failure(Stage::Channel));

        let events = TransitionLog::read(&path).unwrap();
        assert_eq!(last_state(&events, "r.0"), Some(WorkerState::Exited));
        assert_eq!(last_state(&events, "r"), Some(WorkerState::Failed));
        assert!(events.contains(&TraceEvent::ResumeSent {
            node: "r".to_string(),
            child: "r.0".to_string(),
        }));
    }

    #[test]
    fn test_spawn_failure_is_forwarded_and_siblings_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let ctx = context(&path);
        let worker = Worker {
            node: "r".to_string(),
            pid: getpid(),
            ctx: &ctx,
        };

        let children = vec![leaf(7, "r.0", &ctx)];
        let (reader, writer) = channel().unwrap();
        let err = worker
            .combine(Operator::Multiply, children, Some(Stage::Spawn), writer)
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Spawn);
        assert_eq!(reader.recv().unwrap(), Frame::Failure(Stage::Spawn));

        let events = TransitionLog::read(&path).unwrap();
        assert_eq!(last_state(&events, "r.0"), Some(WorkerState::Exited));
        assert_eq!(last_state(&events, "r"), Some(WorkerState::Failed));
        assert!(!events.iter().any(|e| matches!(
            e,
            TraceEvent::Transition { node, state: WorkerState::Computed, .. } if node == "r"
        )));
    }
}
