//! Handles to spawned workers.
//!
//! A [`Child`] is owned by the process that forked it and tracks where the
//! child is in the suspend/resume protocol, so resume is only ever sent to a
//! child whose suspension was observed, and at most once.
//!
//! `Child` has no `Drop` side effects: forked workers inherit copies of their
//! parent's sibling handles and must be able to discard them without
//! signalling processes they do not own. The controller's [`RootWorker`]
//! adds kill-on-drop on top.

use super::channel::ChannelReader;
use super::protocol::Frame;
use super::signals::{self, Readiness, TerminationReason};
use crate::error::{ChannelError, EvalError, Result};
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

/// Protocol state of a child as seen by its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildState {
    /// Spawned, suspension not observed yet.
    Running,
    /// Observed stopped, waiting for resume.
    Suspended,
    /// Resume sent.
    Resumed,
    /// Terminated and reaped.
    Reaped(TerminationReason),
}

/// Handle to a direct child worker.
#[derive(Debug)]
pub struct Child {
    pid: Pid,
    node: String,
    reader: Option<ChannelReader>,
    state: ChildState,
}

impl Child {
    pub fn new(pid: Pid, node: String, reader: ChannelReader) -> Self {
        Self {
            pid,
            node,
            reader: Some(reader),
            state: ChildState::Running,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Node path of the worker.
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn state(&self) -> &ChildState {
        &self.state
    }

    /// Receive the child's single result frame.
    pub fn recv(&mut self) -> std::result::Result<Frame, ChannelError> {
        self.reader.take().ok_or(ChannelError::Consumed)?.recv()
    }

    /// Record what the counting-wait observed for this child.
    pub fn observe(&mut self, readiness: Readiness) {
        self.state = match readiness {
            Readiness::Suspended => ChildState::Suspended,
            Readiness::Terminated(reason) => ChildState::Reaped(reason),
        };
    }

    /// Block until this child suspends or terminates.
    pub fn wait_until_suspended(&mut self) -> Result<&ChildState> {
        if self.state == ChildState::Running {
            let readiness = signals::wait_until_suspended(self.pid)?;
            self.observe(readiness);
        }
        Ok(&self.state)
    }

    /// Resume the child if its suspension was observed.
    ///
    /// Returns whether a signal was sent. Resuming twice is a no-op.
    pub fn resume(&mut self) -> Result<bool> {
        match self.state {
            ChildState::Suspended => {
                signals::resume(self.pid)?;
                self.state = ChildState::Resumed;
                Ok(true)
            }
            ChildState::Running => Err(EvalError::Signal(format!(
                "refusing to resume worker {} before its suspension was observed",
                self.node
            ))),
            ChildState::Resumed | ChildState::Reaped(_) => Ok(false),
        }
    }

    /// Wait for the child to terminate, reaping it once.
    pub fn reap(&mut self) -> Result<TerminationReason> {
        if let ChildState::Reaped(reason) = &self.state {
            return Ok(reason.clone());
        }
        let reason = signals::wait_for_exit(self.pid)?;
        self.state = ChildState::Reaped(reason.clone());
        Ok(reason)
    }

    pub fn is_reaped(&self) -> bool {
        matches!(self.state, ChildState::Reaped(_))
    }
}

/// Counting-wait over a set of direct children.
///
/// Blocks until every child has either suspended or terminated, calling
/// `on_ready` for each child observed suspended, and returns how many did.
/// Each child's state is updated as soon as it is observed, so after an error
/// the children already seen can still be resumed and reaped.
pub fn wait_for_suspended(
    children: &mut [Child],
    mut on_ready: impl FnMut(&Child),
) -> Result<usize> {
    let mut suspended = 0;
    for child in children.iter_mut() {
        if *child.wait_until_suspended()? == ChildState::Suspended {
            on_ready(child);
            suspended += 1;
        }
    }
    Ok(suspended)
}

/// The controller's handle to the root worker.
///
/// The root runs in its own process group. If the handle is dropped before the
/// root was reaped (an error path in the controller), the whole group is
/// killed and the root reaped, so no stopped subtree is left behind.
#[derive(Debug)]
pub struct RootWorker {
    child: Child,
}

impl RootWorker {
    pub fn new(child: Child) -> Self {
        Self { child }
    }

    pub fn pid(&self) -> Pid {
        self.child.pid()
    }
}

impl std::ops::Deref for RootWorker {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.child
    }
}

impl std::ops::DerefMut for RootWorker {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

impl Drop for RootWorker {
    fn drop(&mut self) {
        if !self.child.is_reaped() {
            tracing::warn!(pid = %self.child.pid(), "Killing unfinished worker tree");
            let _ = killpg(self.child.pid(), Signal::SIGKILL);
            let _ = waitpid(self.child.pid(), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::channel::channel;
    use nix::unistd::{ForkResult, fork, setpgid};

    fn exit_now(code: i32) -> ! {
        // Safety: `_exit` skips destructors and atexit handlers of the test harness.
        unsafe { nix::libc::_exit(code) }
    }

    fn spawn_suspending(value: i32) -> Child {
        let (reader, writer) = channel().unwrap();
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                drop(reader);
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                let _ = writer.send(Frame::Value(value));
                let _ = signals::suspend_self();
                exit_now(0);
            }
            ForkResult::Parent { child } => {
                drop(writer);
                let _ = setpgid(child, child);
                Child::new(child, "r".to_string(), reader)
            }
        }
    }

    #[test]
    fn test_child_protocol_sequence() {
        let mut child = spawn_suspending(5);
        assert_eq!(child.node(), "r");
        assert_eq!(child.recv().unwrap(), Frame::Value(5));
        assert!(matches!(child.recv(), Err(ChannelError::Consumed)));

        assert_eq!(child.wait_until_suspended().unwrap(), &ChildState::Suspended);
        assert!(child.resume().unwrap());
        assert!(!child.resume().unwrap(), "second resume must not signal");
        assert_eq!(child.reap().unwrap(), TerminationReason::Exited(0));
        assert!(child.is_reaped());
        // Reaping again returns the recorded status without waiting.
        assert_eq!(child.reap().unwrap(), TerminationReason::Exited(0));
    }

    #[test]
    fn test_resume_before_observed_is_refused() {
        let mut child = spawn_suspending(1);
        assert!(matches!(child.resume(), Err(EvalError::Signal(_))));
        child.wait_until_suspended().unwrap();
        child.resume().unwrap();
        child.reap().unwrap();
    }

    #[test]
    fn test_counting_wait_over_children() {
        let mut children = vec![spawn_suspending(1), spawn_suspending(2), spawn_suspending(3)];
        let mut seen = Vec::new();
        let count = wait_for_suspended(&mut children, |child| seen.push(child.pid())).unwrap();
        assert_eq!(count, 3);
        assert_eq!(seen, children.iter().map(Child::pid).collect::<Vec<_>>());

        let values: Vec<Frame> = children.iter_mut().map(|c| c.recv().unwrap()).collect();
        assert_eq!(values, vec![Frame::Value(1), Frame::Value(2), Frame::Value(3)]);

        for child in &mut children {
            assert!(child.resume().unwrap());
            assert!(child.reap().unwrap().is_success());
        }
    }

    #[test]
    fn test_root_worker_drop_kills_tree() {
        let child = spawn_suspending(1);
        let pid = child.pid();
        let mut root = RootWorker::new(child);
        root.wait_until_suspended().unwrap();
        drop(root);
        // The process has been reaped by drop, so it no longer exists.
        assert!(nix::sys::signal::kill(pid, None).is_err());
    }
}
