//! The controller: drives one evaluation from outside the worker tree.

use super::proc::{ChildState, RootWorker, wait_for_suspended};
use super::protocol::Frame;
use super::spawn::{Placement, WorkerContext, spawn_worker};
use super::trace::{CONTROLLER_NODE, TraceEvent, TransitionLog};
use crate::error::{EvalError, Result};
use crate::tree::{Expr, ROOT_PATH, TreeNode};
use nix::unistd::Pid;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

/// Environment variable naming a transition log file.
pub const TRANSITION_LOG_ENV: &str = "TREEVAL_TRANSITION_LOG";

/// Configuration for an [`Evaluator`].
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Append every worker transition to this file (JSON lines).
    pub transition_log: Option<PathBuf>,
    /// Rename each worker process after its node label.
    pub name_processes: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            transition_log: None,
            name_processes: true,
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transition_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.transition_log = Some(path.into());
        self
    }

    pub fn with_process_names(mut self, enabled: bool) -> Self {
        self.name_processes = enabled;
        self
    }

    /// Apply environment overrides. An explicitly configured log path wins.
    pub fn with_env_overrides(mut self) -> Self {
        if self.transition_log.is_none()
            && let Ok(path) = std::env::var(TRANSITION_LOG_ENV)
            && !path.is_empty()
        {
            self.transition_log = Some(PathBuf::from(path));
        }
        self
    }

    fn log(&self) -> TransitionLog {
        match &self.transition_log {
            Some(path) => TransitionLog::to_file(path),
            None => TransitionLog::disabled(),
        }
    }
}

/// Result of a completed evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Value produced by the root worker.
    pub result: i32,
    /// Pid the root worker had.
    pub root_pid: Pid,
    /// Suspensions the controller observed before it resumed the tree.
    pub observed_ready: usize,
}

/// Evaluates expression trees as trees of worker processes.
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Validate and evaluate `tree`.
    pub fn evaluate(&self, tree: &TreeNode) -> Result<Outcome> {
        self.evaluate_with(tree, |_| {})
    }

    /// Validate and evaluate `tree`, calling `on_ready` with the root pid once
    /// the whole worker tree is suspended and before it is resumed.
    pub fn evaluate_with<F: FnOnce(Pid)>(&self, tree: &TreeNode, on_ready: F) -> Result<Outcome> {
        let expr = Expr::try_from(tree)?;
        self.evaluate_expr(&expr, on_ready)
    }

    /// Evaluate an expression. Its structure is checked before any worker
    /// is spawned.
    ///
    /// Sequence: spawn the root, read its frame, wait for it to suspend
    /// (which implies the whole tree has suspended), run `on_ready`, resume
    /// the root and reap it.
    #[instrument(level = "debug", skip_all, fields(nodes = expr.node_count()))]
    pub fn evaluate_expr<F: FnOnce(Pid)>(&self, expr: &Expr, on_ready: F) -> Result<Outcome> {
        expr.validate()?;
        let ctx = WorkerContext {
            log: self.config.log(),
            name_processes: self.config.name_processes,
        };
        let log = &ctx.log;

        let child = spawn_worker(expr, ROOT_PATH.to_string(), Placement::Root, &ctx, &mut || {})?;
        let mut root = RootWorker::new(child);
        let root_pid = root.pid();
        info!(pid = %root_pid, nodes = expr.node_count(), "Spawned root worker");

        let frame = root.recv();
        let observed_ready = wait_for_suspended(std::slice::from_mut(&mut *root), |child| {
            log.record(TraceEvent::ObservedReady {
                node: CONTROLLER_NODE.to_string(),
                child: child.node().to_string(),
            });
        })?;

        match frame {
            Ok(Frame::Value(result)) if observed_ready == 1 => {
                info!(pid = %root_pid, "Worker tree ready");
                on_ready(root_pid);

                resume_root(&mut root, log)?;
                info!(pid = %root_pid, "Resumed worker tree");
                let reason = root.reap()?;
                if !reason.is_success() {
                    return Err(EvalError::WorkerTerminated {
                        node: ROOT_PATH.to_string(),
                        pid: root_pid.as_raw(),
                        reason: reason.description(),
                    });
                }
                info!(result, "Evaluation complete");
                Ok(Outcome {
                    result,
                    root_pid,
                    observed_ready,
                })
            }
            other => {
                if *root.state() == ChildState::Suspended {
                    resume_root(&mut root, log)?;
                }
                let reason = root.reap()?;
                warn!(pid = %root_pid, %reason, "Evaluation failed");
                Err(match other {
                    Ok(Frame::Failure(stage)) => EvalError::WorkerFailed {
                        stage,
                        node: ROOT_PATH.to_string(),
                    },
                    Err(e) => EvalError::Channel(e),
                    Ok(Frame::Value(_)) => EvalError::WorkerTerminated {
                        node: ROOT_PATH.to_string(),
                        pid: root_pid.as_raw(),
                        reason: reason.description(),
                    },
                })
            }
        }
    }
}

fn resume_root(root: &mut RootWorker, log: &TransitionLog) -> Result<()> {
    log.record(TraceEvent::ResumeSent {
        node: CONTROLLER_NODE.to_string(),
        child: root.node().to_string(),
    });
    root.resume()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::tree::parse_sexpr;

    fn evaluator() -> Evaluator {
        Evaluator::new(EvalConfig::new().with_process_names(false))
    }

    #[test]
    fn test_eval_config_defaults() {
        let config = EvalConfig::default();
        assert!(config.transition_log.is_none());
        assert!(config.name_processes);
    }

    #[test]
    fn test_eval_config_builder() {
        let config = EvalConfig::new()
            .with_transition_log("/tmp/t.jsonl")
            .with_process_names(false);
        assert_eq!(config.transition_log, Some(PathBuf::from("/tmp/t.jsonl")));
        assert!(!config.name_processes);
        // An explicit path is kept even when the environment names another one.
        assert_eq!(
            config.with_env_overrides().transition_log,
            Some(PathBuf::from("/tmp/t.jsonl"))
        );
    }

    #[test]
    fn test_evaluate_reference_tree() {
        let tree = parse_sexpr("(+ (* 3 4) 5)").unwrap();
        let outcome = evaluator().evaluate(&tree).unwrap();
        assert_eq!(outcome.result, 17);
        assert_eq!(outcome.observed_ready, 1);
    }

    #[test]
    fn test_on_ready_runs_once_with_root_pid() {
        let tree = parse_sexpr("(* (+ 1 2) (+ 3 4))").unwrap();
        let mut seen = Vec::new();
        let outcome = evaluator()
            .evaluate_with(&tree, |pid| seen.push(pid))
            .unwrap();
        assert_eq!(outcome.result, 21);
        assert_eq!(seen, vec![outcome.root_pid]);
    }

    #[test]
    fn test_overflow_fails_with_arithmetic_stage() {
        let tree = parse_sexpr("(+ 1 (* 2147483647 2))").unwrap();
        let mut called = false;
        let err = evaluator()
            .evaluate_with(&tree, |_| called = true)
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Arithmetic);
        assert!(matches!(err, EvalError::WorkerFailed { .. }));
        assert!(!called, "snapshot hook must not run for a failed tree");
    }

    #[test]
    fn test_empty_node_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transitions.jsonl");
        let expr = Expr::Node {
            op: crate::tree::Operator::Add,
            children: vec![],
        };
        let err = Evaluator::new(EvalConfig::new().with_transition_log(&path))
            .evaluate_expr(&expr, |_| {})
            .unwrap_err();
        assert!(matches!(err, EvalError::Construction(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_construction_error_spawns_nothing() {
        let tree = parse_sexpr("(+ 1 oops)").unwrap();
        let err = evaluator().evaluate(&tree).unwrap_err();
        assert!(matches!(err, EvalError::Construction(_)));
    }
}
