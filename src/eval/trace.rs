//! Instrumented transition log.
//!
//! When enabled, every worker and the controller append one JSON line per
//! event to a shared file opened with `O_APPEND`. Each event is a single
//! `write`, so lines from different processes never interleave and the file
//! order follows the order in which the events happened.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Node id used by the controller in log events.
pub const CONTROLLER_NODE: &str = "controller";

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    Running,
    AwaitingChildren,
    Computed,
    Suspended,
    Resumed,
    Exited,
    /// Terminal state of a worker that reported a failure upward.
    Failed,
}

/// One line of the transition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A worker changed state.
    Transition {
        node: String,
        pid: i32,
        state: WorkerState,
    },
    /// `node` observed that its child `child` suspended.
    ObservedReady { node: String, child: String },
    /// `node` sent resume to its child `child`.
    ResumeSent { node: String, child: String },
}

impl TraceEvent {
    /// Serialize to a JSON line (with newline).
    pub fn to_line(&self) -> Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from a JSON line.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

/// Append-only event sink shared by all processes of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct TransitionLog {
    path: Option<PathBuf>,
}

impl TransitionLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Append an event. Failures are logged and otherwise ignored: the log is
    /// diagnostics, not part of the evaluation protocol.
    pub fn record(&self, event: TraceEvent) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = Self::append(path, &event) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to append transition event");
        }
    }

    fn append(path: &Path, event: &TraceEvent) -> Result<()> {
        let line = event.to_line()?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Read every event back from a log file.
    pub fn read(path: &Path) -> Result<Vec<TraceEvent>> {
        let contents = std::fs::read_to_string(path)?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(TraceEvent::from_line)
            .collect()
    }
}
