//! Error types for treeval.

use thiserror::Error;

/// Stage of an evaluation in which a failure happened.
///
/// The stages that a worker can hit at runtime have a wire code so a
/// failing worker can report them to its parent in a failure frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Tree validation or input loading, before any worker exists.
    Construction,
    /// Creating a channel or forking a worker.
    Spawn,
    /// Reading or writing a result frame.
    Channel,
    /// Suspend, resume or wait primitives.
    Signal,
    /// Integer overflow while combining child results.
    Arithmetic,
    /// Process-tree snapshot (diagnostics only).
    Diagnostic,
}

impl Stage {
    /// Wire code carried in a failure frame, if this stage can occur inside a worker.
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Spawn => Some(1),
            Self::Channel => Some(2),
            Self::Signal => Some(3),
            Self::Arithmetic => Some(4),
            Self::Construction | Self::Diagnostic => None,
        }
    }

    /// Code written into a failure frame. Stages that never happen inside a
    /// worker travel as [`Stage::Signal`].
    pub fn wire_code(self) -> i32 {
        match self.code() {
            Some(code) => code,
            None => Self::Signal.wire_code(),
        }
    }

    /// Inverse of [`Stage::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Spawn),
            2 => Some(Self::Channel),
            3 => Some(Self::Signal),
            4 => Some(Self::Arithmetic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Construction => "construction",
            Self::Spawn => "spawn",
            Self::Channel => "channel",
            Self::Signal => "signal",
            Self::Arithmetic => "arithmetic",
            Self::Diagnostic => "diagnostic",
        };
        f.write_str(name)
    }
}

/// Violations of the one-frame-per-channel protocol.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel closed before a frame arrived")]
    Closed,

    #[error("short read: got {0} bytes of a frame")]
    ShortRead(usize),

    #[error("short write: wrote {0} bytes of a frame")]
    ShortWrite(usize),

    #[error("unknown frame tag {0}")]
    UnknownTag(i32),

    #[error("unknown failure stage code {0}")]
    UnknownStage(i32),

    #[error("channel already consumed")]
    Consumed,

    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for treeval.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Invalid expression tree: {0}")]
    Construction(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Channel protocol violation: {0}")]
    Channel(#[from] ChannelError),

    #[error("Signal error: {0}")]
    Signal(String),

    #[error("Arithmetic overflow at node {0}")]
    Overflow(String),

    #[error("Worker {node} reported a failure in the {stage} stage")]
    WorkerFailed { stage: Stage, node: String },

    #[error("Worker {node} (pid {pid}) {reason}")]
    WorkerTerminated {
        node: String,
        pid: i32,
        reason: String,
    },

    #[error("Snapshot unavailable: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// The evaluation stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Construction(_) | Self::Parse { .. } | Self::Io(_) | Self::Json(_) => {
                Stage::Construction
            }
            Self::Spawn(_) => Stage::Spawn,
            Self::Channel(_) => Stage::Channel,
            Self::Signal(_) | Self::WorkerTerminated { .. } => Stage::Signal,
            Self::Overflow(_) => Stage::Arithmetic,
            Self::WorkerFailed { stage, .. } => *stage,
            Self::Snapshot(_) => Stage::Diagnostic,
        }
    }
}

/// Result type alias for treeval operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_stage_codes_are_reversible() {
        for stage in [Stage::Spawn, Stage::Channel, Stage::Signal, Stage::Arithmetic] {
            let code = stage.code().unwrap();
            assert_eq!(Stage::from_code(code), Some(stage));
        }
        assert_eq!(Stage::Construction.code(), None);
        assert_eq!(Stage::Diagnostic.code(), None);
        assert_eq!(Stage::from_code(0), None);
        assert_eq!(Stage::from_code(99), None);
    }

    #[test]
    fn test_wire_code_always_decodes() {
        for stage in [
            Stage::Construction,
            Stage::Spawn,
            Stage::Channel,
            Stage::Signal,
            Stage::Arithmetic,
            Stage::Diagnostic,
        ] {
            let decoded = Stage::from_code(stage.wire_code()).unwrap();
            if stage.code().is_some() {
                assert_eq!(decoded, stage);
            } else {
                assert_eq!(decoded, Stage::Signal);
            }
        }
    }

    #[test]
    fn test_construction_error_message() {
        let err = EvalError::Construction("leaf 'x' is not an integer".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Invalid expression tree"));
        assert!(msg.contains("'x'"));
        assert_eq!(err.stage(), Stage::Construction);
    }

    #[test]
    fn test_parse_error_message() {
        let err = EvalError::Parse {
            line: 7,
            message: "expected child count".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 7"));
        assert!(msg.contains("expected child count"));
    }

    #[test]
    fn test_worker_failed_reports_stage() {
        let err = EvalError::WorkerFailed {
            stage: Stage::Arithmetic,
            node: "r".to_string(),
        };
        assert_eq!(err.stage(), Stage::Arithmetic);
        assert!(err.to_string().contains("arithmetic stage"));
    }

    #[test]
    fn test_channel_error_conversion() {
        let err: EvalError = ChannelError::ShortRead(3).into();
        assert_eq!(err.stage(), Stage::Channel);
        assert!(err.to_string().contains("3 bytes"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: EvalError = io_err.into();
        assert!(err.to_string().contains("file not found"));
        assert_eq!(err.stage(), Stage::Construction);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }").unwrap_err();
        let err: EvalError = json_err.into();
        assert!(err.to_string().contains("JSON"));
    }
}
