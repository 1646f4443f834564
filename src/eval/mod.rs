//! Process-tree evaluation.
//!
//! Every node of an expression tree runs in its own process. Each worker
//! reports its value to its parent over a private pipe and then suspends
//! itself. Suspension propagates bottom-up: a worker only suspends after all
//! of its children have, so once the root has stopped the whole tree is
//! stopped, and the controller can inspect it before resuming.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐
//!                  │  Controller  │
//!                  └──────┬───────┘
//!                         │ pipe + SIGSTOP/SIGCONT
//!                  ┌──────▼───────┐
//!                  │  r   (+)     │
//!                  └──┬────────┬──┘
//!                     │        │
//!            ┌────────▼──┐  ┌──▼────────┐
//!            │ r.0  (*)  │  │ r.1  (5)  │
//!            └──┬─────┬──┘  └───────────┘
//!               │     │
//!        ┌──────▼─┐ ┌─▼──────┐
//!        │ r.0.0  │ │ r.0.1  │
//!        │  (3)   │ │  (4)   │
//!        └────────┘ └────────┘
//! ```
//!
//! # Lifecycle of a worker
//!
//! - **Spawn**: fork, keep only the write end of the pipe to the parent
//! - **Compute**: leaf sends its operand; internal node reads its children
//!   in declared order and waits until all of them have suspended
//! - **Suspend**: `SIGSTOP` itself after sending its frame upstream
//! - **Release**: once continued, resume and reap its own children, then exit

mod channel;
mod controller;
mod proc;
mod protocol;
mod signals;
mod spawn;
pub mod trace;
mod worker_main;

pub use controller::{EvalConfig, Evaluator, Outcome, TRANSITION_LOG_ENV};
pub use signals::TerminationReason;
pub use trace::{CONTROLLER_NODE, TraceEvent, TransitionLog, WorkerState};
