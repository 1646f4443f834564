//! treeval - evaluate arithmetic expression trees as a tree of processes.
//!
//! Each node of the tree runs in its own forked worker process. Workers pass
//! results upward over pipes and synchronise with `SIGSTOP`/`SIGCONT`, so the
//! whole process tree can be observed in a suspended state before the result
//! is released.
//!
//! ```no_run
//! use treeval::{Evaluator, EvalConfig, parse_sexpr};
//!
//! let tree = parse_sexpr("(+ (* 3 4) 5)")?;
//! let outcome = Evaluator::new(EvalConfig::default()).evaluate(&tree)?;
//! assert_eq!(outcome.result, 17);
//! # Ok::<(), treeval::EvalError>(())
//! ```

pub mod error;
pub mod eval;
pub mod logging;
pub mod pstree;
pub mod tree;

pub use error::{ChannelError, EvalError, Result, Stage};
pub use eval::{EvalConfig, Evaluator, Outcome};
pub use pstree::{ProcessSnapshot, snapshot};
pub use tree::{Expr, Operator, TreeNode, load_tree, parse_sexpr};
