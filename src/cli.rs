//! Command-line interface definitions using clap.

use crate::logging::LogFormat;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Evaluate arithmetic expression trees with one process per node.
#[derive(Parser, Debug)]
#[command(name = "treeval")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors and the result.
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormatArg>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a tree with one worker process per node.
    Eval(EvalArgs),

    /// Validate a tree and print its value without spawning workers.
    Check(CheckArgs),
}

/// Where to read the tree from.
#[derive(Args, Debug)]
pub struct TreeSource {
    /// Tree file (JSON, s-expression or line format). Defaults to the
    /// built-in example tree `(+ (* 3 4) 5)`.
    #[arg(conflicts_with = "expr")]
    pub file: Option<PathBuf>,

    /// Inline s-expression, e.g. "(* (+ 1 2) (+ 3 4))".
    #[arg(short, long)]
    pub expr: Option<String>,
}

/// Arguments for the eval command.
#[derive(Args, Debug)]
pub struct EvalArgs {
    #[command(flatten)]
    pub source: TreeSource,

    /// Print the worker process tree while every worker is suspended.
    #[arg(long)]
    pub show_tree: bool,

    /// Print the input tree before evaluating.
    #[arg(long)]
    pub print_input: bool,

    /// Append worker state transitions to this file as JSON lines.
    #[arg(long, env = "TREEVAL_TRANSITION_LOG")]
    pub transition_log: Option<PathBuf>,
}

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub source: TreeSource,
}

/// Log format options for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
