//! treeval - process-tree expression evaluator

mod cli;

use anyhow::Result;
use clap::Parser;
use owo_colors::{
    OwoColorize,
    Stream::{Stderr, Stdout},
};
use tracing::warn;

use cli::{CheckArgs, Cli, Commands, EvalArgs, TreeSource};
use treeval::logging::{self, LogConfig};
use treeval::{EvalConfig, EvalError, Evaluator, Expr, TreeNode, load_tree, parse_sexpr, pstree};

/// Tree evaluated when no input is given.
const DEFAULT_EXPR: &str = "(+ (* 3 4) 5)";

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Eval(args) => cmd_eval(&cli, args),
        Commands::Check(args) => cmd_check(args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// CLI flags take precedence over the environment.
fn init_logging(cli: &Cli) {
    let mut config = LogConfig::from_verbosity(cli.verbose, cli.quiet)
        .with_env_overrides()
        .with_ansi(!cli.no_color);
    if let Some(format) = cli.log_format {
        config = config.with_format(format.into());
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    logging::init(config);
}

/// Wrap a library error so the top line names the failed stage.
fn staged(e: EvalError) -> anyhow::Error {
    let stage = e.stage();
    anyhow::Error::new(e).context(format!("evaluation failed in the {} stage", stage))
}

fn load_source(source: &TreeSource) -> Result<TreeNode> {
    let tree = match (&source.file, &source.expr) {
        (Some(path), _) => load_tree(path),
        (None, Some(expr)) => parse_sexpr(expr),
        (None, None) => parse_sexpr(DEFAULT_EXPR),
    };
    tree.map_err(staged)
}

fn cmd_eval(cli: &Cli, args: &EvalArgs) -> Result<()> {
    let tree = load_source(&args.source)?;

    if args.print_input {
        if !cli.quiet {
            println!("Input tree:");
        }
        print!("{}", tree);
    }

    let mut config = EvalConfig::default();
    if let Some(path) = &args.transition_log {
        config = config.with_transition_log(path);
    }
    let evaluator = Evaluator::new(config.with_env_overrides());

    let show_tree = args.show_tree;
    let outcome = evaluator
        .evaluate_with(&tree, |root| {
            if !show_tree {
                return;
            }
            match pstree::snapshot(root) {
                Ok(snapshot) => {
                    println!("Worker tree at readiness ({} processes):", snapshot.len());
                    print!("{}", snapshot);
                    if !snapshot.all_stopped() {
                        warn!("Snapshot shows workers that are not stopped");
                    }
                }
                Err(e) => warn!(error = %e, "Could not capture the worker tree"),
            }
        })
        .map_err(staged)?;

    println!(
        "Final result is: {}",
        outcome
            .result
            .if_supports_color(Stdout, |text| text.bold())
    );
    Ok(())
}

fn cmd_check(args: &CheckArgs) -> Result<()> {
    let tree = load_source(&args.source)?;
    let expr = Expr::try_from(&tree).map_err(staged)?;
    let value = expr.evaluate_local().map_err(staged)?;

    println!("{} = {}", expr.to_sexpr(), value);
    println!("Final result is: {}", value);
    Ok(())
}
