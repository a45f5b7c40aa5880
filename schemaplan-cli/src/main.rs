mod output;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use schemaplan_core::config::{CliOverrides, PlannerConfig};
use schemaplan_core::error::PlanError;
use schemaplan_core::{PlannedDiffPerResource, SchemaPlanner};

#[derive(Parser)]
#[command(
    name = "schemaplan",
    about = "Plan FQL schema changes as one ordered transaction",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_HASH"), " ", env!("BUILD_TIME"), ")"
    ),
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Prefix of the transaction's binding variables (overrides config)
    #[arg(long, value_name = "PREFIX")]
    binding_prefix: Option<String>,

    /// What the transaction returns: last or all (overrides config)
    #[arg(long, value_name = "MODE")]
    result: Option<String>,

    /// Directory migrations are written to (overrides config)
    #[arg(long, value_name = "DIR")]
    migrations_dir: Option<PathBuf>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Order the statements of a diff and compile them into a transaction
    Plan {
        /// Diff file (JSON)
        diff: PathBuf,

        /// Write one migration per database under the migrations directory
        #[arg(long)]
        write: bool,
    },

    /// Show the dependencies between the statements of a diff
    Deps {
        /// Diff file (JSON)
        diff: PathBuf,
    },

    /// Check a written migration against its manifest checksums
    Verify {
        /// Migration directory containing manifest.json
        migration: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging (suppress when JSON output is requested)
    let filter = if cli.json {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .without_time()
        .init();

    if let Err(e) = run(cli) {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &PlanError) -> i32 {
    match error {
        PlanError::ConfigError(_) => 2,
        PlanError::CircularDependency { .. } => 3,
        PlanError::UnresolvedDependency { .. } => 4,
        PlanError::RewriteFailed { .. } => 4,
        PlanError::InvalidStatement { .. } => 5,
        _ => 1,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PlanError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<(), PlanError> {
    let json_output = cli.json;

    let overrides = CliOverrides {
        binding_prefix: cli.binding_prefix,
        result: cli.result,
        migrations_dir: cli.migrations_dir,
    };

    let config = PlannerConfig::load(cli.config.as_deref(), &overrides)?;
    tracing::debug!(
        binding_prefix = %config.planner.binding_prefix,
        result = %config.planner.result,
        "Loaded configuration"
    );
    let planner = SchemaPlanner::new(config);

    match cli.command {
        Commands::Plan { diff, write } => {
            let diff = PlannedDiffPerResource::load(&diff)?;
            let report = planner.report(&diff, write)?;
            if json_output {
                print_json(&report)?;
            } else {
                output::print_plan(&report);
            }
        }
        Commands::Deps { diff } => {
            let diff = PlannedDiffPerResource::load(&diff)?;
            let report = planner.dependencies(&diff)?;
            if json_output {
                print_json(&report)?;
            } else {
                output::print_deps_table(&report);
            }
        }
        Commands::Verify { migration } => {
            let report = planner.verify(&migration)?;
            if json_output {
                print_json(&report)?;
            } else {
                output::print_verify_result(&report);
            }
        }
    }

    Ok(())
}

fn print_error(error: &PlanError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    // Provide actionable guidance
    match error {
        PlanError::ConfigError(_) => {
            eprintln!(
                "{}",
                "Hint: Check your schemaplan.toml, the SCHEMAPLAN_* environment variables and the diff file's kind names."
                    .dimmed()
            );
        }
        PlanError::CircularDependency { .. } => {
            eprintln!(
                "{}",
                "Hint: Indexes cannot be stubbed, and databases that reference each other cannot run as separate transactions. Split the change across migrations."
                    .dimmed()
            );
        }
        PlanError::ExpressionParseError(_) => {
            eprintln!(
                "{}",
                "Hint: Every diff resource must be a create expression in FQL wire JSON.".dimmed()
            );
        }
        PlanError::VerificationFailed(_) => {
            eprintln!(
                "{}",
                "Hint: Restore the original files or plan the migration again.".dimmed()
            );
        }
        _ => {}
    }
}
