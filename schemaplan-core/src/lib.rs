pub mod checksum;
pub mod commands;
pub mod compile;
pub mod config;
pub mod dependency;
pub mod diff;
pub mod error;
pub mod expr;
pub mod generate;
pub mod resource;
pub mod schedule;
pub mod statement;
pub mod transform;
pub mod writer;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use config::PlannerConfig;
use error::Result;

pub use commands::deps::DepsReport;
pub use commands::plan::PlanReport;
pub use commands::verify::VerifyReport;
pub use compile::{Binding, CompiledTransaction};
pub use config::CliOverrides;
pub use diff::PlannedDiffPerResource;
pub use error::PlanError;
pub use expr::Expr;
pub use resource::{ResourceKey, ResourceKind, StatementKind};
pub use statement::{Statement, StatementOrigin};

/// The part of a plan that runs inside one database.
#[derive(Debug, Clone, Serialize)]
pub struct DatabasePlan {
    /// Empty for the root database.
    pub db_path: Vec<String>,
    pub statements: Vec<Statement>,
    pub transaction: CompiledTransaction,
}

/// Result of planning one diff.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationPlan {
    /// Statements in execution order, before reference rewriting.
    pub statements: Vec<Statement>,
    /// Batch-internal dependencies of each entry of `statements`.
    pub dependencies: Vec<BTreeSet<ResourceKey>>,
    /// One transaction per database, in the order they must run.
    pub databases: Vec<DatabasePlan>,
    /// Resources created as stubs to break dependency cycles.
    pub stubbed: Vec<ResourceKey>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Transaction compiled for the database at `db_path`, if it has any statements.
    pub fn transaction(&self, db_path: &[String]) -> Option<&CompiledTransaction> {
        self.databases
            .iter()
            .find(|database| database.db_path == db_path)
            .map(|database| &database.transaction)
    }
}

/// Main entry point for the planner library.
///
/// Create a `SchemaPlanner` with a config and use its methods to plan
/// diffs programmatically. Planning itself does no I/O.
pub struct SchemaPlanner {
    pub config: PlannerConfig,
}

impl SchemaPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Generate, order and compile the statements for `diff`.
    pub fn plan(&self, diff: &PlannedDiffPerResource) -> Result<MigrationPlan> {
        commands::plan::build_plan(&self.config, diff)
    }

    /// Plan `diff` and summarize it, writing one migration per database when `write` is set.
    pub fn report(&self, diff: &PlannedDiffPerResource, write: bool) -> Result<PlanReport> {
        commands::plan::execute(&self.config, diff, write)
    }

    /// Dependency edges of every generated statement, before ordering.
    pub fn dependencies(&self, diff: &PlannedDiffPerResource) -> Result<DepsReport> {
        commands::deps::execute(diff)
    }

    /// Write an already computed plan under the configured migrations directory.
    ///
    /// Returns one migration directory per database, in execution order.
    pub fn write(&self, plan: &MigrationPlan, time: DateTime<Utc>) -> Result<Vec<PathBuf>> {
        writer::write_migration(&self.config.output.migrations_dir, plan, time)
    }

    /// Check a written migration directory against its manifest checksums.
    pub fn verify(&self, migration_dir: &Path) -> Result<VerifyReport> {
        commands::verify::execute(migration_dir)
    }
}
