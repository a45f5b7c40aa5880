use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::compile::{compile, Binding};
use crate::config::PlannerConfig;
use crate::dependency::DependencyGraph;
use crate::diff::PlannedDiffPerResource;
use crate::error::Result;
use crate::generate::generate_migrations;
use crate::resource::StatementKind;
use crate::schedule::{order_statements, split_by_database};
use crate::statement::StatementOrigin;
use crate::writer::write_migration;
use crate::{DatabasePlan, MigrationPlan};

/// One ordered statement, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStatement {
    pub position: usize,
    pub resource: String,
    pub action: StatementKind,
    pub origin: StatementOrigin,
    pub depends_on: Vec<String>,
    pub fql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    pub db_path: Vec<String>,
    pub fql: String,
    pub wire: Value,
    pub bindings: Vec<Binding>,
}

/// Report returned after a plan operation.
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub statements: Vec<PlannedStatement>,
    pub stubbed: Vec<String>,
    /// One per database, in execution order.
    pub transactions: Vec<TransactionReport>,
    pub written_to: Vec<PathBuf>,
}

/// Generate, order and compile. No I/O.
pub fn build_plan(config: &PlannerConfig, diff: &PlannedDiffPerResource) -> Result<MigrationPlan> {
    let statements = generate_migrations(diff)?;
    let graph = DependencyGraph::build(&statements);
    let ordered = order_statements(statements, &graph, &config.stubs)?;

    let mut databases = Vec::new();
    for batch in split_by_database(&ordered, &graph)? {
        let Some(transaction) = compile(&batch.statements, &graph, &config.planner)? else {
            continue;
        };
        tracing::debug!(
            db_path = %batch.db_path.join("/"),
            steps = transaction.steps(),
            "Compiled database transaction"
        );
        databases.push(DatabasePlan {
            db_path: batch.db_path,
            statements: batch.statements,
            transaction,
        });
    }

    let dependencies = ordered.iter().map(|s| graph.dependencies_of(s)).collect();
    let stubbed = ordered
        .iter()
        .filter(|s| s.origin == StatementOrigin::Stub)
        .map(|s| s.key())
        .collect();

    Ok(MigrationPlan {
        statements: ordered,
        dependencies,
        databases,
        stubbed,
    })
}

/// Execute the plan command, writing the migration files when `write` is set.
pub fn execute(config: &PlannerConfig, diff: &PlannedDiffPerResource, write: bool) -> Result<PlanReport> {
    let plan = build_plan(config, diff)?;

    let written_to = if write {
        write_migration(&config.output.migrations_dir, &plan, Utc::now())?
    } else {
        Vec::new()
    };

    let statements = plan
        .statements
        .iter()
        .zip(&plan.dependencies)
        .enumerate()
        .map(|(i, (stmt, deps))| PlannedStatement {
            position: i + 1,
            resource: stmt.key().to_string(),
            action: stmt.action,
            origin: stmt.origin,
            depends_on: deps.iter().map(ToString::to_string).collect(),
            fql: stmt.fql.clone(),
        })
        .collect::<Vec<_>>();

    tracing::info!(
        statements = statements.len(),
        databases = plan.databases.len(),
        stubs = plan.stubbed.len(),
        "Plan completed"
    );

    Ok(PlanReport {
        statements,
        stubbed: plan.stubbed.iter().map(ToString::to_string).collect(),
        transactions: plan
            .databases
            .into_iter()
            .map(|database| TransactionReport {
                db_path: database.db_path,
                wire: database.transaction.to_wire(),
                fql: database.transaction.fql,
                bindings: database.transaction.bindings,
            })
            .collect(),
        written_to,
    })
}
