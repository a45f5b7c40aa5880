//! Compiles the ordered statements of one database into a transaction expression.
//!
//! Each statement becomes a `Let` binding. References to resources created
//! earlier in the same transaction are rewritten to the variable holding the
//! create's result, so everything a database needs runs as a single request.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::config::{BindingResult, PlannerSettings};
use crate::dependency::DependencyGraph;
use crate::error::{PlanError, Result};
use crate::expr::{Expr, ResourceRef};
use crate::resource::{ResourceKey, StatementKind};
use crate::statement::{Statement, StatementOrigin};

/// One row of the binding table: which variable holds which statement's result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub variable: String,
    pub key: ResourceKey,
    pub action: StatementKind,
    pub origin: StatementOrigin,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompiledTransaction {
    pub expression: Expr,
    pub fql: String,
    pub bindings: Vec<Binding>,
}

impl CompiledTransaction {
    pub fn to_wire(&self) -> Value {
        self.expression.to_wire()
    }

    pub fn steps(&self) -> usize {
        self.bindings.len()
    }
}

fn rewrite_refs(expression: &mut Expr, db_path: &[String], target: &ResourceKey, variable: &str) -> usize {
    expression.substitute_refs(&|r: &ResourceRef| r.key(db_path) == *target, &Expr::var(variable))
}

/// Compile the ordered statements of one database into `Let([...], body)`.
/// Returns `None` for an empty plan.
///
/// References into other databases are left as they are: only creates of
/// this batch get a binding.
pub fn compile(
    ordered: &[Statement],
    graph: &DependencyGraph,
    settings: &PlannerSettings,
) -> Result<Option<CompiledTransaction>> {
    if ordered.is_empty() {
        return Ok(None);
    }

    let mut bound: HashMap<ResourceKey, String> = HashMap::new();
    let mut let_bindings = Vec::with_capacity(ordered.len());
    let mut table = Vec::with_capacity(ordered.len());

    for (position, stmt) in ordered.iter().enumerate() {
        let variable = format!("{}{}", settings.binding_prefix, position);
        let own_key = stmt.key();
        let mut expression = stmt.expression.clone();

        for dependency in graph.dependencies_of(stmt) {
            if graph.defining_action(&dependency) != Some(StatementKind::Create) {
                continue;
            }
            let Some(dep_variable) = bound.get(&dependency) else {
                continue;
            };
            let replaced = rewrite_refs(&mut expression, &stmt.db_path, &dependency, dep_variable);
            tracing::trace!(statement = %own_key, dependency = %dependency, replaced, "Rewrote references");
            if replaced == 0 && stmt.origin != StatementOrigin::Stub {
                return Err(PlanError::RewriteFailed {
                    statement: own_key.to_string(),
                    reference: dependency.to_string(),
                });
            }
        }

        if stmt.action == StatementKind::Update {
            if let Some(own_variable) = bound.get(&own_key) {
                rewrite_refs(&mut expression, &stmt.db_path, &own_key, own_variable);
            }
        }

        if stmt.is_create() {
            bound.entry(own_key.clone()).or_insert_with(|| variable.clone());
        }

        let_bindings.push((
            variable.clone(),
            Expr::Select {
                path: vec!["ref".to_string()],
                from: Box::new(expression),
            },
        ));
        table.push(Binding {
            variable,
            key: own_key,
            action: stmt.action,
            origin: stmt.origin,
        });
    }

    let body = match settings.result {
        BindingResult::Last => Expr::var(table[table.len() - 1].variable.clone()),
        BindingResult::All => Expr::Array(table.iter().map(|b| Expr::var(b.variable.clone())).collect()),
    };
    let expression = Expr::Let {
        bindings: let_bindings,
        body: Box::new(body),
    };

    tracing::debug!(bindings = table.len(), "Compiled transaction");
    Ok(Some(CompiledTransaction {
        fql: expression.to_string(),
        expression,
        bindings: table,
    }))
}
