use serde::Serialize;

use crate::dependency::DependencyGraph;
use crate::diff::PlannedDiffPerResource;
use crate::error::Result;
use crate::generate::generate_migrations;
use crate::resource::StatementKind;

#[derive(Debug, Clone, Serialize)]
pub struct DependencyRow {
    pub resource: String,
    pub action: StatementKind,
    pub depends_on: Vec<String>,
}

/// Report returned by the deps command, in generation order.
#[derive(Debug, Clone, Serialize)]
pub struct DepsReport {
    pub resources: Vec<DependencyRow>,
    pub edge_count: usize,
}

/// Execute the deps command: dependency edges of every generated statement.
pub fn execute(diff: &PlannedDiffPerResource) -> Result<DepsReport> {
    let statements = generate_migrations(diff)?;
    let graph = DependencyGraph::build(&statements);

    let resources: Vec<DependencyRow> = statements
        .iter()
        .enumerate()
        .map(|(position, stmt)| DependencyRow {
            resource: stmt.key().to_string(),
            action: stmt.action,
            depends_on: graph.edges(position).iter().map(ToString::to_string).collect(),
        })
        .collect();
    let edge_count = resources.iter().map(|r| r.depends_on.len()).sum();

    tracing::info!(resources = resources.len(), edges = edge_count, "Dependencies extracted");

    Ok(DepsReport {
        resources,
        edge_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deps_in_generation_order() {
        let diff = PlannedDiffPerResource::from_json(
            r#"{
                "Role": {"added": [{"target": {"expr": {"create_role": {"object": {
                    "name": "reader",
                    "privileges": [{"object": {"resource": {"collection": "users"}}}]
                }}}}}]},
                "Collection": {"added": [{"target": {"expr": {"create_collection": {"object": {"name": "users"}}}}}]}
            }"#,
        )
        .unwrap();

        let report = execute(&diff).unwrap();
        assert_eq!(report.edge_count, 1);
        assert_eq!(report.resources[0].resource, ":Role:reader");
        assert_eq!(report.resources[0].depends_on, vec![":Collection:users".to_string()]);
        assert!(report.resources[1].depends_on.is_empty());
    }
}
