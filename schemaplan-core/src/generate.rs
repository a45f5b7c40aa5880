//! Diff -> flat statement list.

use crate::diff::{PlannedDiff, PlannedDiffPerResource};
use crate::error::Result;
use crate::resource::ResourceKind;
use crate::statement::Statement;
use crate::transform::{create_to_delete, create_to_update};

/// Turn the diff into statements, kind by kind.
///
/// The resulting order only seeds the scheduler; it is not the execution order.
pub fn generate_migrations(planned: &PlannedDiffPerResource) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for kind in ResourceKind::ALL {
        statements.extend(transform_statements(kind, planned.get(kind))?);
    }
    tracing::debug!(statements = statements.len(), "Generated migration statements");
    Ok(statements)
}

fn transform_statements(kind: ResourceKind, resources: &PlannedDiff) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();

    for added in &resources.added {
        statements.push(added.target.to_statement(kind)?);
    }

    for changed in &resources.changed {
        let target = changed.target.to_statement(kind)?;
        if kind.is_index() {
            // indexes are immutable; the diff must express this as delete + add
            tracing::debug!(index = %target.key(), "Skipping index change");
            continue;
        }
        statements.push(create_to_update(&target)?);
    }

    for deleted in &resources.deleted {
        let previous = deleted.previous.to_statement(kind)?;
        statements.push(create_to_delete(&previous)?);
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffResource;
    use crate::expr::Expr;
    use crate::resource::StatementKind;
    use serde_json::json;

    fn resource(value: serde_json::Value) -> DiffResource {
        DiffResource::new(&[], Expr::from_wire(&value).unwrap())
    }

    #[test]
    fn test_generates_one_statement_per_entry() {
        let mut diff = PlannedDiffPerResource::new();
        diff.push_added(resource(json!({"create_collection": {"object": {"name": "users"}}})))
            .unwrap();
        diff.push_changed(
            resource(json!({"create_role": {"object": {"name": "reader", "privileges": []}}})),
            resource(json!({"create_role": {"object": {"name": "reader"}}})),
        )
        .unwrap();
        diff.push_deleted(resource(json!({"create_function": {"object": {
            "name": "legacy",
            "body": {"query": {"lambda": "x", "expr": {"var": "x"}}}
        }}})))
        .unwrap();

        let statements = generate_migrations(&diff).unwrap();
        let summary: Vec<(ResourceKind, StatementKind, &str)> = statements
            .iter()
            .map(|s| (s.kind, s.action, s.name.as_str()))
            .collect();

        // seed order: Role, Function, Collection, Index, AccessProvider, Database
        assert_eq!(
            summary,
            vec![
                (ResourceKind::Role, StatementKind::Update, "reader"),
                (ResourceKind::Function, StatementKind::Delete, "legacy"),
                (ResourceKind::Collection, StatementKind::Create, "users"),
            ]
        );
    }

    #[test]
    fn test_index_changes_are_skipped() {
        let mut diff = PlannedDiffPerResource::new();
        diff.push_changed(
            resource(json!({"create_index": {"object": {"name": "ix", "source": {"collection": "a"}}}})),
            resource(json!({"create_index": {"object": {"name": "ix", "source": {"collection": "b"}}}})),
        )
        .unwrap();
        assert!(generate_migrations(&diff).unwrap().is_empty());
    }

    #[test]
    fn test_empty_diff() {
        let diff = PlannedDiffPerResource::new();
        assert!(generate_migrations(&diff).unwrap().is_empty());
    }
}
