//! Execution order for a batch of statements.
//!
//! Scheduling is a work-queue topological sort: a statement is placed once
//! everything it references is in place. When the queue stops making progress
//! the rest is cyclic and gets broken with stubs: a minimal create now, and an
//! update carrying the full payload once the whole cycle exists.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::config::StubSettings;
use crate::dependency::DependencyGraph;
use crate::error::{PlanError, Result};
use crate::resource::{ResourceKey, ResourceKind, StatementKind};
use crate::statement::{Statement, StatementOrigin};
use crate::transform::{create_to_update, make_stub};

struct Scheduler<'a> {
    statements: &'a [Statement],
    graph: &'a DependencyGraph,
    placed: HashSet<ResourceKey>,
}

impl<'a> Scheduler<'a> {
    fn is_ready(&self, position: usize) -> bool {
        self.graph.edges(position).iter().all(|key| {
            self.placed.contains(key)
                || self.graph.defining_action(key) == Some(StatementKind::Update)
        })
    }

    /// Only the defining statement of a key makes it available; placing the
    /// delete half of a delete + recreate must not release the key's dependents.
    fn place(&mut self, position: usize) {
        let key = self.statements[position].key();
        if self.graph.defining_position(&key) == Some(position) {
            self.placed.insert(key);
        }
    }
}

/// Order `statements` so every statement runs after what it references.
///
/// `graph` must have been built from the same list.
pub fn order_statements(
    statements: Vec<Statement>,
    graph: &DependencyGraph,
    stubs: &StubSettings,
) -> Result<Vec<Statement>> {
    let mut scheduler = Scheduler {
        statements: &statements,
        graph,
        placed: HashSet::new(),
    };

    let mut seed: Vec<usize> = (0..statements.len()).collect();
    seed.sort_by_key(|&position| graph.edges(position).len());
    let mut queue: VecDeque<usize> = seed.into();

    let mut placed_order = Vec::with_capacity(statements.len());
    let mut no_progress = 0;
    while let Some(position) = queue.pop_front() {
        if scheduler.is_ready(position) {
            scheduler.place(position);
            placed_order.push(position);
            no_progress = 0;
        } else {
            queue.push_back(position);
            no_progress += 1;
            if no_progress >= queue.len() {
                break;
            }
        }
    }

    let mut stubbed = Vec::new();
    let mut follow_ups = Vec::new();
    let mut pending_indexes = Vec::new();
    let mut unresolved_others = Vec::new();

    if !queue.is_empty() {
        tracing::debug!(remaining = queue.len(), "Dependency cycle detected");
    }

    for &position in &queue {
        let stmt = &statements[position];
        match (stmt.action, stmt.kind.is_index()) {
            (StatementKind::Create, false) => {
                tracing::info!(statement = %stmt.key(), "Breaking dependency cycle with a stub");
                stubbed.push(make_stub(stmt, stubs)?);
                follow_ups.push(create_to_update(stmt)?.with_origin(StatementOrigin::StubFollowUp));
                scheduler.place(position);
            }
            (StatementKind::Create, true) => pending_indexes.push(position),
            _ => unresolved_others.push(position),
        }
    }

    let mut released = Vec::new();
    loop {
        let before = pending_indexes.len();
        let mut still_pending = Vec::new();
        for position in pending_indexes {
            if scheduler.is_ready(position) {
                scheduler.place(position);
                released.push(position);
            } else {
                still_pending.push(position);
            }
        }
        pending_indexes = still_pending;
        if pending_indexes.is_empty() || pending_indexes.len() == before {
            break;
        }
    }

    if !pending_indexes.is_empty() {
        let resources: BTreeSet<String> = queue
            .iter()
            .map(|&position| statements[position].key().to_string())
            .collect();
        return Err(PlanError::CircularDependency {
            resources: resources.into_iter().collect(),
        });
    }

    // Positions index into `statements`; stubs and follow-ups replace the
    // cyclic creates, which are dropped.
    let mut slots: Vec<Option<Statement>> = statements.into_iter().map(Some).collect();
    let mut ordered: Vec<Statement> = Vec::with_capacity(slots.len() + follow_ups.len());
    ordered.extend(placed_order.iter().filter_map(|&p| slots[p].take()));
    ordered.extend(stubbed);
    ordered.extend(released.iter().filter_map(|&p| slots[p].take()));
    ordered.extend(unresolved_others.iter().filter_map(|&p| slots[p].take()));
    ordered.extend(follow_ups);

    let ordered = deletes_first(ordered);
    verify_order(&ordered, graph)?;

    tracing::debug!(statements = ordered.len(), "Scheduled statements");
    Ok(ordered)
}

/// Index deletes, then the other deletes, then everything else in scheduled order.
fn deletes_first(ordered: Vec<Statement>) -> Vec<Statement> {
    let (deletes, rest): (Vec<Statement>, Vec<Statement>) = ordered
        .into_iter()
        .partition(|s| s.action == StatementKind::Delete);
    let (index_deletes, other_deletes): (Vec<Statement>, Vec<Statement>) =
        deletes.into_iter().partition(|s| s.kind.is_index());
    index_deletes
        .into_iter()
        .chain(other_deletes)
        .chain(rest)
        .collect()
}

/// Every reference to a resource created in this batch must come after that create.
fn verify_order(ordered: &[Statement], graph: &DependencyGraph) -> Result<()> {
    let mut created: HashSet<ResourceKey> = HashSet::new();
    for stmt in ordered {
        for dependency in graph.dependencies_of(stmt) {
            let needs_create = graph.defining_action(&dependency) == Some(StatementKind::Create);
            if needs_create && !created.contains(&dependency) {
                return Err(PlanError::UnresolvedDependency {
                    statement: stmt.key().to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
        if stmt.is_create() {
            created.insert(stmt.key());
        }
    }
    Ok(())
}

/// Statements of one database, in execution order.
#[derive(Debug, Clone)]
pub struct DatabaseBatch {
    pub db_path: Vec<String>,
    pub statements: Vec<Statement>,
}

fn display_db_path(db_path: &[String]) -> String {
    format!("/{}", db_path.join("/"))
}

/// Split an ordered batch into one batch per database.
///
/// Each database runs as its own transaction, so the batches are ordered
/// too: a database runs after every database it references, after the
/// parent that creates it, and before the parent that deletes it. Inside a
/// batch the scheduled order is kept.
pub fn split_by_database(ordered: &[Statement], graph: &DependencyGraph) -> Result<Vec<DatabaseBatch>> {
    let mut batches: Vec<DatabaseBatch> = Vec::new();
    let mut slot_of: HashMap<Vec<String>, usize> = HashMap::new();
    for stmt in ordered {
        let slot = *slot_of.entry(stmt.db_path.clone()).or_insert_with(|| {
            batches.push(DatabaseBatch {
                db_path: stmt.db_path.clone(),
                statements: Vec::new(),
            });
            batches.len() - 1
        });
        batches[slot].statements.push(stmt.clone());
    }

    let mut runs_after: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); batches.len()];
    for (slot, batch) in batches.iter().enumerate() {
        for stmt in &batch.statements {
            for dependency in graph.dependencies_of(stmt) {
                // updated resources already exist
                if graph.defining_action(&dependency) == Some(StatementKind::Update) {
                    continue;
                }
                match slot_of.get(&dependency.db_path) {
                    Some(&other) if other != slot => {
                        runs_after[slot].insert(other);
                    }
                    _ => {}
                }
            }
        }

        let Some((name, parent)) = batch.db_path.split_last() else {
            continue;
        };
        let Some(&parent_slot) = slot_of.get(parent) else {
            continue;
        };
        let database = ResourceKey::new(parent, ResourceKind::Database, name.clone());
        match graph.defining_action(&database) {
            Some(StatementKind::Create) => {
                runs_after[slot].insert(parent_slot);
            }
            Some(StatementKind::Delete) => {
                runs_after[parent_slot].insert(slot);
            }
            _ => {}
        }
    }

    // Kahn's algorithm, lowest slot first so unrelated databases keep the
    // order in which they were first scheduled.
    let mut done = vec![false; batches.len()];
    let mut order = Vec::with_capacity(batches.len());
    while order.len() < batches.len() {
        let next = (0..batches.len())
            .find(|&slot| !done[slot] && runs_after[slot].iter().all(|&other| done[other]));
        let Some(slot) = next else {
            let resources = (0..batches.len())
                .filter(|&slot| !done[slot])
                .map(|slot| display_db_path(&batches[slot].db_path))
                .collect();
            return Err(PlanError::CircularDependency { resources });
        };
        done[slot] = true;
        order.push(slot);
    }

    let mut slots: Vec<Option<DatabaseBatch>> = batches.into_iter().map(Some).collect();
    let ordered_batches: Vec<DatabaseBatch> = order.into_iter().filter_map(|slot| slots[slot].take()).collect();
    tracing::debug!(databases = ordered_batches.len(), "Split plan by database");
    Ok(ordered_batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::transform::create_to_delete;
    use serde_json::{json, Value};

    fn create(value: Value) -> Statement {
        Statement::from_create(&[], Expr::from_wire(&value).unwrap()).unwrap()
    }

    fn schedule(statements: Vec<Statement>) -> Result<Vec<Statement>> {
        let graph = DependencyGraph::build(&statements);
        order_statements(statements, &graph, &StubSettings::default())
    }

    fn summary(ordered: &[Statement]) -> Vec<(StatementKind, &str, StatementOrigin)> {
        ordered
            .iter()
            .map(|s| (s.action, s.name.as_str(), s.origin))
            .collect()
    }

    fn collection(name: &str) -> Statement {
        create(json!({"create_collection": {"object": {"name": name}}}))
    }

    fn index(name: &str, source: &str) -> Statement {
        create(json!({"create_index": {"object": {"name": name, "source": {"collection": source}}}}))
    }

    #[test]
    fn test_index_after_its_collection() {
        let ordered = schedule(vec![index("users_by_email", "users"), collection("users")]).unwrap();
        let names: Vec<&str> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["users", "users_by_email"]);
    }

    #[test]
    fn test_fewest_dependencies_first_is_stable() {
        let ordered = schedule(vec![collection("b"), collection("a"), collection("c")]).unwrap();
        let names: Vec<&str> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_role_function_cycle_uses_stubs() {
        let role = create(json!({"create_role": {"object": {
            "name": "caller",
            "privileges": [{"object": {
                "resource": {"function": "login"},
                "actions": {"object": {"call": true}}
            }}]
        }}}));
        let function = create(json!({"create_function": {"object": {
            "name": "login",
            "body": {"query": {"lambda": "x", "expr": {"var": "x"}}},
            "role": {"role": "caller"}
        }}}));

        let ordered = schedule(vec![role, function]).unwrap();
        assert_eq!(
            summary(&ordered),
            vec![
                (StatementKind::Create, "caller", StatementOrigin::Stub),
                (StatementKind::Create, "login", StatementOrigin::Stub),
                (StatementKind::Update, "caller", StatementOrigin::StubFollowUp),
                (StatementKind::Update, "login", StatementOrigin::StubFollowUp),
            ]
        );
        // stubs carry no references, so they can run in any order
        assert!(ordered[0].properties.get("privileges") == Some(&Expr::Array(vec![])));
        assert!(!ordered[1].properties.contains_key("role"));
        assert!(ordered[3].properties.contains_key("role"));
    }

    #[test]
    fn test_index_released_after_stubbed_collection() {
        let users = create(json!({"create_collection": {"object": {
            "name": "users",
            "data": {"object": {"lookup": {"index": "users_by_email"}}}
        }}}));
        let ordered = schedule(vec![users, index("users_by_email", "users")]).unwrap();
        assert_eq!(
            summary(&ordered),
            vec![
                (StatementKind::Create, "users", StatementOrigin::Stub),
                (StatementKind::Create, "users_by_email", StatementOrigin::Diff),
                (StatementKind::Update, "users", StatementOrigin::StubFollowUp),
            ]
        );
    }

    #[test]
    fn test_index_only_cycle_is_fatal() {
        let a = create(json!({"create_index": {"object": {
            "name": "a", "source": {"collection": "c"}, "data": {"object": {"peer": {"index": "b"}}}
        }}}));
        let b = create(json!({"create_index": {"object": {
            "name": "b", "source": {"collection": "c"}, "data": {"object": {"peer": {"index": "a"}}}
        }}}));

        match schedule(vec![a, b]) {
            Err(PlanError::CircularDependency { resources }) => {
                assert_eq!(resources, vec![":Index:a".to_string(), ":Index:b".to_string()]);
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_deletes_move_to_front_indexes_first() {
        let users = collection("users");
        let by_email = index("users_by_email", "users");
        let statements = vec![
            collection("accounts"),
            create_to_delete(&users).unwrap(),
            create_to_delete(&by_email).unwrap(),
        ];
        let ordered = schedule(statements).unwrap();
        assert_eq!(
            ordered
                .iter()
                .map(|s| (s.action, s.kind, s.name.as_str()))
                .collect::<Vec<_>>(),
            vec![
                (StatementKind::Delete, ResourceKind::Index, "users_by_email"),
                (StatementKind::Delete, ResourceKind::Collection, "users"),
                (StatementKind::Create, ResourceKind::Collection, "accounts"),
            ]
        );
    }

    #[test]
    fn test_recreated_index_waits_for_its_create() {
        let old = index("ix", "old_source");
        let new = index("ix", "users");
        let role = create(json!({"create_role": {"object": {
            "name": "reader",
            "privileges": [{"object": {"resource": {"index": "ix"}}}]
        }}}));
        let ordered = schedule(vec![role, create_to_delete(&old).unwrap(), new]).unwrap();
        assert_eq!(
            summary(&ordered),
            vec![
                (StatementKind::Delete, "ix", StatementOrigin::Diff),
                (StatementKind::Create, "ix", StatementOrigin::Diff),
                (StatementKind::Create, "reader", StatementOrigin::Diff),
            ]
        );
    }

    #[test]
    fn test_reference_to_updated_resource_is_satisfied() {
        let existing = create_to_update(&collection("users")).unwrap();
        let by_email = index("users_by_email", "users");
        let ordered = schedule(vec![by_email, existing]).unwrap();
        assert_eq!(ordered.len(), 2);
        assert!(ordered.iter().all(|s| s.origin == StatementOrigin::Diff));
    }

    #[test]
    fn test_verify_rejects_create_after_use() {
        let statements = vec![index("users_by_email", "users"), collection("users")];
        let graph = DependencyGraph::build(&statements);
        match verify_order(&statements, &graph) {
            Err(PlanError::UnresolvedDependency { statement, dependency }) => {
                assert_eq!(statement, ":Index:users_by_email");
                assert_eq!(dependency, ":Collection:users");
            }
            other => panic!("expected UnresolvedDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch() {
        assert!(schedule(Vec::new()).unwrap().is_empty());
    }

    fn create_in(db_path: &[&str], value: Value) -> Statement {
        let db_path: Vec<String> = db_path.iter().map(|s| s.to_string()).collect();
        Statement::from_create(&db_path, Expr::from_wire(&value).unwrap()).unwrap()
    }

    fn split(statements: Vec<Statement>) -> Result<Vec<DatabaseBatch>> {
        let graph = DependencyGraph::build(&statements);
        let ordered = order_statements(statements, &graph, &StubSettings::default())?;
        split_by_database(&ordered, &graph)
    }

    fn paths(batches: &[DatabaseBatch]) -> Vec<Vec<String>> {
        batches.iter().map(|b| b.db_path.clone()).collect()
    }

    #[test]
    fn test_split_keeps_same_names_apart() {
        let batches = split(vec![
            create_in(&["app"], json!({"create_collection": {"object": {"name": "users"}}})),
            create_in(&[], json!({"create_collection": {"object": {"name": "users"}}})),
        ])
        .unwrap();
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert_eq!(batch.statements.len(), 1);
            assert!(batch.statements.iter().all(|s| s.db_path == batch.db_path));
        }
    }

    #[test]
    fn test_referenced_database_runs_first() {
        let batches = split(vec![
            create_in(&[], json!({"create_role": {"object": {
                "name": "reader",
                "privileges": [{"object": {
                    "resource": {"collection": "users", "scope": {"database": "app"}}
                }}]
            }}})),
            create_in(&["app"], json!({"create_collection": {"object": {"name": "users"}}})),
        ])
        .unwrap();
        assert_eq!(paths(&batches), vec![vec!["app".to_string()], Vec::new()]);
    }

    #[test]
    fn test_created_database_runs_after_its_parent() {
        let batches = split(vec![
            create_in(&["app"], json!({"create_collection": {"object": {"name": "users"}}})),
            create_in(&[], json!({"create_database": {"object": {"name": "app"}}})),
        ])
        .unwrap();
        assert_eq!(paths(&batches), vec![Vec::new(), vec!["app".to_string()]]);
    }

    #[test]
    fn test_deleted_database_runs_before_its_parent() {
        let database = create_in(&[], json!({"create_database": {"object": {"name": "app"}}}));
        let collection = create_in(&["app"], json!({"create_collection": {"object": {"name": "users"}}}));
        let batches = split(vec![
            create_to_delete(&database).unwrap(),
            create_to_delete(&collection).unwrap(),
        ])
        .unwrap();
        assert_eq!(paths(&batches), vec![vec!["app".to_string()], Vec::new()]);
    }

    #[test]
    fn test_databases_depending_on_each_other_are_fatal() {
        let result = split(vec![
            create_in(&[], json!({"create_database": {"object": {"name": "app"}}})),
            create_in(&["app"], json!({"create_collection": {"object": {"name": "users"}}})),
            create_in(&[], json!({"create_role": {"object": {
                "name": "reader",
                "privileges": [{"object": {
                    "resource": {"collection": "users", "scope": {"database": "app"}}
                }}]
            }}})),
        ]);
        match result {
            Err(PlanError::CircularDependency { resources }) => {
                assert_eq!(resources, vec!["/".to_string(), "/app".to_string()]);
            }
            other => panic!("expected CircularDependency, got {:?}", other.map(|b| b.len())),
        }
    }
}
