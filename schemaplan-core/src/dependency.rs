//! Dependency extraction between statements of one batch.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::expr::Expr;
use crate::resource::{ResourceKey, ResourceKind, StatementKind};
use crate::statement::Statement;

/// Finds named resource references inside an expression encoding.
pub trait ReferenceFinder {
    /// Every resource referenced anywhere in `self`, resolved against the
    /// database path of the statement that contains it.
    fn find_references(&self, db_path: &[String]) -> BTreeSet<ResourceKey>;
}

impl ReferenceFinder for Expr {
    fn find_references(&self, db_path: &[String]) -> BTreeSet<ResourceKey> {
        let mut found = BTreeSet::new();
        self.walk(&mut |node| {
            if let Expr::Ref(r) = node {
                found.insert(r.key(db_path));
            }
        });
        found
    }
}

/// Raw wire JSON: `{"<kind tag>": "<name>"}` at any depth.
impl ReferenceFinder for Value {
    fn find_references(&self, db_path: &[String]) -> BTreeSet<ResourceKey> {
        let mut found = BTreeSet::new();
        collect_wire_refs(self, db_path, &mut found);
        found
    }
}

fn collect_wire_refs(value: &Value, db_path: &[String], found: &mut BTreeSet<ResourceKey>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_wire_refs(item, db_path, found);
            }
        }
        Value::Object(map) => {
            let ref_shaped = map.len() == 1 || (map.len() == 2 && map.contains_key("scope"));
            if let (true, Some((tag, Value::String(name)))) = (ref_shaped, map.iter().next()) {
                if let Some(kind) = ResourceKind::from_ref_tag(tag) {
                    let mut path = db_path.to_vec();
                    path.extend(wire_scope(map.get("scope")));
                    found.insert(ResourceKey::new(&path, kind, name.clone()));
                    // the scope is part of this reference, not a reference of its own
                    return;
                }
            }
            for item in map.values() {
                collect_wire_refs(item, db_path, found);
            }
        }
        _ => {}
    }
}

fn wire_scope(scope: Option<&Value>) -> Vec<String> {
    match scope {
        Some(Value::Object(map)) => match map.get("database") {
            Some(Value::String(name)) => {
                let mut path = wire_scope(map.get("scope"));
                path.push(name.clone());
                path
            }
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn action_rank(action: StatementKind) -> u8 {
    match action {
        StatementKind::Create => 0,
        StatementKind::Update => 1,
        StatementKind::Delete => 2,
    }
}

/// Edges between the statements of one migration.
///
/// A key can appear on more than one statement (an index recreated as delete +
/// create). References to such a key resolve to its *defining* statement:
/// the create if there is one, else the update, else the delete.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    defining: HashMap<ResourceKey, (usize, StatementKind)>,
    edges: Vec<BTreeSet<ResourceKey>>,
}

impl DependencyGraph {
    pub fn build(statements: &[Statement]) -> Self {
        let mut defining: HashMap<ResourceKey, (usize, StatementKind)> = HashMap::new();
        for (position, stmt) in statements.iter().enumerate() {
            let candidate = (position, stmt.action);
            defining
                .entry(stmt.key())
                .and_modify(|current| {
                    if action_rank(stmt.action) < action_rank(current.1) {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }

        let mut graph = Self {
            defining,
            edges: Vec::with_capacity(statements.len()),
        };
        for stmt in statements {
            let edges = graph.dependencies_of(stmt);
            tracing::trace!(statement = %stmt.key(), dependencies = edges.len(), "Extracted dependencies");
            graph.edges.push(edges);
        }
        graph
    }

    /// References of `stmt` to other resources of this batch.
    ///
    /// Works for statements the graph was not built from (stubs and their
    /// follow-up updates), since it only reads the statement's own expression.
    pub fn dependencies_of(&self, stmt: &Statement) -> BTreeSet<ResourceKey> {
        let own = stmt.key();
        stmt.expression
            .find_references(&stmt.db_path)
            .into_iter()
            .filter(|key| *key != own && self.defining.contains_key(key))
            .collect()
    }

    /// Edges of the statement at `position` in the list the graph was built from.
    pub fn edges(&self, position: usize) -> &BTreeSet<ResourceKey> {
        &self.edges[position]
    }

    pub fn defining_position(&self, key: &ResourceKey) -> Option<usize> {
        self.defining.get(key).map(|(position, _)| *position)
    }

    pub fn defining_action(&self, key: &ResourceKey) -> Option<StatementKind> {
        self.defining.get(key).map(|(_, action)| *action)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
