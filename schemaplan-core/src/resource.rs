//! Resource kinds, statement actions and identity keys.

use std::fmt;

use serde::Serialize;

use crate::error::PlanError;

/// The closed set of schema resources a migration can touch.
///
/// Every per-kind table in the crate is an exhaustive `match` on this enum,
/// so adding a kind fails to compile until each dispatch site handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ResourceKind {
    Database,
    Collection,
    Index,
    Function,
    Role,
    AccessProvider,
}

impl ResourceKind {
    /// Generation seed order. Scheduling does not depend on it.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Role,
        ResourceKind::Function,
        ResourceKind::Collection,
        ResourceKind::Index,
        ResourceKind::AccessProvider,
        ResourceKind::Database,
    ];

    /// Name used in diff files and in the FQL text form (`Collection("x")`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "Database",
            ResourceKind::Collection => "Collection",
            ResourceKind::Index => "Index",
            ResourceKind::Function => "Function",
            ResourceKind::Role => "Role",
            ResourceKind::AccessProvider => "AccessProvider",
        }
    }

    /// Wire tag of a reference to this kind, e.g. `{"role": "admin"}`.
    pub fn ref_tag(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
            ResourceKind::Collection => "collection",
            ResourceKind::Index => "index",
            ResourceKind::Function => "function",
            ResourceKind::Role => "role",
            ResourceKind::AccessProvider => "access_provider",
        }
    }

    /// Wire tag of the create function, e.g. `create_access_provider`.
    pub fn create_tag(&self) -> &'static str {
        match self {
            ResourceKind::Database => "create_database",
            ResourceKind::Collection => "create_collection",
            ResourceKind::Index => "create_index",
            ResourceKind::Function => "create_function",
            ResourceKind::Role => "create_role",
            ResourceKind::AccessProvider => "create_access_provider",
        }
    }

    pub fn from_ref_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.ref_tag() == tag)
    }

    pub fn from_create_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.create_tag() == tag)
    }

    /// Indexes are immutable remotely: a change is always delete + recreate,
    /// and they can never be stubbed since they need their source to exist.
    pub fn is_index(&self) -> bool {
        matches!(self, ResourceKind::Index)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = PlanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                PlanError::ConfigError(format!(
                    "Unknown resource kind '{}'. Expected one of: {}",
                    s,
                    Self::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

/// The action a statement performs on its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StatementKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Create => write!(f, "create"),
            StatementKind::Update => write!(f, "update"),
            StatementKind::Delete => write!(f, "delete"),
        }
    }
}

/// Identity of a resource: database path, kind and name.
///
/// Resources with the same name in different databases are distinct.
/// This is also the node id of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceKey {
    pub db_path: Vec<String>,
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceKey {
    pub fn new(db_path: &[String], kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            db_path: db_path.to_vec(),
            kind,
            name: name.into(),
        }
    }
}

/// Renders the "indexable name", e.g. `app/child:Role:admin`.
impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.db_path.join("/"), self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_tags() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_ref_tag(kind.ref_tag()), Some(kind));
            assert_eq!(ResourceKind::from_create_tag(kind.create_tag()), Some(kind));
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_kind_is_config_error() {
        let err = "Table".parse::<ResourceKind>().unwrap_err();
        assert!(matches!(err, PlanError::ConfigError(_)));
        assert!(err.to_string().contains("Table"));
    }

    #[test]
    fn test_key_display() {
        let root = ResourceKey::new(&[], ResourceKind::Role, "admin");
        assert_eq!(root.to_string(), ":Role:admin");

        let nested = ResourceKey::new(
            &["app".to_string(), "child".to_string()],
            ResourceKind::Collection,
            "users",
        );
        assert_eq!(nested.to_string(), "app/child:Collection:users");
    }

    #[test]
    fn test_same_name_different_path_are_distinct() {
        let a = ResourceKey::new(&[], ResourceKind::Collection, "users");
        let b = ResourceKey::new(&["child".to_string()], ResourceKind::Collection, "users");
        assert_ne!(a, b);
    }
}
