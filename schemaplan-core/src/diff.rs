//! The categorized diff handed to the planner.
//!
//! Computing the diff is someone else's job; this module only defines its
//! shape and loads it from JSON:
//!
//! ```json
//! {
//!   "Collection": {
//!     "added": [{"target": {"db": [], "expr": {"create_collection": {"object": {"name": "users"}}}}}],
//!     "changed": [],
//!     "deleted": []
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};
use crate::expr::Expr;
use crate::resource::ResourceKind;
use crate::statement::Statement;

/// One side of a diff entry: a resource in create form, located in a database.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiffResource {
    #[serde(default)]
    pub db: Vec<String>,
    pub expr: Expr,
}

impl DiffResource {
    pub fn new(db: &[String], expr: Expr) -> Self {
        Self {
            db: db.to_vec(),
            expr,
        }
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        self.expr.as_create().map(|(kind, _)| kind)
    }

    /// Create statement for this resource, which must be of kind `expected`.
    pub fn to_statement(&self, expected: ResourceKind) -> Result<Statement> {
        let stmt = Statement::from_create(&self.db, self.expr.clone())?;
        if stmt.kind != expected {
            return Err(PlanError::ConfigError(format!(
                "Resource '{}' is a {} but is listed under {}",
                stmt.name, stmt.kind, expected
            )));
        }
        Ok(stmt)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Added {
    pub target: DiffResource,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Changed {
    pub target: DiffResource,
    pub previous: DiffResource,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Deleted {
    pub previous: DiffResource,
}

/// Changes for a single resource kind.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PlannedDiff {
    #[serde(default)]
    pub added: Vec<Added>,
    #[serde(default)]
    pub changed: Vec<Changed>,
    #[serde(default)]
    pub deleted: Vec<Deleted>,
}

impl PlannedDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    fn resources(&self) -> impl Iterator<Item = &DiffResource> {
        self.added
            .iter()
            .map(|a| &a.target)
            .chain(self.changed.iter().flat_map(|c| [&c.target, &c.previous]))
            .chain(self.deleted.iter().map(|d| &d.previous))
    }
}

static EMPTY: PlannedDiff = PlannedDiff {
    added: Vec::new(),
    changed: Vec::new(),
    deleted: Vec::new(),
};

/// The diff for every resource kind. Kinds without changes read as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedDiffPerResource {
    entries: BTreeMap<ResourceKind, PlannedDiff>,
}

impl PlannedDiffPerResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ResourceKind) -> &PlannedDiff {
        self.entries.get(&kind).unwrap_or(&EMPTY)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(PlannedDiff::is_empty)
    }

    fn bucket(&mut self, resource: &DiffResource) -> Result<&mut PlannedDiff> {
        let kind = resource.kind().ok_or_else(|| {
            PlanError::ExpressionParseError(format!(
                "diff resource is not a create expression: {}",
                resource.expr
            ))
        })?;
        Ok(self.entries.entry(kind).or_default())
    }

    pub fn push_added(&mut self, target: DiffResource) -> Result<()> {
        self.bucket(&target)?.added.push(Added { target });
        Ok(())
    }

    pub fn push_changed(&mut self, target: DiffResource, previous: DiffResource) -> Result<()> {
        self.bucket(&target)?.changed.push(Changed { target, previous });
        Ok(())
    }

    pub fn push_deleted(&mut self, previous: DiffResource) -> Result<()> {
        self.bucket(&previous)?.deleted.push(Deleted { previous });
        Ok(())
    }

    /// Parse the JSON diff format. Unknown kind names are a configuration error.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, PlannedDiff> = serde_json::from_str(text)?;
        let mut entries = BTreeMap::new();
        for (name, diff) in raw {
            let kind: ResourceKind = name.parse()?;
            for resource in diff.resources() {
                if resource.kind() != Some(kind) {
                    return Err(PlanError::ConfigError(format!(
                        "Diff entry under {} is not a {} create expression: {}",
                        kind, kind, resource.expr
                    )));
                }
            }
            entries.insert(kind, diff);
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PlanError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to read diff file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json(&text)
    }
}
