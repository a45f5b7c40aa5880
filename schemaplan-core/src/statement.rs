//! A planned change to one resource.

use serde::Serialize;

use crate::error::{PlanError, Result};
use crate::expr::{Expr, Params};
use crate::resource::{ResourceKey, ResourceKind, StatementKind};

/// Where a statement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementOrigin {
    /// Generated directly from a diff entry.
    Diff,
    /// Minimal placeholder create inserted to break a dependency cycle.
    Stub,
    /// The update that completes a stub with the full desired payload.
    StubFollowUp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub name: String,
    pub kind: ResourceKind,
    pub action: StatementKind,
    pub db_path: Vec<String>,
    pub expression: Expr,
    /// Text form of `expression`. Re-rendered after every rewrite.
    pub fql: String,
    /// Resource payload without `name`; empty for deletes.
    pub properties: Params,
    pub origin: StatementOrigin,
}

impl Statement {
    /// Build a statement, checking the expression has the shape `action` implies.
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        action: StatementKind,
        db_path: &[String],
        expression: Expr,
    ) -> Result<Self> {
        let name = name.into();
        let key = ResourceKey::new(db_path, kind, name.clone());
        let properties = derive_properties(&key, action, &expression)?;
        Ok(Self {
            fql: expression.to_string(),
            name,
            kind,
            action,
            db_path: db_path.to_vec(),
            expression,
            properties,
            origin: StatementOrigin::Diff,
        })
    }

    /// Build a create statement, reading kind and name from the expression itself.
    pub fn from_create(db_path: &[String], expression: Expr) -> Result<Self> {
        let Some((kind, params)) = expression.as_create() else {
            return Err(PlanError::ExpressionParseError(format!(
                "expected a create expression, found {}",
                expression
            )));
        };
        let name = match params.get("name") {
            Some(Expr::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Err(PlanError::ExpressionParseError(format!(
                    "create expression has no string name: {}",
                    expression
                )))
            }
        };
        Self::new(name, kind, StatementKind::Create, db_path, expression)
    }

    pub fn with_origin(mut self, origin: StatementOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(&self.db_path, self.kind, self.name.clone())
    }

    pub fn is_create(&self) -> bool {
        self.action == StatementKind::Create
    }

    /// The full creation payload, including `name`.
    pub fn create_params(&self) -> Result<&Params> {
        match self.expression.as_create() {
            Some((_, params)) if self.is_create() => Ok(params),
            _ => Err(PlanError::invalid(
                self.key(),
                format!("expected a create statement, found {} {}", self.action, self.fql),
            )),
        }
    }

    pub fn refresh_fql(&mut self) {
        self.fql = self.expression.to_string();
    }
}

fn derive_properties(key: &ResourceKey, action: StatementKind, expression: &Expr) -> Result<Params> {
    let params = match (action, expression) {
        (StatementKind::Create, Expr::Create { kind, params }) if *kind == key.kind => params,
        (StatementKind::Update, Expr::Update { params, .. }) => params,
        (StatementKind::Delete, Expr::Delete { .. }) => return Ok(Params::new()),
        _ => {
            return Err(PlanError::invalid(
                key,
                format!("{} statement cannot carry expression {}", action, expression),
            ))
        }
    };
    let mut properties = params.clone();
    properties.remove("name");
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_expr(value: serde_json::Value) -> Expr {
        Expr::from_wire(&value).unwrap()
    }

    #[test]
    fn test_from_create_derives_name_and_kind() {
        let stmt = Statement::from_create(
            &[],
            create_expr(json!({"create_function": {"object": {
                "name": "login",
                "body": {"query": {"lambda": "x", "expr": {"var": "x"}}}
            }}})),
        )
        .unwrap();
        assert_eq!(stmt.name, "login");
        assert_eq!(stmt.kind, ResourceKind::Function);
        assert_eq!(stmt.action, StatementKind::Create);
        assert_eq!(stmt.origin, StatementOrigin::Diff);
        assert!(stmt.properties.contains_key("body"));
        assert!(!stmt.properties.contains_key("name"));
        assert!(stmt.fql.starts_with("CreateFunction("));
    }

    #[test]
    fn test_from_create_requires_name() {
        let result = Statement::from_create(&[], create_expr(json!({"create_role": {"object": {}}})));
        assert!(matches!(result, Err(PlanError::ExpressionParseError(_))));
    }

    #[test]
    fn test_delete_has_no_properties() {
        let stmt = Statement::new(
            "users",
            ResourceKind::Collection,
            StatementKind::Delete,
            &[],
            Expr::Delete {
                target: Box::new(Expr::reference(ResourceKind::Collection, "users")),
            },
        )
        .unwrap();
        assert!(stmt.properties.is_empty());
        assert_eq!(stmt.fql, r#"Delete(Collection("users"))"#);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let result = Statement::new(
            "users",
            ResourceKind::Collection,
            StatementKind::Update,
            &[],
            Expr::Delete {
                target: Box::new(Expr::reference(ResourceKind::Collection, "users")),
            },
        );
        assert!(matches!(result, Err(PlanError::InvalidStatement { .. })));
    }

    #[test]
    fn test_create_kind_must_match() {
        let result = Statement::new(
            "users",
            ResourceKind::Role,
            StatementKind::Create,
            &[],
            create_expr(json!({"create_collection": {"object": {"name": "users"}}})),
        );
        assert!(result.is_err());
    }
}
