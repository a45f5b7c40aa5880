//! Statement transforms: create -> update/delete/stub, plus the update-side
//! and nested-database helpers.
//!
//! All transforms are pure: they read one statement and build a new one.

use crate::config::StubSettings;
use crate::error::{PlanError, Result};
use crate::expr::{Expr, Params};
use crate::resource::{ResourceKind, StatementKind};
use crate::statement::{Statement, StatementOrigin};

/// Fields that every update of `kind` must carry.
///
/// Remote updates merge: an omitted field keeps its old value. To make the
/// desired state replace the remote one, fields that are no longer desired are
/// sent explicitly with these values. `None` for kinds that are never updated.
pub fn explicit_update_fields(kind: ResourceKind) -> Option<Vec<(&'static str, Expr)>> {
    match kind {
        ResourceKind::Collection => Some(vec![
            ("data", Expr::Null),
            ("history_days", Expr::Number(30u64.into())),
            ("ttl_days", Expr::Null),
            ("permissions", Expr::Null),
        ]),
        ResourceKind::Index => None,
        ResourceKind::Function => Some(vec![
            ("data", Expr::Null),
            ("body", Expr::Null),
            ("role", Expr::Null),
        ]),
        ResourceKind::Role => Some(vec![
            ("data", Expr::Null),
            ("privileges", Expr::Null),
            ("membership", Expr::Null),
        ]),
        ResourceKind::AccessProvider => Some(vec![
            ("data", Expr::Null),
            ("issuer", Expr::Null),
            ("jwks_uri", Expr::Null),
            ("roles", Expr::Null),
        ]),
        ResourceKind::Database => Some(vec![("data", Expr::Null), ("priority", Expr::Null)]),
    }
}

/// Fields a create of `kind` cannot be accepted without, with placeholder values.
/// `None` for kinds that cannot be stubbed at all.
fn required_stub_fields(kind: ResourceKind, stubs: &StubSettings) -> Option<Vec<(&'static str, Expr)>> {
    match kind {
        ResourceKind::Collection | ResourceKind::Database => Some(Vec::new()),
        // an index cannot exist without its source
        ResourceKind::Index => None,
        ResourceKind::Function => Some(vec![("body", Expr::identity_query())]),
        ResourceKind::Role => Some(vec![("privileges", Expr::Array(Vec::new()))]),
        ResourceKind::AccessProvider => Some(vec![
            ("issuer", Expr::string(&stubs.issuer)),
            ("jwks_uri", Expr::string(&stubs.jwks_uri)),
        ]),
    }
}

/// Set every missing explicit update field. Fields already present are kept,
/// so applying this twice is the same as applying it once.
pub fn explicitly_set_all_parameters(stmt: Statement) -> Result<Statement> {
    if stmt.action != StatementKind::Update {
        return Err(PlanError::invalid(
            stmt.key(),
            format!("explicit parameters only apply to updates, received a {}", stmt.action),
        ));
    }
    let Some(fields) = explicit_update_fields(stmt.kind) else {
        return Err(PlanError::invalid(stmt.key(), "indexes cannot be updated"));
    };

    let origin = stmt.origin;
    let key = stmt.key();
    let mut expression = stmt.expression;
    match &mut expression {
        Expr::Update { params, .. } => {
            for (field, value) in fields {
                params.entry(field.to_string()).or_insert(value);
            }
        }
        other => {
            return Err(PlanError::invalid(
                key,
                format!("update statement carries a non-update expression {}", other),
            ))
        }
    }

    Ok(Statement::new(stmt.name, stmt.kind, StatementKind::Update, &stmt.db_path, expression)?
        .with_origin(origin))
}

/// `Update(<Kind>("name"), payload)` from a create statement, with explicit nulling.
pub fn create_to_update(stmt: &Statement) -> Result<Statement> {
    let mut params = stmt.create_params()?.clone();
    params.remove("name");
    let expression = Expr::Update {
        target: Box::new(Expr::reference(stmt.kind, stmt.name.clone())),
        params,
    };
    let update = Statement::new(
        stmt.name.clone(),
        stmt.kind,
        StatementKind::Update,
        &stmt.db_path,
        expression,
    )?;
    explicitly_set_all_parameters(update)
}

/// `Delete(<Kind>("name"))`. Only kind and name are read, so this serves
/// creates and updates alike.
pub fn create_to_delete(stmt: &Statement) -> Result<Statement> {
    let expression = Expr::Delete {
        target: Box::new(Expr::reference(stmt.kind, stmt.name.clone())),
    };
    Statement::new(
        stmt.name.clone(),
        stmt.kind,
        StatementKind::Delete,
        &stmt.db_path,
        expression,
    )
}

pub fn update_to_delete(stmt: &Statement) -> Result<Statement> {
    create_to_delete(stmt)
}

/// Re-apply explicit nulling to an update that came from elsewhere.
pub fn update_to_update(stmt: Statement) -> Result<Statement> {
    explicitly_set_all_parameters(stmt)
}

/// Rebuild the create form of an update, restoring `name`.
pub fn update_to_create(stmt: &Statement) -> Result<Statement> {
    let Some((_, params)) = stmt.expression.as_update() else {
        return Err(PlanError::invalid(
            stmt.key(),
            format!("expected an update statement, found {}", stmt.fql),
        ));
    };
    let mut params = params.clone();
    params.insert("name".to_string(), Expr::string(stmt.name.clone()));
    Statement::new(
        stmt.name.clone(),
        stmt.kind,
        StatementKind::Create,
        &stmt.db_path,
        Expr::Create {
            kind: stmt.kind,
            params,
        },
    )
}

/// Minimal, independently creatable placeholder used to break a cycle.
pub fn make_stub(stmt: &Statement, stubs: &StubSettings) -> Result<Statement> {
    let Some(fields) = required_stub_fields(stmt.kind, stubs) else {
        return Err(PlanError::invalid(
            stmt.key(),
            "indexes cannot be stubbed; an index cannot exist without its source",
        ));
    };
    let mut params = Params::new();
    params.insert("name".to_string(), Expr::string(stmt.name.clone()));
    for (field, value) in fields {
        params.insert(field.to_string(), value);
    }
    let stub = Statement::new(
        stmt.name.clone(),
        stmt.kind,
        StatementKind::Create,
        &stmt.db_path,
        Expr::Create {
            kind: stmt.kind,
            params,
        },
    )?;
    Ok(stub.with_origin(StatementOrigin::Stub))
}

fn split_db_path(child_db_path: &[String]) -> Result<(&String, &[String])> {
    child_db_path
        .split_last()
        .ok_or_else(|| PlanError::ConfigError("Database path is empty".to_string()))
}

/// Statement creating the database at the end of `child_db_path`, inside its parent.
pub fn db_path_to_create(child_db_path: &[String]) -> Result<Statement> {
    let (name, parent) = split_db_path(child_db_path)?;
    let mut params = Params::new();
    params.insert("name".to_string(), Expr::string(name.clone()));
    Statement::new(
        name.clone(),
        ResourceKind::Database,
        StatementKind::Create,
        parent,
        Expr::Create {
            kind: ResourceKind::Database,
            params,
        },
    )
}

/// Touches the database at the end of `child_db_path` without changing it.
///
/// Only the path is known here, so nothing is nulled: the database keeps its
/// `data` and `priority`.
pub fn db_path_to_update(child_db_path: &[String]) -> Result<Statement> {
    let (name, parent) = split_db_path(child_db_path)?;
    Statement::new(
        name.clone(),
        ResourceKind::Database,
        StatementKind::Update,
        parent,
        Expr::Update {
            target: Box::new(Expr::reference(ResourceKind::Database, name.clone())),
            params: Params::new(),
        },
    )
}

pub fn db_path_to_delete(child_db_path: &[String]) -> Result<Statement> {
    let create = db_path_to_create(child_db_path)?;
    create_to_delete(&create)
}
