//! Query expression tree.
//!
//! `Expr` is a tagged tree for the subset of the query language a migration
//! produces. It has two encodings:
//!   - the wire form (JSON), via `Serialize`/`Deserialize`
//!   - the text form (`CreateRole({name: "admin"})`), via `Display`
//!
//! The planner only ever inspects and rewrites the tree structurally; the text
//! form is rendered from the tree, never parsed back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{PlanError, Result};
use crate::resource::{ResourceKey, ResourceKind};

static BARE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap());

/// Fields of an object literal. Sorted, so rendering is deterministic.
pub type Params = BTreeMap<String, Expr>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Expr>),
    Object(Params),
    /// A named reference to a schema resource, e.g. `Role("admin")`.
    Ref(ResourceRef),
    Var(String),
    Create {
        kind: ResourceKind,
        params: Params,
    },
    Update {
        target: Box<Expr>,
        params: Params,
    },
    Delete {
        target: Box<Expr>,
    },
    /// Sequential bindings: each binding may use the ones before it.
    Let {
        bindings: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    Select {
        path: Vec<String>,
        from: Box<Expr>,
    },
    Query(Box<Expr>),
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    /// Any other function. `args[0].0` is the function name, as on the wire.
    Call {
        name: String,
        args: Vec<(String, Expr)>,
    },
}

/// Reference to a resource, optionally scoped to a child database.
///
/// `scope` is relative to the database the enclosing statement runs in,
/// outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub scope: Vec<String>,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            scope: Vec::new(),
        }
    }

    /// Resolve against the database path of the statement containing it.
    pub fn key(&self, db_path: &[String]) -> ResourceKey {
        let mut path = db_path.to_vec();
        path.extend(self.scope.iter().cloned());
        ResourceKey {
            db_path: path,
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    fn to_wire(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.kind.ref_tag().to_string(), Value::String(self.name.clone()));
        if let Some(scope) = database_scope_wire(&self.scope) {
            map.insert("scope".to_string(), scope);
        }
        Value::Object(map)
    }
}

/// `["a", "b"]` becomes `{"database": "b", "scope": {"database": "a"}}`.
fn database_scope_wire(scope: &[String]) -> Option<Value> {
    let (last, rest) = scope.split_last()?;
    let mut map = Map::new();
    map.insert("database".to_string(), Value::String(last.clone()));
    if let Some(parent) = database_scope_wire(rest) {
        map.insert("scope".to_string(), parent);
    }
    Some(Value::Object(map))
}

impl Expr {
    pub fn string(s: impl Into<String>) -> Self {
        Expr::String(s.into())
    }

    pub fn reference(kind: ResourceKind, name: impl Into<String>) -> Self {
        Expr::Ref(ResourceRef::new(kind, name))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    /// `Query(Lambda("x", Var("x")))`: the identity function.
    pub fn identity_query() -> Self {
        Expr::Query(Box::new(Expr::Lambda {
            params: vec!["x".to_string()],
            body: Box::new(Expr::var("x")),
        }))
    }

    /// Kind and payload if this is a `Create<Kind>(...)` expression.
    pub fn as_create(&self) -> Option<(ResourceKind, &Params)> {
        match self {
            Expr::Create { kind, params } => Some((*kind, params)),
            _ => None,
        }
    }

    pub fn as_update(&self) -> Option<(&Expr, &Params)> {
        match self {
            Expr::Update { target, params } => Some((target, params)),
            _ => None,
        }
    }

    /// Direct children, in rendering order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => Vec::new(),
            Expr::Ref(_) | Expr::Var(_) => Vec::new(),
            Expr::Array(items) => items.iter().collect(),
            Expr::Object(params) | Expr::Create { params, .. } => params.values().collect(),
            Expr::Update { target, params } => {
                let mut out = vec![target.as_ref()];
                out.extend(params.values());
                out
            }
            Expr::Delete { target } => vec![target.as_ref()],
            Expr::Let { bindings, body } => {
                let mut out: Vec<&Expr> = bindings.iter().map(|(_, e)| e).collect();
                out.push(body.as_ref());
                out
            }
            Expr::Select { from, .. } => vec![from.as_ref()],
            Expr::Query(inner) => vec![inner.as_ref()],
            Expr::Lambda { body, .. } => vec![body.as_ref()],
            Expr::Call { args, .. } => args.iter().map(|(_, e)| e).collect(),
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => Vec::new(),
            Expr::Ref(_) | Expr::Var(_) => Vec::new(),
            Expr::Array(items) => items.iter_mut().collect(),
            Expr::Object(params) | Expr::Create { params, .. } => params.values_mut().collect(),
            Expr::Update { target, params } => {
                let mut out = vec![target.as_mut()];
                out.extend(params.values_mut());
                out
            }
            Expr::Delete { target } => vec![target.as_mut()],
            Expr::Let { bindings, body } => {
                let mut out: Vec<&mut Expr> = bindings.iter_mut().map(|(_, e)| e).collect();
                out.push(body.as_mut());
                out
            }
            Expr::Select { from, .. } => vec![from.as_mut()],
            Expr::Query(inner) => vec![inner.as_mut()],
            Expr::Lambda { body, .. } => vec![body.as_mut()],
            Expr::Call { args, .. } => args.iter_mut().map(|(_, e)| e).collect(),
        }
    }

    /// Pre-order traversal over every node in the tree.
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(&'a Expr),
    {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Replace every reference node accepted by `is_target` with `replacement`.
    ///
    /// Returns the number of nodes replaced.
    pub fn substitute_refs<F>(&mut self, is_target: &F, replacement: &Expr) -> usize
    where
        F: Fn(&ResourceRef) -> bool,
    {
        let hit = match self {
            Expr::Ref(r) => Some(is_target(r)),
            _ => None,
        };
        match hit {
            Some(true) => {
                *self = replacement.clone();
                1
            }
            Some(false) => 0,
            None => self
                .children_mut()
                .into_iter()
                .map(|child| child.substitute_refs(is_target, replacement))
                .sum(),
        }
    }

    // ── wire encoding ──

    pub fn to_wire(&self) -> Value {
        match self {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(n) => Value::Number(n.clone()),
            Expr::String(s) => Value::String(s.clone()),
            Expr::Array(items) => Value::Array(items.iter().map(Expr::to_wire).collect()),
            Expr::Object(params) => object_wire(params),
            Expr::Ref(r) => r.to_wire(),
            Expr::Var(name) => tagged([("var", Value::String(name.clone()))]),
            Expr::Create { kind, params } => tagged([(kind.create_tag(), object_wire(params))]),
            Expr::Update { target, params } => tagged([
                ("update", target.to_wire()),
                ("params", object_wire(params)),
            ]),
            Expr::Delete { target } => tagged([("delete", target.to_wire())]),
            Expr::Let { bindings, body } => {
                let bindings = bindings
                    .iter()
                    .map(|(name, e)| tagged([(name.as_str(), e.to_wire())]))
                    .collect();
                tagged([("let", Value::Array(bindings)), ("in", body.to_wire())])
            }
            Expr::Select { path, from } => tagged([
                (
                    "select",
                    Value::Array(path.iter().cloned().map(Value::String).collect()),
                ),
                ("from", from.to_wire()),
            ]),
            Expr::Query(inner) => tagged([("query", inner.to_wire())]),
            Expr::Lambda { params, body } => {
                let params = match params.as_slice() {
                    [single] => Value::String(single.clone()),
                    many => Value::Array(many.iter().cloned().map(Value::String).collect()),
                };
                tagged([("lambda", params), ("expr", body.to_wire())])
            }
            Expr::Call { args, .. } => {
                let mut map = Map::new();
                for (key, arg) in args {
                    map.insert(key.clone(), arg.to_wire());
                }
                Value::Object(map)
            }
        }
    }

    pub fn from_wire(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Expr::Null),
            Value::Bool(b) => Ok(Expr::Bool(*b)),
            Value::Number(n) => Ok(Expr::Number(n.clone())),
            Value::String(s) => Ok(Expr::String(s.clone())),
            Value::Array(items) => Ok(Expr::Array(
                items.iter().map(Expr::from_wire).collect::<Result<_>>()?,
            )),
            Value::Object(map) => parse_function(map),
        }
    }
}

fn tagged<'a, const N: usize>(pairs: [(&'a str, Value); N]) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

fn object_wire(params: &Params) -> Value {
    let mut fields = Map::new();
    for (key, value) in params {
        fields.insert(key.clone(), value.to_wire());
    }
    tagged([("object", Value::Object(fields))])
}

fn parse_error(msg: impl Into<String>) -> PlanError {
    PlanError::ExpressionParseError(msg.into())
}

fn parse_function(map: &Map<String, Value>) -> Result<Expr> {
    let Some((head, arg)) = map.iter().next() else {
        return Err(parse_error("empty object is not a valid expression"));
    };

    match head.as_str() {
        "object" if map.len() == 1 => Ok(Expr::Object(parse_fields(arg)?)),
        "var" if map.len() == 1 => arg
            .as_str()
            .map(Expr::var)
            .ok_or_else(|| parse_error("var name must be a string")),
        "update" if map.len() == 2 && map.contains_key("params") => Ok(Expr::Update {
            target: Box::new(Expr::from_wire(arg)?),
            params: parse_object_arg(&map["params"])?,
        }),
        "delete" if map.len() == 1 => Ok(Expr::Delete {
            target: Box::new(Expr::from_wire(arg)?),
        }),
        "let" if map.len() == 2 && map.contains_key("in") => Ok(Expr::Let {
            bindings: parse_bindings(arg)?,
            body: Box::new(Expr::from_wire(&map["in"])?),
        }),
        "select" if map.len() == 2 && map.contains_key("from") && is_string_array(arg) => {
            Ok(Expr::Select {
                path: string_array(arg),
                from: Box::new(Expr::from_wire(&map["from"])?),
            })
        }
        "query" if map.len() == 1 => Ok(Expr::Query(Box::new(Expr::from_wire(arg)?))),
        "lambda" if map.len() == 2 && map.contains_key("expr") => {
            let params = match arg {
                Value::String(s) => vec![s.clone()],
                other if is_string_array(other) => string_array(other),
                _ => return Err(parse_error("lambda params must be a string or string array")),
            };
            Ok(Expr::Lambda {
                params,
                body: Box::new(Expr::from_wire(&map["expr"])?),
            })
        }
        tag => {
            if let (Some(kind), Value::String(name)) = (ResourceKind::from_ref_tag(tag), arg) {
                let scoped = map.len() == 2 && map.contains_key("scope");
                if map.len() == 1 || scoped {
                    let scope = match map.get("scope") {
                        Some(scope) => parse_database_scope(scope)?,
                        None => Vec::new(),
                    };
                    return Ok(Expr::Ref(ResourceRef {
                        kind,
                        name: name.clone(),
                        scope,
                    }));
                }
            }
            if let Some(kind) = ResourceKind::from_create_tag(tag) {
                if map.len() == 1 {
                    return Ok(Expr::Create {
                        kind,
                        params: parse_object_arg(arg)?,
                    });
                }
            }
            let args = map
                .iter()
                .map(|(key, value)| Ok((key.clone(), Expr::from_wire(value)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Call {
                name: tag.to_string(),
                args,
            })
        }
    }
}

/// The raw field map inside `{"object": {...}}`.
fn parse_fields(value: &Value) -> Result<Params> {
    let Value::Object(fields) = value else {
        return Err(parse_error("object literal must wrap a JSON object"));
    };
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), Expr::from_wire(value)?)))
        .collect()
}

/// A function argument that must be an object literal.
fn parse_object_arg(value: &Value) -> Result<Params> {
    match Expr::from_wire(value)? {
        Expr::Object(params) => Ok(params),
        other => Err(parse_error(format!(
            "expected an object literal, found {}",
            other
        ))),
    }
}

fn parse_bindings(value: &Value) -> Result<Vec<(String, Expr)>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(single) if single.len() == 1 => {
                    let (name, value) = single.iter().next().ok_or_else(|| parse_error("empty binding"))?;
                    Ok((name.clone(), Expr::from_wire(value)?))
                }
                _ => Err(parse_error("each let binding must be a single-key object")),
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(name, value)| Ok((name.clone(), Expr::from_wire(value)?)))
            .collect(),
        _ => Err(parse_error("let bindings must be an array or an object")),
    }
}

fn parse_database_scope(value: &Value) -> Result<Vec<String>> {
    match Expr::from_wire(value)? {
        Expr::Ref(ResourceRef {
            kind: ResourceKind::Database,
            name,
            mut scope,
        }) => {
            scope.push(name);
            Ok(scope)
        }
        other => Err(parse_error(format!(
            "reference scope must be a database, found {}",
            other
        ))),
    }
}

fn is_string_array(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.iter().all(Value::is_string))
}

fn string_array(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Expr::from_wire(&value).map_err(serde::de::Error::custom)
    }
}

// ── text form ──

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "{}", Value::String(s.to_string()))
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &str) -> fmt::Result {
    if BARE_KEY_RE.is_match(key) {
        f.write_str(key)
    } else {
        write_quoted(f, key)
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    if params.is_empty() {
        return f.write_str("{}");
    }
    f.write_str("{ ")?;
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_key(f, key)?;
        write!(f, ": {}", value)?;
    }
    f.write_str(" }")
}

fn write_strings(f: &mut fmt::Formatter<'_>, items: &[String]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_quoted(f, item)?;
    }
    f.write_str("]")
}

/// `Database("b", Database("a"))` for scope `["a", "b"]`.
fn write_scope(f: &mut fmt::Formatter<'_>, scope: &[String]) -> fmt::Result {
    if let Some((last, rest)) = scope.split_last() {
        f.write_str(", Database(")?;
        write_quoted(f, last)?;
        write_scope(f, rest)?;
        f.write_str(")")?;
    }
    Ok(())
}

/// `create_access_provider` -> `CreateAccessProvider`.
fn pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        write_quoted(f, &self.name)?;
        write_scope(f, &self.scope)?;
        f.write_str(")")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => f.write_str("null"),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::String(s) => write_quoted(f, s),
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Object(params) => write_fields(f, params),
            Expr::Ref(r) => write!(f, "{}", r),
            Expr::Var(name) => {
                f.write_str("Var(")?;
                write_quoted(f, name)?;
                f.write_str(")")
            }
            Expr::Create { kind, params } => {
                write!(f, "Create{}(", kind)?;
                write_fields(f, params)?;
                f.write_str(")")
            }
            Expr::Update { target, params } => {
                write!(f, "Update({}, ", target)?;
                write_fields(f, params)?;
                f.write_str(")")
            }
            Expr::Delete { target } => write!(f, "Delete({})", target),
            Expr::Let { bindings, body } => {
                f.write_str("Let([")?;
                for (i, (name, value)) in bindings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str("{ ")?;
                    write_key(f, name)?;
                    write!(f, ": {} }}", value)?;
                }
                write!(f, "], {})", body)
            }
            Expr::Select { path, from } => {
                f.write_str("Select(")?;
                write_strings(f, path)?;
                write!(f, ", {})", from)
            }
            Expr::Query(inner) => write!(f, "Query({})", inner),
            Expr::Lambda { params, body } => {
                f.write_str("Lambda(")?;
                match params.as_slice() {
                    [single] => write_quoted(f, single)?,
                    many => write_strings(f, many)?,
                }
                write!(f, ", {})", body)
            }
            Expr::Call { name, args } => {
                write!(f, "{}(", pascal_case(name))?;
                let values: Vec<Expr> = args.iter().map(|(_, e)| e.clone()).collect();
                write_list(f, &values)?;
                f.write_str(")")
            }
        }
    }
}
