//! Field resolution over the bound request context.
//!
//! Operations arrive as a JSON envelope naming root fields; each root field is
//! looked up in a registry built once at startup and mapped to a typed resolver.
//! Object results are projected through an explicit table of accessors per
//! result type instead of reflecting over struct fields.

use std::collections::HashMap;

use futures_util::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::identity::{current_principal, AuthController, AuthError, Credentials, Principal, RequestContext};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub selections: Vec<String>,
}

impl FieldCall {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn arg(mut self, key: &str, value: Value) -> Self {
        self.arguments.insert(key.to_string(), value);
        self
    }

    fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    #[serde(default)]
    pub operation: OperationKind,
    pub fields: Vec<FieldCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Reported against the field; the rest of the operation still runs.
    #[error("{0}")]
    Field(String),
    /// Aborts the whole request.
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
}

impl From<AuthError> for ResolveError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidArgument(_) => ResolveError::Field(err.to_string()),
            AuthError::SessionUnavailable(m) => ResolveError::SessionUnavailable(m),
        }
    }
}

/// Everything a resolver gets for one field invocation.
pub struct ResolveInput {
    pub ctx: RequestContext,
    pub auth: AuthController,
    pub arguments: Map<String, Value>,
    pub selections: Vec<String>,
}

impl ResolveInput {
    fn str_arg(&self, key: &str) -> &str {
        self.arguments.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

pub type Resolver = fn(ResolveInput) -> BoxFuture<'static, Result<Value, ResolveError>>;

type Accessor<T> = fn(&T) -> Value;

const PRINCIPAL_FIELDS: &[(&str, Accessor<Principal>)] = &[
    ("username", |p: &Principal| Value::String(p.username.clone())),
    ("roles", |p: &Principal| json!(p.roles)),
];

/// Project `value` onto `selections` using the accessor table of its type.
/// No selections means every field.
fn project<T>(value: &T, fields: &[(&str, Accessor<T>)], selections: &[String]) -> Result<Value, ResolveError> {
    let mut out = Map::new();
    if selections.is_empty() {
        for (name, get) in fields { out.insert(name.to_string(), get(value)); }
        return Ok(Value::Object(out));
    }
    for sel in selections {
        let Some((_, get)) = fields.iter().find(|(name, _)| *name == sel.as_str()) else {
            return Err(ResolveError::Field(format!("unknown sub-field '{}'", sel)));
        };
        out.insert(sel.clone(), get(value));
    }
    Ok(Value::Object(out))
}

fn login(input: ResolveInput) -> BoxFuture<'static, Result<Value, ResolveError>> {
    Box::pin(async move {
        let creds = Credentials::new(input.str_arg("user"), input.str_arg("password"));
        let ok = input.auth.login(&input.ctx, &creds.username, &creds.password).await?;
        Ok::<_, ResolveError>(Value::Bool(ok))
    })
}

fn logout(input: ResolveInput) -> BoxFuture<'static, Result<Value, ResolveError>> {
    Box::pin(async move { Ok::<_, ResolveError>(Value::Bool(input.auth.logout(&input.ctx)?)) })
}

fn user_prefs(input: ResolveInput) -> BoxFuture<'static, Result<Value, ResolveError>> {
    Box::pin(async move {
        let Some(principal) = current_principal(&input.ctx) else {
            return Err(ResolveError::Field("Not logged in".into()));
        };
        let prefs = if principal.username == "john" { ["apple", "banana"] } else { ["banana", "pineapple"] };
        Ok(json!(prefs))
    })
}

fn me(input: ResolveInput) -> BoxFuture<'static, Result<Value, ResolveError>> {
    Box::pin(async move {
        match current_principal(&input.ctx) {
            Some(p) => project(&p, PRINCIPAL_FIELDS, &input.selections),
            None => Ok(Value::Null),
        }
    })
}

/// Registry of root fields by operation kind.
#[derive(Default)]
pub struct Schema {
    fields: HashMap<(OperationKind, String), Resolver>,
}

impl Schema {
    pub fn new() -> Self { Self::default() }

    /// Schema with the gateway's built-in fields: `login`/`logout` mutations,
    /// `userPrefs`/`me` queries.
    pub fn standard() -> Self {
        Self::new()
            .register(OperationKind::Mutation, "login", login)
            .register(OperationKind::Mutation, "logout", logout)
            .register(OperationKind::Query, "userPrefs", user_prefs)
            .register(OperationKind::Query, "me", me)
    }

    pub fn register(mut self, kind: OperationKind, name: &str, resolver: Resolver) -> Self {
        self.fields.insert((kind, name.to_string()), resolver);
        self
    }

    pub fn has_field(&self, kind: OperationKind, name: &str) -> bool {
        self.fields.contains_key(&(kind, name.to_string()))
    }

    async fn resolve_field(&self, auth: &AuthController, ctx: &RequestContext, kind: OperationKind, call: FieldCall) -> Result<Value, ResolveError> {
        let Some(resolver) = self.fields.get(&(kind, call.name.clone())) else {
            return Err(ResolveError::Field(format!("unknown field '{}'", call.name)));
        };
        debug!(target: "http", request_id = ctx.request_id(), field = %call.name, "resolving");
        resolver(ResolveInput {
            ctx: ctx.clone(),
            auth: auth.clone(),
            arguments: call.arguments,
            selections: call.selections,
        })
        .await
    }

    /// Query fields resolve concurrently; mutation fields run one after another
    /// in document order. Only `SessionUnavailable` fails the whole operation.
    pub async fn execute(&self, auth: &AuthController, ctx: &RequestContext, op: Operation) -> Result<ExecutionResult, ResolveError> {
        let keys: Vec<String> = op.fields.iter().map(|f| f.response_key().to_string()).collect();
        let outcomes = match op.operation {
            OperationKind::Query => {
                join_all(op.fields.into_iter().map(|call| self.resolve_field(auth, ctx, OperationKind::Query, call))).await
            }
            OperationKind::Mutation => {
                let mut out = Vec::with_capacity(op.fields.len());
                for call in op.fields {
                    let r = self.resolve_field(auth, ctx, OperationKind::Mutation, call).await;
                    let fatal = matches!(r, Err(ResolveError::SessionUnavailable(_)));
                    out.push(r);
                    if fatal { break; }
                }
                out
            }
        };

        let mut result = ExecutionResult::default();
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            match outcome {
                Ok(v) => { result.data.insert(key, v); }
                Err(ResolveError::Field(message)) => {
                    result.data.insert(key.clone(), Value::Null);
                    result.errors.push(FieldError { field: key, message });
                }
                Err(e @ ResolveError::SessionUnavailable(_)) => return Err(e),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod schema_tests;
