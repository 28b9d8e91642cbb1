use super::*;
use std::sync::Arc;
use std::time::Duration;

use crate::identity::{MemoryCredentialStore, MemorySessionStore, SessionStore, StoreError};

fn setup() -> (Arc<MemorySessionStore>, AuthController, RequestContext) {
    let mut creds = MemoryCredentialStore::new();
    creds.insert("john", "secret", &["user"]).unwrap();
    creds.insert("jane", "hunter2", &[]).unwrap();
    let store = Arc::new(MemorySessionStore::default());
    let auth = AuthController::new(Arc::new(creds), store.clone(), Duration::from_secs(5));
    let ctx = RequestContext::bind(store.create().unwrap(), true);
    (store, auth, ctx)
}

fn mutation(fields: Vec<FieldCall>) -> Operation {
    Operation { operation: OperationKind::Mutation, fields }
}

fn query(fields: Vec<FieldCall>) -> Operation {
    Operation { operation: OperationKind::Query, fields }
}

fn login_call(user: &str, password: &str) -> FieldCall {
    FieldCall::named("login").arg("user", json!(user)).arg("password", json!(password))
}

#[test]
fn envelope_deserializes_with_defaults() {
    let op: Operation = serde_json::from_value(json!({"fields": [{"name": "me"}]})).unwrap();
    assert_eq!(op.operation, OperationKind::Query);
    assert!(op.fields[0].arguments.is_empty());
    let op: Operation = serde_json::from_value(json!({
        "operation": "mutation",
        "fields": [{"name": "login", "alias": "l", "arguments": {"user": "john", "password": "secret"}}]
    })).unwrap();
    assert_eq!(op.operation, OperationKind::Mutation);
    assert_eq!(op.fields[0].response_key(), "l");
}

#[test]
fn standard_schema_registers_builtin_fields() {
    let schema = Schema::standard();
    assert!(schema.has_field(OperationKind::Mutation, "login"));
    assert!(schema.has_field(OperationKind::Mutation, "logout"));
    assert!(schema.has_field(OperationKind::Query, "userPrefs"));
    assert!(schema.has_field(OperationKind::Query, "me"));
    assert!(!schema.has_field(OperationKind::Query, "login"));
}

#[tokio::test]
async fn login_then_user_prefs_within_one_mutation_pass() {
    let (_store, auth, ctx) = setup();
    let schema = Schema::standard();
    let res = schema.execute(&auth, &ctx, mutation(vec![login_call("john", "secret")])).await.unwrap();
    assert_eq!(res.data["login"], json!(true));
    assert!(res.errors.is_empty());

    let res = schema.execute(&auth, &ctx, query(vec![FieldCall::named("userPrefs"), FieldCall::named("me")])).await.unwrap();
    assert_eq!(res.data["userPrefs"], json!(["apple", "banana"]));
    assert_eq!(res.data["me"], json!({"username": "john", "roles": ["user"]}));
}

#[tokio::test]
async fn other_users_get_default_prefs() {
    let (_store, auth, ctx) = setup();
    let schema = Schema::standard();
    schema.execute(&auth, &ctx, mutation(vec![login_call("jane", "hunter2")])).await.unwrap();
    let res = schema.execute(&auth, &ctx, query(vec![FieldCall::named("userPrefs")])).await.unwrap();
    assert_eq!(res.data["userPrefs"], json!(["banana", "pineapple"]));
}

#[tokio::test]
async fn anonymous_user_prefs_is_a_field_error() {
    let (_store, auth, ctx) = setup();
    let res = Schema::standard().execute(&auth, &ctx, query(vec![FieldCall::named("userPrefs"), FieldCall::named("me")])).await.unwrap();
    assert_eq!(res.data["userPrefs"], Value::Null);
    assert_eq!(res.data["me"], Value::Null);
    assert_eq!(res.errors, vec![FieldError { field: "userPrefs".into(), message: "Not logged in".into() }]);
}

#[tokio::test]
async fn missing_login_arguments_are_field_errors() {
    let (_store, auth, ctx) = setup();
    let res = Schema::standard()
        .execute(&auth, &ctx, mutation(vec![FieldCall::named("login").arg("user", json!("john"))]))
        .await
        .unwrap();
    assert_eq!(res.data["login"], Value::Null);
    assert_eq!(res.errors[0].message, "password must not be empty");
}

#[tokio::test]
async fn mutations_run_in_order() {
    let (_store, auth, ctx) = setup();
    let mut second = login_call("john", "wrong");
    second.alias = Some("again".into());
    let res = Schema::standard()
        .execute(&auth, &ctx, mutation(vec![login_call("john", "secret"), second, FieldCall::named("logout")]))
        .await
        .unwrap();
    assert_eq!(res.data["login"], json!(true));
    assert_eq!(res.data["again"], json!(false));
    assert_eq!(res.data["logout"], json!(true));
    assert!(current_principal(&ctx).is_none());
}

#[tokio::test]
async fn me_projects_selected_sub_fields_only() {
    let (_store, auth, ctx) = setup();
    let schema = Schema::standard();
    schema.execute(&auth, &ctx, mutation(vec![login_call("john", "secret")])).await.unwrap();
    let mut me = FieldCall::named("me");
    me.selections = vec!["username".into()];
    let mut bad = FieldCall::named("me");
    bad.alias = Some("bad".into());
    bad.selections = vec!["password".into()];
    let res = schema.execute(&auth, &ctx, query(vec![me, bad])).await.unwrap();
    assert_eq!(res.data["me"], json!({"username": "john"}));
    assert_eq!(res.data["bad"], Value::Null);
    assert_eq!(res.errors[0].field, "bad");
}

#[tokio::test]
async fn unknown_fields_are_reported_not_fatal() {
    let (_store, auth, ctx) = setup();
    let res = Schema::standard()
        .execute(&auth, &ctx, query(vec![FieldCall::named("nope"), FieldCall::named("me")]))
        .await
        .unwrap();
    assert_eq!(res.errors.len(), 1);
    assert!(res.errors[0].message.contains("nope"));
    assert!(res.data.contains_key("me"));
}

struct DownStore;

impl SessionStore for DownStore {
    fn create(&self) -> Result<crate::identity::Session, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn load(&self, _id: &str) -> Result<Option<crate::identity::Session>, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn save(&self, _s: &crate::identity::Session) -> Result<(), StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn regenerate(&self, _s: &crate::identity::Session) -> Result<crate::identity::Session, StoreError> { Err(StoreError::Unavailable("down".into())) }
    fn destroy(&self, _id: &str) -> Result<(), StoreError> { Err(StoreError::Unavailable("down".into())) }
}

#[tokio::test]
async fn store_failure_aborts_the_operation() {
    let (_store, _auth, ctx) = setup();
    let auth = AuthController::new(Arc::new(MemoryCredentialStore::new()), Arc::new(DownStore), Duration::from_secs(1));
    let err = Schema::standard()
        .execute(&auth, &ctx, mutation(vec![FieldCall::named("logout"), login_call("john", "secret")]))
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::SessionUnavailable(_)));
}

#[tokio::test]
async fn custom_resolvers_can_be_registered() {
    fn ping(_input: ResolveInput) -> BoxFuture<'static, Result<Value, ResolveError>> {
        Box::pin(async { Ok::<_, ResolveError>(json!("pong")) })
    }
    let (_store, auth, ctx) = setup();
    let schema = Schema::new().register(OperationKind::Query, "ping", ping);
    let res = schema.execute(&auth, &ctx, query(vec![FieldCall::named("ping")])).await.unwrap();
    assert_eq!(res.data["ping"], json!("pong"));
}
