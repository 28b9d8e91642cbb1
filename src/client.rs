//! HTTP client for the gateway. Keeps the session cookie between calls.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::server::schema::{ExecutionResult, FieldCall, Operation, OperationKind};

#[derive(Clone)]
pub struct GatewayClient {
    base: Url,
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl GatewayClient {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).context("invalid base URL")?;
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()?;
        Ok(Self { base, client, jar })
    }

    /// Value of cookie `name` the client would send to the gateway, if any.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let header = self.jar.cookies(&self.base)?;
        let s = header.to_str().ok()?;
        s.split(';')
            .filter_map(|part| part.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    }

    pub fn set_cookie(&self, name: &str, value: &str) {
        self.jar.add_cookie_str(&format!("{}={}; Path=/", name, value), &self.base);
    }

    /// POST an operation; returns the HTTP status with the decoded body.
    pub async fn send(&self, op: &Operation) -> Result<(StatusCode, Value)> {
        let url = self.base.join("/graphql")?;
        let resp = self.client.post(url).json(op).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }

    pub async fn execute(&self, op: &Operation) -> Result<ExecutionResult> {
        let (status, body) = self.send(op).await?;
        if !status.is_success() {
            return Err(anyhow!("remote error: HTTP {}: {}", status, body));
        }
        Ok(serde_json::from_value(body)?)
    }

    pub async fn query(&self, fields: &[&str]) -> Result<ExecutionResult> {
        let op = Operation { operation: OperationKind::Query, fields: fields.iter().map(|f| FieldCall::named(f)).collect() };
        self.execute(&op).await
    }

    pub async fn login(&self, user: &str, password: &str) -> Result<bool> {
        let call = FieldCall::named("login")
            .arg("user", Value::from(user))
            .arg("password", Value::from(password));
        let res = self.execute(&Operation { operation: OperationKind::Mutation, fields: vec![call] }).await?;
        if let Some(e) = res.errors.first() {
            return Err(anyhow!("login failed: {}", e.message));
        }
        Ok(res.data.get("login").and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn logout(&self) -> Result<bool> {
        let res = self.execute(&Operation { operation: OperationKind::Mutation, fields: vec![FieldCall::named("logout")] }).await?;
        Ok(res.data.get("logout").and_then(Value::as_bool).unwrap_or(false))
    }
}
