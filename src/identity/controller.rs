use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::principal::Principal;
use super::provider::{AuthFailure, CredentialVerifier};
use super::request_context::RequestContext;
use super::session::{short_id, SessionStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing username or password; rejected before any store access.
    #[error("{0} must not be empty")]
    InvalidArgument(&'static str),
    #[error("session unavailable: {0}")]
    SessionUnavailable(String),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::SessionUnavailable(err.to_string())
    }
}

/// Login/logout over the session bound to a request.
///
/// A session is either anonymous or carries exactly one principal. Login sets
/// the principal before regenerating the id, so the new id is born
/// authenticated and the pre-login id is dead.
#[derive(Clone)]
pub struct AuthController {
    verifier: Arc<dyn CredentialVerifier>,
    store: Arc<dyn SessionStore>,
    verify_timeout: Duration,
}

impl AuthController {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, store: Arc<dyn SessionStore>, verify_timeout: Duration) -> Self {
        Self { verifier, store, verify_timeout }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> { &self.store }

    /// Returns `Ok(false)` for rejected credentials; an already authenticated
    /// session stays authenticated in that case.
    pub async fn login(&self, ctx: &RequestContext, username: &str, password: &str) -> Result<bool, AuthError> {
        if username.is_empty() { return Err(AuthError::InvalidArgument("user")); }
        if password.is_empty() { return Err(AuthError::InvalidArgument("password")); }

        let principal = match self.verify(username, password).await {
            Ok(p) => p,
            Err(failure) => {
                warn!(
                    target: "auth",
                    request_id = ctx.request_id(),
                    user = username,
                    reason = failure.audit_reason(),
                    detail = failure.audit_detail().unwrap_or(""),
                    "login rejected"
                );
                return Ok(false);
            }
        };

        let mut session = match ctx.session() {
            Some(s) => s,
            // logged out earlier in this same request
            None => self.store.create()?,
        };
        session.set_principal(&principal);
        let regenerated = match self.store.regenerate(&session) {
            Ok(s) => s,
            Err(StoreError::Stale) => {
                // Old id vanished under us (expired or destroyed elsewhere); start clean.
                debug!(target: "auth", sid = short_id(&session.id), "session gone before regeneration");
                let mut fresh = self.store.create()?;
                fresh.attributes = session.attributes.clone();
                self.store.save(&fresh)?;
                fresh
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            target: "auth",
            request_id = ctx.request_id(),
            user = username,
            sid = short_id(&regenerated.id),
            "login succeeded"
        );
        ctx.rebind(regenerated);
        Ok(true)
    }

    /// Always succeeds for an anonymous or already destroyed session.
    pub fn logout(&self, ctx: &RequestContext) -> Result<bool, AuthError> {
        let Some(mut session) = ctx.session() else {
            debug!(target: "auth", request_id = ctx.request_id(), "logout on destroyed session");
            return Ok(true);
        };
        let previous = session.clear_principal();
        self.store.destroy(&session.id)?;
        ctx.mark_destroyed();
        info!(
            target: "auth",
            request_id = ctx.request_id(),
            user = previous.as_ref().map(|p| p.username.as_str()).unwrap_or("<anonymous>"),
            sid = short_id(&session.id),
            "logout"
        );
        Ok(true)
    }

    async fn verify(&self, username: &str, password: &str) -> Result<Principal, AuthFailure> {
        let verifier = self.verifier.clone();
        let (user, pass) = (username.to_string(), password.to_string());
        let task = tokio::task::spawn_blocking(move || verifier.verify(&user, &pass));
        match tokio::time::timeout(self.verify_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(AuthFailure::store(format!("verifier task failed: {join}"))),
            Err(_) => Err(AuthFailure::store("verification timed out")),
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
