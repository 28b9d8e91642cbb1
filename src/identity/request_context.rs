use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::principal::Principal;
use super::session::{Session, SessionId};

#[derive(Debug)]
struct Binding {
    /// None once the session has been destroyed during this request.
    session: Option<Session>,
    /// Created by the binder for this request; the id has not reached the client yet.
    fresh: bool,
    regenerated: bool,
    /// Attributes changed locally and not yet written to the store.
    dirty: bool,
}

/// What the binder has to do with the session once the request is handled.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Settlement {
    Unchanged,
    /// Save when `save` is set; propagate the id when `propagate` is set.
    Persist { session: Session, save: bool, propagate: bool },
    Destroyed,
}

/// Per-request view of the bound session.
///
/// Cloning shares the same binding, so resolvers fanned out within one request
/// observe each other's writes, while two requests never share a context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    inner: Arc<RwLock<Binding>>,
}

impl RequestContext {
    /// Bind `session` to a new request. `fresh` marks a session created for this request.
    pub fn bind(session: Session, fresh: bool) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            inner: Arc::new(RwLock::new(Binding { session: Some(session), fresh, regenerated: false, dirty: false })),
        }
    }

    pub fn request_id(&self) -> &str { &self.request_id }

    pub fn session(&self) -> Option<Session> { self.inner.read().session.clone() }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.read().session.as_ref().map(|s| s.id.clone())
    }

    pub fn principal(&self) -> Option<Principal> {
        self.inner.read().session.as_ref().and_then(Session::principal)
    }

    pub fn is_authenticated(&self) -> bool { self.principal().is_some() }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner.read().session.as_ref().and_then(|s| s.get(key).cloned())
    }

    /// Set a session attribute; persisted by the binder at request end.
    /// Returns false when the session was already destroyed in this request.
    pub fn set_attribute(&self, key: impl Into<String>, value: Value) -> bool {
        let mut b = self.inner.write();
        let Some(s) = b.session.as_mut() else { return false; };
        s.insert(key, value);
        b.dirty = true;
        true
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        let mut b = self.inner.write();
        let removed = b.session.as_mut().and_then(|s| s.remove(key));
        if removed.is_some() { b.dirty = true; }
        removed
    }

    /// Replace the bound session with one the store has already persisted under a new id.
    pub(crate) fn rebind(&self, session: Session) {
        let mut b = self.inner.write();
        b.session = Some(session);
        b.regenerated = true;
        b.dirty = false;
    }

    pub(crate) fn mark_destroyed(&self) {
        let mut b = self.inner.write();
        b.session = None;
        b.dirty = false;
    }

    pub(crate) fn settle(&self) -> Settlement {
        let b = self.inner.read();
        match &b.session {
            None => Settlement::Destroyed,
            Some(s) if b.dirty || b.fresh || b.regenerated => Settlement::Persist {
                session: s.clone(),
                save: b.dirty,
                propagate: b.fresh || b.regenerated,
            },
            Some(_) => Settlement::Unchanged,
        }
    }
}

/// Principal bound to the request, if any. Pure read; reflects login/logout
/// performed earlier in the same request.
pub fn current_principal(ctx: &RequestContext) -> Option<Principal> {
    ctx.principal()
}
