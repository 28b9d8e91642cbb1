//! Session binder: loads or creates the session for every request, attaches it
//! as a `RequestContext` extension, and settles it once the handler returns.

use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use super::AppState;
use crate::error::AppError;
use crate::identity::{short_id, RequestContext, SessionStore, Settlement, StoreError};

/// Cookie attributes for the session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
}

impl CookieSettings {
    fn attrs(&self) -> &'static str {
        if self.secure { "HttpOnly; Secure; SameSite=Strict; Path=/" } else { "HttpOnly; SameSite=Strict; Path=/" }
    }

    pub fn set_header(&self, sid: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!("{}={}; {}", self.name, sid, self.attrs())).ok()
    }

    pub fn clear_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&format!(
            "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; {}",
            self.name,
            self.attrs()
        ))
        .ok()
    }
}

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie").iter() {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k == name && !v.is_empty() { return Some(v.to_string()); }
            }
        }
    }
    None
}

/// Load the session named by `incoming`, or create one when there is none.
pub fn open_session(store: &dyn SessionStore, incoming: Option<&str>) -> Result<RequestContext, StoreError> {
    if let Some(sid) = incoming {
        if let Some(session) = store.load(sid)? {
            return Ok(RequestContext::bind(session, false));
        }
        debug!(target: "session", sid = short_id(sid), "unknown or expired session id, issuing a new one");
    }
    Ok(RequestContext::bind(store.create()?, true))
}

/// Persist whatever the request did to its session; returns the cookie to send back.
pub fn settle_session(store: &dyn SessionStore, cookie: &CookieSettings, ctx: &RequestContext) -> Result<Option<HeaderValue>, StoreError> {
    match ctx.settle() {
        Settlement::Unchanged => Ok(None),
        Settlement::Destroyed => Ok(cookie.clear_header()),
        Settlement::Persist { session, save, propagate } => {
            if save {
                match store.save(&session) {
                    Ok(()) => {}
                    Err(StoreError::Stale) => {
                        // Regenerated, destroyed or expired by another request meanwhile.
                        // The cookie is left alone: it may already name the successor id.
                        debug!(target: "session", sid = short_id(&session.id), "dropping writes to stale session");
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(if propagate { cookie.set_header(&session.id) } else { None })
        }
    }
}

pub async fn bind_session(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let incoming = parse_cookie(req.headers(), &state.cookie.name);
    let ctx = match open_session(state.store.as_ref(), incoming.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(target: "session", "cannot bind session: {}", e);
            return AppError::from(e).into_response();
        }
    };
    req.extensions_mut().insert(ctx.clone());

    let mut resp = next.run(req).await;

    match settle_session(state.store.as_ref(), &state.cookie, &ctx) {
        Ok(Some(cookie)) => { resp.headers_mut().append(SET_COOKIE, cookie); }
        Ok(None) => {}
        Err(e) => {
            error!(target: "session", request_id = ctx.request_id(), "cannot persist session: {}", e);
            return AppError::from(e).into_response();
        }
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{MemorySessionStore, Principal};

    fn cookie() -> CookieSettings {
        CookieSettings { name: "sg".into(), secure: true }
    }

    #[test]
    fn parses_named_cookie_among_others() {
        let mut h = HeaderMap::new();
        h.insert("cookie", HeaderValue::from_static("a=1; sg=abc; b=2"));
        assert_eq!(parse_cookie(&h, "sg").as_deref(), Some("abc"));
        assert_eq!(parse_cookie(&h, "c"), None);
        h.insert("cookie", HeaderValue::from_static("sg="));
        assert_eq!(parse_cookie(&h, "sg"), None);
    }

    #[test]
    fn cookie_headers_carry_hardening_attributes() {
        let set = cookie().set_header("abc").unwrap();
        let s = set.to_str().unwrap();
        assert!(s.starts_with("sg=abc;"));
        assert!(s.contains("HttpOnly") && s.contains("Secure") && s.contains("SameSite=Strict"));
        let plain = CookieSettings { name: "sg".into(), secure: false }.set_header("abc").unwrap();
        assert!(!plain.to_str().unwrap().contains("Secure"));
        assert!(cookie().clear_header().unwrap().to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn open_reuses_live_session_and_replaces_unknown() {
        let store = MemorySessionStore::default();
        let live = store.create().unwrap();
        let ctx = open_session(&store, Some(live.id.as_str())).unwrap();
        assert_eq!(ctx.session_id().unwrap(), live.id);
        assert_eq!(settle_session(&store, &cookie(), &ctx).unwrap(), None);

        let ctx = open_session(&store, Some("forged-id")).unwrap();
        assert_ne!(ctx.session_id().unwrap(), "forged-id");
        let set = settle_session(&store, &cookie(), &ctx).unwrap().unwrap();
        assert!(set.to_str().unwrap().contains(&ctx.session_id().unwrap()));
    }

    #[test]
    fn dirty_attributes_are_saved_at_settle() {
        let store = MemorySessionStore::default();
        let live = store.create().unwrap();
        let ctx = open_session(&store, Some(live.id.as_str())).unwrap();
        ctx.set_attribute("theme", serde_json::json!("dark"));
        assert_eq!(settle_session(&store, &cookie(), &ctx).unwrap(), None);
        assert_eq!(store.load(&live.id).unwrap().unwrap().get("theme"), Some(&serde_json::json!("dark")));
    }

    #[test]
    fn stale_session_writes_are_dropped_without_touching_cookie() {
        let store = MemorySessionStore::default();
        let live = store.create().unwrap();
        let ctx = open_session(&store, Some(live.id.as_str())).unwrap();
        ctx.set_attribute("k", serde_json::json!(1));
        store.destroy(&live.id).unwrap();
        assert_eq!(settle_session(&store, &cookie(), &ctx).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn racing_writer_cannot_clear_cookie_of_concurrent_login() {
        let store = MemorySessionStore::default();
        let live = store.create().unwrap();
        let login = open_session(&store, Some(live.id.as_str())).unwrap();
        let writer = open_session(&store, Some(live.id.as_str())).unwrap();

        let mut s = login.session().unwrap();
        s.set_principal(&Principal::new("john"));
        let regenerated = store.regenerate(&s).unwrap();
        login.rebind(regenerated.clone());
        let issued = settle_session(&store, &cookie(), &login).unwrap().unwrap();
        assert!(issued.to_str().unwrap().contains(&regenerated.id));

        writer.set_attribute("theme", serde_json::json!("dark"));
        assert_eq!(settle_session(&store, &cookie(), &writer).unwrap(), None);
        assert!(store.load(&live.id).unwrap().is_none());
        let kept = store.load(&regenerated.id).unwrap().unwrap();
        assert_eq!(kept.principal().map(|p| p.username), Some("john".to_string()));
        assert_eq!(kept.get("theme"), None);
    }

    #[test]
    fn rebound_session_propagates_new_id() {
        let store = MemorySessionStore::default();
        let live = store.create().unwrap();
        let ctx = open_session(&store, Some(live.id.as_str())).unwrap();
        let mut s = ctx.session().unwrap();
        s.set_principal(&Principal::new("john"));
        let regenerated = store.regenerate(&s).unwrap();
        ctx.rebind(regenerated.clone());
        let h = settle_session(&store, &cookie(), &ctx).unwrap().unwrap();
        assert!(h.to_str().unwrap().contains(&regenerated.id));
    }
}
