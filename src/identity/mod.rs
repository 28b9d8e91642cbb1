//! Session lifecycle and authentication binding.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod controller;
mod request_context;

pub use principal::Principal;
pub use session::{Session, SessionId, SessionStore, MemorySessionStore, StoreError, PRINCIPAL_KEY, short_id};
pub use provider::{
    AuthFailure, CredentialVerifier, Credentials, FileCredentialStore, MemoryCredentialStore,
    hash_password, verify_password,
};
pub use controller::{AuthController, AuthError};
pub use request_context::{RequestContext, current_principal};
pub(crate) use request_context::Settlement;
