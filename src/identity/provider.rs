use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use thiserror::Error;
use tracing::warn;

use super::principal::Principal;

/// Well-formed argon2id hash that matches no password. Unknown usernames are
/// checked against it so every rejection costs one hash verification.
const DECOY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Username/password pair as submitted by a client. `Debug` never shows the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FailureReason {
    UnknownUser,
    BadPassword,
    Store,
}

/// Verification failure. Every reason renders identically; the reason is only
/// available to audit logging through [`AuthFailure::audit_reason`].
#[derive(Clone, Error)]
#[error("invalid credentials")]
pub struct AuthFailure {
    reason: FailureReason,
    detail: Option<String>,
}

impl AuthFailure {
    pub fn unknown_user() -> Self { Self { reason: FailureReason::UnknownUser, detail: None } }
    pub fn bad_password() -> Self { Self { reason: FailureReason::BadPassword, detail: None } }
    pub fn store(detail: impl Into<String>) -> Self { Self { reason: FailureReason::Store, detail: Some(detail.into()) } }

    pub fn audit_reason(&self) -> &'static str {
        match self.reason {
            FailureReason::UnknownUser => "unknown_user",
            FailureReason::BadPassword => "bad_password",
            FailureReason::Store => "store_error",
        }
    }

    pub fn audit_detail(&self) -> Option<&str> { self.detail.as_deref() }
}

impl fmt::Debug for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthFailure")
    }
}

/// Checks a username/password pair against a credential store.
///
/// Callers reject empty usernames or passwords before calling. Implementations
/// must be side-effect free and safe to call from many threads at once.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, username: &str, password: &str) -> Result<Principal, AuthFailure>;
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CredentialEntry {
    hash: String,
    roles: Vec<String>,
}

fn check_entry(entry: Option<&CredentialEntry>, username: &str, password: &str) -> Result<Principal, AuthFailure> {
    match entry {
        Some(e) if verify_password(&e.hash, password) => {
            Ok(Principal::new(username).with_roles(e.roles.iter().cloned()))
        }
        Some(_) => Err(AuthFailure::bad_password()),
        None => {
            let _ = verify_password(DECOY_HASH, password);
            Err(AuthFailure::unknown_user())
        }
    }
}

/// Credential table held in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: HashMap<String, CredentialEntry>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }

    /// Hash `password` and register it for `username`, replacing any previous entry.
    pub fn insert(&mut self, username: &str, password: &str, roles: &[&str]) -> Result<()> {
        let hash = hash_password(password)?;
        self.insert_hash(username, &hash, roles);
        Ok(())
    }

    pub fn insert_hash(&mut self, username: &str, hash: &str, roles: &[&str]) {
        let entry = CredentialEntry { hash: hash.to_string(), roles: roles.iter().map(|r| r.to_string()).collect() };
        self.entries.insert(username.to_string(), entry);
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

impl CredentialVerifier for MemoryCredentialStore {
    fn verify(&self, username: &str, password: &str) -> Result<Principal, AuthFailure> {
        check_entry(self.entries.get(username), username, password)
    }
}

/// Credential file with one `username:hash[:role,role]` entry per line.
/// Blank lines and lines starting with `#` are ignored. The file is re-read on
/// every verification so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn parse_line(line: &str) -> Option<(String, CredentialEntry)> {
        let mut parts = line.splitn(3, ':');
        let user = parts.next()?.trim();
        let hash = parts.next()?.trim();
        if user.is_empty() || hash.is_empty() { return None; }
        let roles = parts
            .next()
            .map(|r| r.split(',').map(str::trim).filter(|r| !r.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        Some((user.to_string(), CredentialEntry { hash: hash.to_string(), roles }))
    }

    fn read_entries(&self) -> std::io::Result<HashMap<String, CredentialEntry>> {
        let text = std::fs::read_to_string(&self.path)?;
        let mut out = HashMap::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') { continue; }
            match Self::parse_line(line) {
                Some((user, entry)) => { out.insert(user, entry); }
                None => warn!(target: "auth", file = %self.path.display(), line = lineno + 1, "skipping malformed credential entry"),
            }
        }
        Ok(out)
    }

    fn valid_username(username: &str) -> bool {
        !username.is_empty()
            && !username.starts_with('#')
            && !username.chars().any(|c| c == ':' || c.is_control() || c.is_whitespace())
    }

    fn valid_role(role: &str) -> bool {
        !role.trim().is_empty() && !role.chars().any(|c| c == ':' || c == ',' || c.is_control())
    }

    /// Set (or replace) the password of `username`, creating the file if needed.
    pub fn set_password(&self, username: &str, password: &str, roles: &[&str]) -> Result<()> {
        if !Self::valid_username(username) {
            return Err(anyhow!("invalid username: {:?}", username));
        }
        if let Some(bad) = roles.iter().find(|r| !Self::valid_role(r)) {
            return Err(anyhow!("invalid role: {:?}", bad));
        }
        if password.is_empty() {
            return Err(anyhow!("password must not be empty"));
        }
        let hash = hash_password(password)?;
        let existing = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };
        let mut entry = format!("{}:{}", username, hash);
        if !roles.is_empty() {
            entry.push(':');
            entry.push_str(&roles.join(","));
        }
        let mut lines: Vec<String> = existing
            .lines()
            .filter(|l| Self::parse_line(l.trim()).map(|(u, _)| u != username).unwrap_or(true))
            .map(String::from)
            .collect();
        lines.push(entry);
        let mut body = lines.join("\n");
        body.push('\n');
        std::fs::write(&self.path, body).with_context(|| format!("writing {}", self.path.display()))
    }
}

impl CredentialVerifier for FileCredentialStore {
    fn verify(&self, username: &str, password: &str) -> Result<Principal, AuthFailure> {
        match self.read_entries() {
            Ok(entries) => check_entry(entries.get(username), username, password),
            Err(e) => {
                let _ = verify_password(DECOY_HASH, password);
                Err(AuthFailure::store(format!("{}: {}", self.path.display(), e)))
            }
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod provider_tests;
