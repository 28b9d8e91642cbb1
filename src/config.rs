//! Gateway configuration from `SESSIONGATE_*` environment variables.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid { key: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind: IpAddr,
    pub http_port: u16,
    /// Credential file, one `username:hash` entry per line.
    pub users_file: PathBuf,
    pub session_idle: Duration,
    /// None disables the background sweeper; expiry then happens on access only.
    pub sweep_interval: Option<Duration>,
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub verify_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 8080,
            users_file: PathBuf::from("users"),
            session_idle: Duration::from_secs(30 * 60),
            sweep_interval: Some(Duration::from_secs(60)),
            cookie_name: "sessiongate.session".to_string(),
            cookie_secure: true,
            verify_timeout: Duration::from_millis(5000),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid { key, value: raw.to_string(), reason: e.to_string() })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { key, value: raw.to_string(), reason: "expected a boolean".into() }),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = lookup("SESSIONGATE_BIND") { cfg.bind = parse("SESSIONGATE_BIND", &v)?; }
        if let Some(v) = lookup("SESSIONGATE_HTTP_PORT") { cfg.http_port = parse("SESSIONGATE_HTTP_PORT", &v)?; }
        if let Some(v) = lookup("SESSIONGATE_USERS_FILE") { cfg.users_file = PathBuf::from(v); }
        if let Some(v) = lookup("SESSIONGATE_SESSION_IDLE_SECS") {
            let secs: u64 = parse("SESSIONGATE_SESSION_IDLE_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::Invalid { key: "SESSIONGATE_SESSION_IDLE_SECS", value: v, reason: "must be positive".into() });
            }
            cfg.session_idle = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("SESSIONGATE_SWEEP_INTERVAL_SECS") {
            let secs: u64 = parse("SESSIONGATE_SWEEP_INTERVAL_SECS", &v)?;
            cfg.sweep_interval = if secs == 0 { None } else { Some(Duration::from_secs(secs)) };
        }
        if let Some(v) = lookup("SESSIONGATE_COOKIE_NAME") {
            let valid = !v.is_empty() && v.chars().all(|c| c.is_ascii_alphanumeric() || "._-".contains(c));
            if !valid {
                return Err(ConfigError::Invalid { key: "SESSIONGATE_COOKIE_NAME", value: v, reason: "expected [A-Za-z0-9._-]+".into() });
            }
            cfg.cookie_name = v;
        }
        if let Some(v) = lookup("SESSIONGATE_COOKIE_SECURE") { cfg.cookie_secure = parse_bool("SESSIONGATE_COOKIE_SECURE", &v)?; }
        if let Some(v) = lookup("SESSIONGATE_VERIFY_TIMEOUT_MS") {
            let ms: u64 = parse("SESSIONGATE_VERIFY_TIMEOUT_MS", &v)?;
            if ms == 0 {
                return Err(ConfigError::Invalid { key: "SESSIONGATE_VERIFY_TIMEOUT_MS", value: v, reason: "must be positive".into() });
            }
            cfg.verify_timeout = Duration::from_millis(ms);
        }
        Ok(cfg)
    }
}
