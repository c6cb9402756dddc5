//! Configuration module for environment variable parsing.
//!
//! Reads all configuration from environment variables, falling back to
//! defaults when a variable is unset or unparsable.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Postgres connection URL; the in-memory store is used when unset
    pub database_url: Option<String>,

    /// Maximum size of the Postgres connection pool
    pub database_max_connections: u32,

    /// Deadline for a single record store call in milliseconds
    pub store_timeout_ms: u64,

    /// Outbound event queue depth per real-time observer
    pub observer_buffer: usize,

    /// Whether X-Forwarded-For / X-Real-IP are trusted for client IPs
    pub trust_forwarded_headers: bool,

    /// Directory of dashboard static assets
    pub static_dir: String,

    // =========================================================================
    // Login Gate
    // =========================================================================

    /// Secret used to sign session tokens; the gate is open when unset
    pub session_secret: Option<String>,

    /// Dashboard username
    pub dashboard_username: Option<String>,

    /// Dashboard password
    pub dashboard_password: Option<String>,

    /// Session lifetime in seconds
    pub session_max_age_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_or("PORT", 3000),

            database_url: parse_optional_string("DATABASE_URL"),

            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),

            store_timeout_ms: parse_or("STORE_TIMEOUT_MS", 2000),

            observer_buffer: parse_or("OBSERVER_BUFFER", 64),

            trust_forwarded_headers: parse_bool("TRUST_FORWARDED_HEADERS", true),

            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "public".to_string()),

            session_secret: parse_optional_string("SESSION_SECRET"),

            dashboard_username: parse_optional_string("DASHBOARD_USERNAME"),

            dashboard_password: parse_optional_string("DASHBOARD_PASSWORD"),

            session_max_age_secs: parse_or("SESSION_MAX_AGE_SECS", 86_400),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Whether the dashboard login gate is active.
    pub fn login_gate_enabled(&self) -> bool {
        self.session_secret.is_some()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 3000,
            database_url: None,
            database_max_connections: 5,
            store_timeout_ms: 2000,
            observer_buffer: 64,
            trust_forwarded_headers: true,
            static_dir: "public".to_string(),
            session_secret: None,
            dashboard_username: None,
            dashboard_password: None,
            session_max_age_secs: 86_400,
        }
    }
}

/// Parse a variable, warning and using `default` when it does not parse.
fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Parse a boolean flag such as "true", "0" or "no".
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid flag, using default");
            default
        }
    }
}

/// Read a variable, treating blank values as unset.
fn parse_optional_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
