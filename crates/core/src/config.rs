//! Framework configuration.
//!
//! Plain serde structs; loading (files, env) is an application concern.

use serde::Deserialize;

/// Token validation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtConfig {
    /// Expected issuer, exact string match.
    pub issuer: String,
    /// Expected audience, exact string match.
    pub audience: String,
    /// Key-set discovery endpoint (JWKS URL).
    pub discovery_url: String,
    /// Hard cap on the raw token size in bytes.
    #[serde(default = "default_max_token_bytes")]
    pub max_token_bytes: usize,
    /// Allowed clock skew for temporal checks.
    #[serde(default = "default_clock_skew_seconds")]
    pub clock_skew_seconds: i64,
    /// Maximum accepted token age, measured from `iat`.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
}

/// Event-chain settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventsConfig {
    /// Per-tenant delivery ceiling enforced by the event chain.
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u32,
}

/// Storage-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TenantConfig {
    /// Session variable the row-level filter predicate reads.
    #[serde(default = "default_session_variable")]
    pub session_variable: String,
}

/// Aggregated framework configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameworkConfig {
    pub jwt: JwtConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub tenant: TenantConfig,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_second: default_rate_limit_per_second(),
        }
    }
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            session_variable: default_session_variable(),
        }
    }
}

impl JwtConfig {
    /// Convenience constructor with all defaults applied.
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        discovery_url: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            discovery_url: discovery_url.into(),
            max_token_bytes: default_max_token_bytes(),
            clock_skew_seconds: default_clock_skew_seconds(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

fn default_max_token_bytes() -> usize {
    8192
}

fn default_clock_skew_seconds() -> i64 {
    60
}

fn default_max_age_hours() -> i64 {
    24
}

fn default_rate_limit_per_second() -> u32 {
    100
}

fn default_session_variable() -> String {
    "app.current_tenant".to_string()
}
