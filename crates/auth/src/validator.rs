//! The ten-layer token validation pipeline.
//!
//! Layers, in evaluation order: format, algorithm pin, signature, claim
//! schema, temporal, issuer/audience, revocation, roles, user status,
//! injection. Algorithm pinning (layer 3) runs as the precondition of
//! signature verification (layer 2) because RS256 verification is
//! parameterized by the algorithm; both layers keep their own error variants
//! and metric outcomes. Every layer is metered per outcome; the first failed
//! layer terminates the pipeline.

use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use nimbus_core::{JwtConfig, TenantId, UserId};
use nimbus_observability::metrics;

use crate::claims::{Audience, RawToken, TokenClaims, TokenHeader, decode_segment, split_token};
use crate::directory::{UserDirectory, UserStatus};
use crate::error::SecurityError;
use crate::injection::InjectionScanner;
use crate::keys::{DiscoveryKeySource, Rs256Verifier, SignatureVerifier};
use crate::principal::Principal;
use crate::revocation::RevocationStore;
use crate::roles::normalize_role;

const SUPPORTED_ALGORITHM: &str = "RS256";

/// Validates bearer tokens into [`Principal`]s.
///
/// Pluggable at the seams that touch external systems: signature keys,
/// revocation state, and the user directory. Test builds substitute static
/// doubles; production wires JWKS discovery and real stores.
pub struct TokenValidator<V, R, D> {
    config: JwtConfig,
    verifier: V,
    revocations: R,
    directory: D,
    scanner: InjectionScanner,
}

impl<R, D> TokenValidator<Rs256Verifier<DiscoveryKeySource>, R, D> {
    /// Production wiring: RS256 with key-set discovery from
    /// `config.discovery_url`.
    pub fn from_config(config: JwtConfig, revocations: R, directory: D) -> Self {
        let verifier = Rs256Verifier::new(DiscoveryKeySource::new(config.discovery_url.clone()));
        Self {
            config,
            verifier,
            revocations,
            directory,
            scanner: InjectionScanner::with_defaults(),
        }
    }
}

impl<V, R, D> TokenValidator<V, R, D>
where
    V: SignatureVerifier,
    R: RevocationStore,
    D: UserDirectory,
{
    pub fn new(config: JwtConfig, verifier: V, revocations: R, directory: D) -> Self {
        Self {
            config,
            verifier,
            revocations,
            directory,
            scanner: InjectionScanner::with_defaults(),
        }
    }

    pub fn with_scanner(mut self, scanner: InjectionScanner) -> Self {
        self.scanner = scanner;
        self
    }

    /// Validate a token against the current wall clock.
    pub async fn validate(&self, token: &str) -> Result<Principal, SecurityError> {
        self.validate_at(token, Utc::now()).await
    }

    /// Validate a token against an explicit clock (deterministic testing of
    /// the temporal layer).
    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Principal, SecurityError> {
        let started = Instant::now();
        let result = self.run_layers(token, now).await;

        match &result {
            Ok(principal) => {
                metrics::incr("auth.token.validation", "accepted");
                debug!(tenant_id = %principal.tenant_id(), "token accepted");
            }
            Err(err) => {
                metrics::incr("auth.token.validation", err.label());
                warn!(layer = err.layer(), error = %err, "token rejected");
            }
        }
        metrics::observe_duration(
            "auth.token.validation.duration",
            if result.is_ok() { "accepted" } else { "rejected" },
            started.elapsed(),
        );

        result
    }

    async fn run_layers(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Principal, SecurityError> {
        // Layer 1: format.
        let raw = observe("01_format", self.layer_format(token))?;
        let header_bytes = observe("01_format", decode_segment(raw.header))?;
        let header = observe("01_format", TokenHeader::parse(&header_bytes))?;
        let payload_bytes = observe("01_format", decode_segment(raw.payload))?;
        let claims = observe("01_format", TokenClaims::parse(&payload_bytes))?;

        // Layer 3 (pin) then layer 2 (verify); see module docs for ordering.
        observe("03_algorithm", self.layer_algorithm(&header))?;
        observe("02_signature", self.verifier.verify(token, &header).await)?;

        // Layer 4: claim schema.
        let checked = observe("04_claims", self.layer_claims(&claims))?;

        // Layer 5: temporal.
        observe("05_temporal", self.layer_temporal(&checked, now))?;

        // Layer 6: issuer/audience.
        observe("06_issuer_audience", self.layer_issuer_audience(&checked))?;

        // Layer 7: revocation, fail closed on unavailability.
        observe("07_revocation", self.layer_revocation(&checked.jti).await)?;

        // Layer 8: roles.
        let roles = observe("08_roles", self.layer_roles(&claims))?;

        // Layer 9: user status.
        observe(
            "09_user_status",
            self.layer_user_status(checked.user_id).await,
        )?;

        // Layer 10: injection over the decoded content.
        observe(
            "10_injection",
            self.layer_injection(&header_bytes, &payload_bytes),
        )?;

        Ok(Principal::new(
            checked.user_id,
            checked.tenant_id,
            roles,
            checked.jti,
            claims.session_id.clone(),
        ))
    }

    fn layer_format<'t>(&self, token: &'t str) -> Result<RawToken<'t>, SecurityError> {
        if token.trim().is_empty() {
            return Err(SecurityError::EmptyToken);
        }
        if token.len() > self.config.max_token_bytes {
            return Err(SecurityError::TooLarge {
                size: token.len(),
                limit: self.config.max_token_bytes,
            });
        }
        if !token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(SecurityError::InvalidFormat);
        }
        split_token(token)
    }

    fn layer_algorithm(&self, header: &TokenHeader) -> Result<(), SecurityError> {
        if header.alg == SUPPORTED_ALGORITHM {
            Ok(())
        } else {
            Err(SecurityError::UnsupportedAlgorithm(header.alg.clone()))
        }
    }

    fn layer_claims(&self, claims: &TokenClaims) -> Result<CheckedClaims, SecurityError> {
        let sub = claims.sub.as_deref().ok_or(SecurityError::MissingClaim("sub"))?;
        let iss = claims.iss.clone().ok_or(SecurityError::MissingClaim("iss"))?;
        let aud = claims.aud.clone().ok_or(SecurityError::MissingClaim("aud"))?;
        let exp = claims.exp.ok_or(SecurityError::MissingClaim("exp"))?;
        let iat = claims.iat.ok_or(SecurityError::MissingClaim("iat"))?;
        let jti = claims.jti.clone().ok_or(SecurityError::MissingClaim("jti"))?;
        let tenant = claims
            .tenant_id
            .as_deref()
            .ok_or(SecurityError::MissingClaim("tenant_id"))?;

        let user_id =
            UserId::from_str(sub).map_err(|_| SecurityError::InvalidClaimFormat("sub"))?;
        let tenant_id = TenantId::from_str(tenant)
            .map_err(|_| SecurityError::InvalidClaimFormat("tenant_id"))?;
        if tenant_id.is_nil() {
            return Err(SecurityError::InvalidClaimFormat("tenant_id"));
        }
        if jti.trim().is_empty() {
            return Err(SecurityError::InvalidClaimFormat("jti"));
        }

        Ok(CheckedClaims {
            user_id,
            tenant_id,
            iss,
            aud,
            exp,
            iat,
            nbf: claims.nbf,
            jti,
        })
    }

    fn layer_temporal(
        &self,
        checked: &CheckedClaims,
        now: DateTime<Utc>,
    ) -> Result<(), SecurityError> {
        let now = now.timestamp();
        let skew = self.config.clock_skew_seconds;

        if now > checked.exp + skew {
            return Err(SecurityError::TokenExpired);
        }
        if checked.iat > now + skew {
            return Err(SecurityError::FutureToken);
        }
        if let Some(nbf) = checked.nbf {
            if nbf > now + skew {
                return Err(SecurityError::TokenNotYetValid);
            }
        }
        if now - checked.iat > self.config.max_age_hours * 3600 {
            return Err(SecurityError::TokenTooOld);
        }
        Ok(())
    }

    fn layer_issuer_audience(&self, checked: &CheckedClaims) -> Result<(), SecurityError> {
        if checked.iss != self.config.issuer {
            return Err(SecurityError::InvalidIssuer);
        }
        if !checked.aud.contains(&self.config.audience) {
            return Err(SecurityError::InvalidAudience);
        }
        Ok(())
    }

    async fn layer_revocation(&self, jti: &str) -> Result<(), SecurityError> {
        match self.revocations.is_revoked(jti).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(SecurityError::TokenRevoked),
            Err(err) => {
                warn!(error = %err, "revocation lookup failed; failing closed");
                Err(SecurityError::RevocationCheckFailed)
            }
        }
    }

    fn layer_roles(&self, claims: &TokenClaims) -> Result<Vec<crate::Role>, SecurityError> {
        let raw = claims.raw_roles();
        if raw.is_empty() {
            return Err(SecurityError::NoRolesAssigned);
        }

        let mut roles = Vec::with_capacity(raw.len());
        for name in raw {
            let role = normalize_role(name)
                .map_err(|err| SecurityError::RoleValidationError(err.to_string()))?;
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    async fn layer_user_status(&self, user_id: UserId) -> Result<(), SecurityError> {
        match self.directory.status(user_id).await {
            Ok(UserStatus::Active) => Ok(()),
            Ok(UserStatus::Inactive) => Err(SecurityError::UserInactive),
            Ok(UserStatus::Locked) => Err(SecurityError::UserLocked),
            Ok(UserStatus::Expired) => Err(SecurityError::UserExpired),
            Err(err) => {
                warn!(error = %err, "user status lookup failed; failing closed");
                Err(SecurityError::UserStatusCheckFailed)
            }
        }
    }

    fn layer_injection(&self, header: &[u8], payload: &[u8]) -> Result<(), SecurityError> {
        let header_text = String::from_utf8_lossy(header);
        let payload_text = String::from_utf8_lossy(payload);

        for text in [header_text, payload_text] {
            if let Some(pattern) = self.scanner.scan(&text) {
                warn!(pattern, "token content matched injection pattern");
                return Err(SecurityError::InjectionDetected);
            }
        }
        Ok(())
    }
}

/// Claims after the schema layer: all required fields present and typed.
#[derive(Debug, Clone)]
struct CheckedClaims {
    user_id: UserId,
    tenant_id: TenantId,
    iss: String,
    aud: Audience,
    exp: i64,
    iat: i64,
    nbf: Option<i64>,
    jti: String,
}

fn observe<T>(layer: &'static str, result: Result<T, SecurityError>) -> Result<T, SecurityError> {
    match &result {
        Ok(_) => metrics::incr("auth.token.layer", &format!("{layer}:ok")),
        Err(err) => metrics::incr("auth.token.layer", &format!("{layer}:{}", err.label())),
    }
    result
}
