//! Security error taxonomy.

use thiserror::Error;

pub use nimbus_core::error::GENERIC_DENIAL;

/// Outcome of a failed token validation.
///
/// Each variant maps to one validation layer; the variant is logged and
/// metered, never shown to callers. Use [`SecurityError::label`] for metric
/// labels and [`SecurityError::layer`] for the layer that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    // Layer 1: format
    #[error("token is empty")]
    EmptyToken,
    #[error("token contains characters outside the compact JWS alphabet")]
    InvalidFormat,
    #[error("token exceeds the configured size limit ({size} > {limit} bytes)")]
    TooLarge { size: usize, limit: usize },
    #[error("token does not have three dot-separated segments")]
    InvalidStructure,
    #[error("token segment is not valid base64url")]
    InvalidBase64,
    #[error("token header is not a JSON object")]
    MalformedHeader,
    #[error("token payload is not a JSON object")]
    MalformedPayload,

    // Layer 2: signature
    #[error("no key id in token header and key set is ambiguous")]
    MissingKeyId,
    #[error("key discovery failed: {0}")]
    KeyDiscoveryFailed(String),
    #[error("no key matches kid '{0}'")]
    UnknownKeyId(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("token could not be verified")]
    TokenUnverifiable,

    // Layer 3: algorithm
    #[error("unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    // Layer 4: claim schema
    #[error("required claim '{0}' is missing")]
    MissingClaim(&'static str),
    #[error("claim '{0}' is malformed")]
    InvalidClaimFormat(&'static str),

    // Layer 5: temporal
    #[error("token has expired")]
    TokenExpired,
    #[error("token issued in the future")]
    FutureToken,
    #[error("token not yet valid")]
    TokenNotYetValid,
    #[error("token is older than the maximum accepted age")]
    TokenTooOld,

    // Layer 6: issuer/audience
    #[error("issuer mismatch")]
    InvalidIssuer,
    #[error("audience mismatch")]
    InvalidAudience,

    // Layer 7: revocation
    #[error("token has been revoked")]
    TokenRevoked,
    #[error("revocation state could not be verified")]
    RevocationCheckFailed,

    // Layer 8: roles
    #[error("no roles assigned after normalization")]
    NoRolesAssigned,
    #[error("role validation failed: {0}")]
    RoleValidationError(String),

    // Layer 9: user status
    #[error("user is inactive")]
    UserInactive,
    #[error("user is locked")]
    UserLocked,
    #[error("user account has expired")]
    UserExpired,
    #[error("user status could not be verified")]
    UserStatusCheckFailed,

    // Layer 10: injection
    #[error("token content matched an injection pattern")]
    InjectionDetected,
}

impl SecurityError {
    /// Validation layer (1-10) that produced this error.
    pub fn layer(&self) -> u8 {
        use SecurityError::*;
        match self {
            EmptyToken | InvalidFormat | TooLarge { .. } | InvalidStructure | InvalidBase64
            | MalformedHeader | MalformedPayload => 1,
            MissingKeyId | KeyDiscoveryFailed(_) | UnknownKeyId(_) | InvalidSignature
            | TokenUnverifiable => 2,
            UnsupportedAlgorithm(_) => 3,
            MissingClaim(_) | InvalidClaimFormat(_) => 4,
            TokenExpired | FutureToken | TokenNotYetValid | TokenTooOld => 5,
            InvalidIssuer | InvalidAudience => 6,
            TokenRevoked | RevocationCheckFailed => 7,
            NoRolesAssigned | RoleValidationError(_) => 8,
            UserInactive | UserLocked | UserExpired | UserStatusCheckFailed => 9,
            InjectionDetected => 10,
        }
    }

    /// Stable metric label for this variant.
    pub fn label(&self) -> &'static str {
        use SecurityError::*;
        match self {
            EmptyToken => "empty_token",
            InvalidFormat => "invalid_format",
            TooLarge { .. } => "too_large",
            InvalidStructure => "invalid_structure",
            InvalidBase64 => "invalid_base64",
            MalformedHeader => "malformed_header",
            MalformedPayload => "malformed_payload",
            MissingKeyId => "missing_key_id",
            KeyDiscoveryFailed(_) => "key_discovery_failed",
            UnknownKeyId(_) => "unknown_key_id",
            InvalidSignature => "invalid_signature",
            TokenUnverifiable => "token_unverifiable",
            UnsupportedAlgorithm(_) => "unsupported_algorithm",
            MissingClaim(_) => "missing_claim",
            InvalidClaimFormat(_) => "invalid_claim_format",
            TokenExpired => "token_expired",
            FutureToken => "future_token",
            TokenNotYetValid => "token_not_yet_valid",
            TokenTooOld => "token_too_old",
            InvalidIssuer => "invalid_issuer",
            InvalidAudience => "invalid_audience",
            TokenRevoked => "token_revoked",
            RevocationCheckFailed => "revocation_check_failed",
            NoRolesAssigned => "no_roles_assigned",
            RoleValidationError(_) => "role_validation_error",
            UserInactive => "user_inactive",
            UserLocked => "user_locked",
            UserExpired => "user_expired",
            UserStatusCheckFailed => "user_status_check_failed",
            InjectionDetected => "injection_detected",
        }
    }
}
