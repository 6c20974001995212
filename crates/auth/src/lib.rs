//! Token validation and principal derivation.
//!
//! The validator runs a ten-layer pipeline over inbound bearer tokens and
//! produces the authoritative [`Principal`] whose tenant id drives every
//! other subsystem. All failures collapse to one generic user-facing message
//! at the ingress boundary; the specific [`SecurityError`] variant stays in
//! logs and metrics.

pub mod claims;
pub mod directory;
pub mod error;
pub mod injection;
pub mod keys;
pub mod principal;
pub mod revocation;
pub mod roles;
pub mod validator;

pub use claims::{TokenClaims, TokenHeader};
pub use directory::{DirectoryUnavailable, StaticUserDirectory, UserDirectory, UserStatus};
pub use error::{GENERIC_DENIAL, SecurityError};
pub use injection::InjectionScanner;
pub use keys::{
    DiscoveryKeySource, KeySource, Rs256Verifier, SignatureVerifier, StaticKeySource,
    StaticSignatureVerifier,
};
pub use principal::Principal;
pub use revocation::{
    InMemoryRevocationStore, RevocationStore, RevocationUnavailable, UnavailableRevocationStore,
};
pub use roles::{MAX_ROLE_LENGTH, Role, RoleError, normalize_role};
pub use validator::TokenValidator;
