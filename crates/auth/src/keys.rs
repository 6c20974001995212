//! Signature keys: JWKS discovery and RS256 verification.

use std::collections::HashSet;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::claims::TokenHeader;
use crate::error::SecurityError;

/// One key from a discovered key set. Only RSA signature keys are relevant;
/// everything else is ignored during lookup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

impl Jwk {
    fn is_rsa_signature_key(&self) -> bool {
        self.kty == "RSA"
            && self.key_use.as_deref().map(|u| u == "sig").unwrap_or(true)
            && self.n.is_some()
            && self.e.is_some()
    }

    fn decoding_key(&self) -> Result<DecodingKey, SecurityError> {
        let (Some(n), Some(e)) = (&self.n, &self.e) else {
            return Err(SecurityError::KeyDiscoveryFailed(
                "RSA key without modulus/exponent".to_string(),
            ));
        };
        DecodingKey::from_rsa_components(n, e)
            .map_err(|err| SecurityError::KeyDiscoveryFailed(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Resolve a key by `kid`. Without a `kid`, a set with exactly one RSA
    /// signature key is unambiguous; anything else is rejected.
    fn resolve(&self, kid: Option<&str>) -> Result<DecodingKey, SecurityError> {
        let candidates: Vec<&Jwk> = self
            .keys
            .iter()
            .filter(|k| k.is_rsa_signature_key())
            .collect();

        match kid {
            Some(kid) => candidates
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid))
                .ok_or_else(|| SecurityError::UnknownKeyId(kid.to_string()))?
                .decoding_key(),
            None => match candidates.as_slice() {
                [only] => only.decoding_key(),
                _ => Err(SecurityError::MissingKeyId),
            },
        }
    }
}

/// Source of verification keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, SecurityError>;
}

#[async_trait]
impl<S> KeySource for std::sync::Arc<S>
where
    S: KeySource + ?Sized,
{
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, SecurityError> {
        (**self).decoding_key(kid).await
    }
}

/// JWKS endpoint client with an in-process cache.
///
/// The cache is refreshed on lookup misses, which also covers issuer key
/// rotation: an unknown `kid` triggers one refetch before the token is
/// rejected.
pub struct DiscoveryKeySource {
    url: String,
    client: reqwest::Client,
    cache: RwLock<Option<JwkSet>>,
}

impl DiscoveryKeySource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    async fn cached(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let cache = self.cache.read().await;
        cache.as_ref().and_then(|set| set.resolve(kid).ok())
    }

    async fn refresh(&self) -> Result<(), SecurityError> {
        let set: JwkSet = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| SecurityError::KeyDiscoveryFailed(err.to_string()))?
            .error_for_status()
            .map_err(|err| SecurityError::KeyDiscoveryFailed(err.to_string()))?
            .json()
            .await
            .map_err(|err| SecurityError::KeyDiscoveryFailed(err.to_string()))?;

        debug!(url = %self.url, keys = set.keys.len(), "refreshed JWKS");
        *self.cache.write().await = Some(set);
        Ok(())
    }
}

#[async_trait]
impl KeySource for DiscoveryKeySource {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, SecurityError> {
        if let Some(key) = self.cached(kid).await {
            return Ok(key);
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        match cache.as_ref() {
            Some(set) => set.resolve(kid),
            None => Err(SecurityError::KeyDiscoveryFailed(
                "key set unavailable after refresh".to_string(),
            )),
        }
    }
}

/// Fixed key set, for tests and air-gapped deployments.
pub struct StaticKeySource {
    keys: Vec<(Option<String>, DecodingKey)>,
}

impl StaticKeySource {
    pub fn new(keys: Vec<(Option<String>, DecodingKey)>) -> Self {
        Self { keys }
    }

    pub fn single(key: DecodingKey) -> Self {
        Self {
            keys: vec![(None, key)],
        }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, SecurityError> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|(k, _)| k.as_deref() == Some(kid))
                .map(|(_, key)| key.clone())
                .ok_or_else(|| SecurityError::UnknownKeyId(kid.to_string())),
            None => match self.keys.as_slice() {
                [(_, only)] => Ok(only.clone()),
                _ => Err(SecurityError::MissingKeyId),
            },
        }
    }
}

/// Verifies the token signature (layer 2). The algorithm has already been
/// pinned to RS256 by the time this runs.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, token: &str, header: &TokenHeader) -> Result<(), SecurityError>;
}

#[async_trait]
impl<S> SignatureVerifier for std::sync::Arc<S>
where
    S: SignatureVerifier + ?Sized,
{
    async fn verify(&self, token: &str, header: &TokenHeader) -> Result<(), SecurityError> {
        (**self).verify(token, header).await
    }
}

/// RS256 verification against a [`KeySource`].
pub struct Rs256Verifier<K> {
    keys: K,
}

impl<K> Rs256Verifier<K> {
    pub fn new(keys: K) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl<K> SignatureVerifier for Rs256Verifier<K>
where
    K: KeySource,
{
    async fn verify(&self, token: &str, header: &TokenHeader) -> Result<(), SecurityError> {
        let key = self.keys.decoding_key(header.kid.as_deref()).await?;

        // Claim checks are the later layers' job; this only proves the
        // signature.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        match jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "token signature verification failed");
                match err.kind() {
                    ErrorKind::InvalidSignature => Err(SecurityError::InvalidSignature),
                    ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                        Err(SecurityError::UnsupportedAlgorithm(header.alg.clone()))
                    }
                    _ => Err(SecurityError::TokenUnverifiable),
                }
            }
        }
    }
}

/// Verifier with a fixed outcome, for exercising the pipeline without an
/// RSA keypair (mirrors the in-memory store/bus test doubles).
#[derive(Debug, Clone, Default)]
pub struct StaticSignatureVerifier {
    failure: Option<SecurityError>,
}

impl StaticSignatureVerifier {
    pub fn accepting() -> Self {
        Self { failure: None }
    }

    pub fn rejecting(error: SecurityError) -> Self {
        Self {
            failure: Some(error),
        }
    }
}

#[async_trait]
impl SignatureVerifier for StaticSignatureVerifier {
    async fn verify(&self, _token: &str, _header: &TokenHeader) -> Result<(), SecurityError> {
        match &self.failure {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }
}
