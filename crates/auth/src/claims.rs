//! Compact-JWS splitting and claim models.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

use crate::error::SecurityError;

/// The three dot-separated segments of a compact JWS, unverified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawToken<'a> {
    pub header: &'a str,
    pub payload: &'a str,
    /// May be empty for unsigned tokens; those are rejected by the algorithm
    /// layer, not here.
    pub signature: &'a str,
}

/// Split a token into its segments. Header and payload must be non-empty.
pub fn split_token(token: &str) -> Result<RawToken<'_>, SecurityError> {
    let mut parts = token.split('.');
    let (header, payload, signature) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s)) => (h, p, s),
        _ => return Err(SecurityError::InvalidStructure),
    };
    if parts.next().is_some() || header.is_empty() || payload.is_empty() {
        return Err(SecurityError::InvalidStructure);
    }
    Ok(RawToken {
        header,
        payload,
        signature,
    })
}

/// Decode one base64url (unpadded) segment.
pub fn decode_segment(segment: &str) -> Result<Vec<u8>, SecurityError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| SecurityError::InvalidBase64)
}

/// JOSE header fields the validator inspects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

impl TokenHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, SecurityError> {
        serde_json::from_slice(bytes).map_err(|_| SecurityError::MalformedHeader)
    }
}

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Payload claims, all optional at parse time: presence is the claim-schema
/// layer's job, so that it can name the missing claim precisely.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Direct role list.
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// Keycloak-style nested role list; used when `roles` is absent.
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    #[serde(default, alias = "session_state")]
    pub session_id: Option<String>,
}

impl TokenClaims {
    pub fn parse(bytes: &[u8]) -> Result<Self, SecurityError> {
        serde_json::from_slice(bytes).map_err(|_| SecurityError::MalformedPayload)
    }

    /// The raw role claims, from `roles` or `realm_access.roles`.
    pub fn raw_roles(&self) -> &[String] {
        if let Some(roles) = &self.roles {
            return roles;
        }
        if let Some(realm) = &self.realm_access {
            return &realm.roles;
        }
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_three_segments() {
        let raw = split_token("aaa.bbb.ccc").unwrap();
        assert_eq!(raw.header, "aaa");
        assert_eq!(raw.payload, "bbb");
        assert_eq!(raw.signature, "ccc");
    }

    #[test]
    fn empty_signature_segment_is_tolerated_here() {
        // `alg=none` tokens end with a dot; the algorithm layer rejects them.
        let raw = split_token("aaa.bbb.").unwrap();
        assert_eq!(raw.signature, "");
    }

    #[test]
    fn wrong_segment_counts_are_rejected() {
        assert_eq!(
            split_token("aaa.bbb"),
            Err(SecurityError::InvalidStructure)
        );
        assert_eq!(
            split_token("aaa.bbb.ccc.ddd"),
            Err(SecurityError::InvalidStructure)
        );
        assert_eq!(split_token(".bbb.ccc"), Err(SecurityError::InvalidStructure));
    }

    #[test]
    fn audience_matches_string_or_list() {
        let one = Audience::One("nimbus-api".into());
        assert!(one.contains("nimbus-api"));
        assert!(!one.contains("other"));

        let many = Audience::Many(vec!["a".into(), "nimbus-api".into()]);
        assert!(many.contains("nimbus-api"));
        assert!(!many.contains("b"));
    }

    #[test]
    fn realm_access_roles_are_a_fallback() {
        let claims: TokenClaims = serde_json::from_str(
            r#"{"realm_access":{"roles":["operator"]}}"#,
        )
        .unwrap();
        assert_eq!(claims.raw_roles(), ["operator".to_string()]);

        let direct: TokenClaims =
            serde_json::from_str(r#"{"roles":["admin"],"realm_access":{"roles":["x"]}}"#).unwrap();
        assert_eq!(direct.raw_roles(), ["admin".to_string()]);
    }
}
