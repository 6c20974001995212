//! Role identifiers and normalization.
//!
//! Both the token pipeline (layer 8) and downstream authorization normalize
//! through [`normalize_role`]; normalization is idempotent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a normalized role name.
pub const MAX_ROLE_LENGTH: usize = 256;

const ROLE_PREFIX: &str = "ROLE_";

/// A normalized role or permission authority.
///
/// Plain roles carry a single `ROLE_` prefix; authorities of the permission
/// form `a:b:...` are kept verbatim. Construction goes through
/// [`normalize_role`], so a `Role` is always in normal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a permission authority (`a:b:...`) rather than a
    /// plain role.
    pub fn is_permission(&self) -> bool {
        self.0.contains(':')
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("role name is blank")]
    Blank,
    #[error("role name is {0} characters after normalization (limit {MAX_ROLE_LENGTH})")]
    TooLong(usize),
    #[error("role name contains forbidden character '{0}'")]
    InvalidCharacter(char),
    #[error("permission authority contains an empty segment")]
    EmptySegment,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

/// Strip every leading case-insensitive `ROLE_` prefix.
fn strip_role_prefixes(mut name: &str) -> &str {
    while name.len() >= ROLE_PREFIX.len()
        && name[..ROLE_PREFIX.len()].eq_ignore_ascii_case(ROLE_PREFIX)
    {
        name = &name[ROLE_PREFIX.len()..];
    }
    name
}

/// Normalize a raw role claim.
///
/// - Outer whitespace is trimmed; blank input is rejected.
/// - Only ASCII letters, digits, `_`, `-`, `.` and `:` are accepted.
/// - Names containing `:` are permission authorities: every colon-separated
///   segment must be non-empty, and the name is returned verbatim.
/// - Otherwise all leading `ROLE_` prefixes (case-insensitive) are stripped
///   and a single `ROLE_` is restored, so `ROLE_ROLE_x` and `role_x` both
///   normalize to `ROLE_x`.
/// - The normalized name must not exceed [`MAX_ROLE_LENGTH`].
pub fn normalize_role(raw: &str) -> Result<Role, RoleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RoleError::Blank);
    }

    if let Some(bad) = trimmed.chars().find(|c| !is_allowed(*c)) {
        return Err(RoleError::InvalidCharacter(bad));
    }

    let normalized = if trimmed.contains(':') {
        if trimmed.split(':').any(str::is_empty) {
            return Err(RoleError::EmptySegment);
        }
        trimmed.to_string()
    } else {
        let stripped = strip_role_prefixes(trimmed);
        if stripped.is_empty() {
            return Err(RoleError::Blank);
        }
        format!("{ROLE_PREFIX}{stripped}")
    };

    if normalized.len() > MAX_ROLE_LENGTH {
        return Err(RoleError::TooLong(normalized.len()));
    }

    Ok(Role(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_names_gain_a_single_prefix() {
        assert_eq!(normalize_role("admin").unwrap().as_str(), "ROLE_admin");
        assert_eq!(normalize_role("ROLE_admin").unwrap().as_str(), "ROLE_admin");
        assert_eq!(normalize_role("role_admin").unwrap().as_str(), "ROLE_admin");
    }

    #[test]
    fn stacked_prefixes_collapse() {
        assert_eq!(normalize_role("ROLE_ROLE_x").unwrap().as_str(), "ROLE_x");
        assert_eq!(
            normalize_role("Role_rOlE_ROLE_ops").unwrap().as_str(),
            "ROLE_ops"
        );
    }

    #[test]
    fn prefix_only_is_blank() {
        assert_eq!(normalize_role("ROLE_"), Err(RoleError::Blank));
        assert_eq!(normalize_role("ROLE_ROLE_"), Err(RoleError::Blank));
    }

    #[test]
    fn whitespace_is_trimmed_and_blank_rejected() {
        assert_eq!(normalize_role("  admin  ").unwrap().as_str(), "ROLE_admin");
        assert_eq!(normalize_role("   "), Err(RoleError::Blank));
        assert_eq!(normalize_role(""), Err(RoleError::Blank));
    }

    #[test]
    fn permissions_are_kept_verbatim() {
        let p = normalize_role("vm:request:create").unwrap();
        assert_eq!(p.as_str(), "vm:request:create");
        assert!(p.is_permission());
    }

    #[test]
    fn permission_prefix_is_not_stripped() {
        // `ROLE_` inside an authority is payload, not a prefix to strip.
        assert_eq!(
            normalize_role("ROLE_x:read").unwrap().as_str(),
            "ROLE_x:read"
        );
    }

    #[test]
    fn empty_permission_segments_are_rejected() {
        assert_eq!(normalize_role("a::b"), Err(RoleError::EmptySegment));
        assert_eq!(normalize_role(":a"), Err(RoleError::EmptySegment));
        assert_eq!(normalize_role("a:"), Err(RoleError::EmptySegment));
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        assert_eq!(
            normalize_role("adm in"),
            Err(RoleError::InvalidCharacter(' '))
        );
        assert_eq!(
            normalize_role("admin;drop"),
            Err(RoleError::InvalidCharacter(';'))
        );
        assert_eq!(normalize_role("über"), Err(RoleError::InvalidCharacter('ü')));
    }

    #[test]
    fn length_boundary_at_256() {
        // 256 characters after normalization is accepted, 257 is not.
        let ok = format!("ROLE_{}", "a".repeat(MAX_ROLE_LENGTH - ROLE_PREFIX.len()));
        assert_eq!(normalize_role(&ok).unwrap().as_str().len(), 256);

        let long = format!("ROLE_{}", "a".repeat(MAX_ROLE_LENGTH - ROLE_PREFIX.len() + 1));
        assert_eq!(normalize_role(&long), Err(RoleError::TooLong(257)));

        // Permission authorities are kept verbatim, so the cap applies to
        // the raw length.
        let permission = format!("a:{}", "p".repeat(MAX_ROLE_LENGTH - 2));
        assert_eq!(normalize_role(&permission).unwrap().as_str().len(), 256);

        let too_long = format!("a:{}", "p".repeat(MAX_ROLE_LENGTH - 1));
        assert_eq!(normalize_role(&too_long), Err(RoleError::TooLong(257)));
    }

    #[test]
    fn normalization_is_idempotent_on_samples() {
        for raw in ["admin", "ROLE_ROLE_x", "vm:request:create", "  ops  "] {
            let once = normalize_role(raw).unwrap();
            let twice = normalize_role(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "[A-Za-z0-9_.:-]{1,64}") {
            if let Ok(once) = normalize_role(&raw) {
                let twice = normalize_role(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
