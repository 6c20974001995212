use nimbus_core::{TenantId, UserId};

use crate::roles::Role;

/// The validated authenticated subject. Immutable after validation; the
/// tenant id here is the authoritative one for the whole unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    user_id: UserId,
    tenant_id: TenantId,
    roles: Vec<Role>,
    jti: String,
    session_id: Option<String>,
}

impl Principal {
    pub fn new(
        user_id: UserId,
        tenant_id: TenantId,
        roles: Vec<Role>,
        jti: impl Into<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            user_id,
            tenant_id,
            roles,
            jti: jti.into(),
            session_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn jti(&self) -> &str {
        &self.jti
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }
}
