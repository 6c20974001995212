//! Deterministic projection replay with cursor tracking.
//!
//! Read models are disposable; events are the source of truth. The runner
//! enforces tenant consistency and monotonic versions while folding, without
//! making storage assumptions.

use nimbus_core::TenantId;

use crate::{EventEnvelope, Projection};

/// Tracks replay progress for a single tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProjectionCursor {
    tenant_id: TenantId,
    last_version: u64,
}

impl ProjectionCursor {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn last_version(&self) -> u64 {
        self.last_version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    /// The envelope carries no tenant; tenantless events never reach
    /// projections.
    MissingTenant,
    TenantMismatch { expected: TenantId, found: TenantId },
    NonMonotonicVersion { last: u64, found: u64 },
}

/// Runs envelopes through a projection and tracks progress.
#[derive(Debug)]
pub struct ProjectionRunner<P>
where
    P: Projection,
{
    projection: P,
    cursor: Option<ProjectionCursor>,
}

impl<P> ProjectionRunner<P>
where
    P: Projection,
{
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            cursor: None,
        }
    }

    /// Create a runner pinned to a specific tenant, so it cannot be started
    /// with an event from the wrong tenant.
    pub fn new_for_tenant(tenant_id: TenantId, projection: P) -> Self {
        Self {
            projection,
            cursor: Some(ProjectionCursor {
                tenant_id,
                last_version: 0,
            }),
        }
    }

    pub fn projection(&self) -> &P {
        &self.projection
    }

    pub fn into_projection(self) -> P {
        self.projection
    }

    /// Current cursor for this projection (if any envelopes were applied).
    pub fn cursor(&self) -> Option<ProjectionCursor> {
        self.cursor
    }

    /// Apply a single envelope, enforcing tenant consistency and monotonic
    /// versions.
    pub fn apply(&mut self, envelope: &EventEnvelope<P::Ev>) -> Result<(), ReplayError> {
        let found_tenant = envelope.tenant_id().ok_or(ReplayError::MissingTenant)?;
        let found_version = envelope.version();

        match self.cursor {
            None => {
                self.projection.apply(envelope);
                self.cursor = Some(ProjectionCursor {
                    tenant_id: found_tenant,
                    last_version: found_version,
                });
                Ok(())
            }
            Some(mut cursor) => {
                if cursor.tenant_id != found_tenant {
                    return Err(ReplayError::TenantMismatch {
                        expected: cursor.tenant_id,
                        found: found_tenant,
                    });
                }
                if found_version <= cursor.last_version {
                    return Err(ReplayError::NonMonotonicVersion {
                        last: cursor.last_version,
                        found: found_version,
                    });
                }

                self.projection.apply(envelope);
                cursor.last_version = found_version;
                self.cursor = Some(cursor);
                Ok(())
            }
        }
    }

    /// Apply many envelopes in order.
    pub fn run<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(), ReplayError>
    where
        P::Ev: 'a,
    {
        for envelope in envelopes {
            self.apply(envelope)?;
        }
        Ok(())
    }

    /// Rebuild a projection from scratch by replaying the full history.
    pub fn rebuild_from_scratch<'a>(
        factory: impl FnOnce() -> P,
        envelopes: impl IntoIterator<Item = &'a EventEnvelope<P::Ev>>,
    ) -> Result<(P, Option<ProjectionCursor>), ReplayError>
    where
        P::Ev: 'a,
    {
        let mut runner = ProjectionRunner::new(factory());
        runner.run(envelopes)?;
        Ok((runner.projection, runner.cursor))
    }
}
