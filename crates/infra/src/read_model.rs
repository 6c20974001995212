//! Tenant-isolated key/value store for disposable read models.
//!
//! Projections persist here in tests and small deployments; production read
//! models live in schema-level tables behind the same row filter as the
//! event store. Either way the data is disposable - the event log rebuilds
//! it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use nimbus_core::TenantId;
use nimbus_tenant::{MissingTenantContext, TenantContext};

/// Tenant-isolated key/value store abstraction.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    fn remove(&self, tenant_id: TenantId, key: &K);
    /// Clear all read-model records for a tenant (rebuild support).
    fn clear_tenant(&self, tenant_id: TenantId);

    /// Lookup under the ambient tenant; fails closed without one.
    fn get_current(&self, key: &K) -> Result<Option<V>, MissingTenantContext> {
        Ok(self.get(TenantContext::require()?, key))
    }

    /// List under the ambient tenant; fails closed without one.
    fn list_current(&self) -> Result<Vec<V>, MissingTenantContext> {
        Ok(self.list(TenantContext::require()?))
    }
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) {
        (**self).remove(tenant_id, key)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory tenant-isolated store.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, key), value);
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(map) => map,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((t, _k), v)| (*t == tenant_id).then(|| v.clone()))
            .collect()
    }

    fn remove(&self, tenant_id: TenantId, key: &K) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&(tenant_id, key.clone()));
        }
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(t, _k), _v| *t != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(n: u128) -> TenantId {
        TenantId::from_uuid(uuid::Uuid::from_u128(n))
    }

    #[test]
    fn rows_are_invisible_across_tenants() {
        let store: InMemoryTenantStore<&'static str, u32> = InMemoryTenantStore::new();
        store.upsert(tenant(1), "vm-1", 10);

        assert_eq!(store.get(tenant(1), &"vm-1"), Some(10));
        assert_eq!(store.get(tenant(2), &"vm-1"), None);
        assert!(store.list(tenant(2)).is_empty());
    }

    #[test]
    fn clear_tenant_only_touches_one_tenant() {
        let store: InMemoryTenantStore<&'static str, u32> = InMemoryTenantStore::new();
        store.upsert(tenant(1), "a", 1);
        store.upsert(tenant(2), "a", 2);

        store.clear_tenant(tenant(1));
        assert!(store.list(tenant(1)).is_empty());
        assert_eq!(store.list(tenant(2)), vec![2]);
    }

    #[tokio::test]
    async fn current_tenant_lookups_fail_closed() {
        let store: InMemoryTenantStore<&'static str, u32> = InMemoryTenantStore::new();
        store.upsert(tenant(1), "a", 1);

        assert!(store.get_current(&"a").is_err());

        TenantContext::scope(async {
            let _guard = TenantContext::push(tenant(1)).unwrap();
            assert_eq!(store.get_current(&"a").unwrap(), Some(1));
            assert_eq!(store.list_current().unwrap(), vec![1]);
        })
        .await;
    }
}
