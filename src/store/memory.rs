use std::{collections::BTreeMap, sync::Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt as _;

use super::{secret_key, ObjectKey, ObjectStore, StoreError, StoreResult};
use crate::api::capi_cluster::{Cluster, ControlPlaneRef};

/// Write operations observed by [`MemoryStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Writes {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl Writes {
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.deletes
    }
}

#[derive(Default)]
struct Inner {
    clusters: BTreeMap<ObjectKey, Cluster>,
    secrets: BTreeMap<ObjectKey, Secret>,
    control_planes: BTreeMap<ObjectKey, String>,
    writes: Writes,
    version: u64,
}

/// In-memory [`ObjectStore`] with resource version checks on replace.
#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn put_cluster(&self, cluster: Cluster) {
        let mut inner = self.inner.lock().unwrap();
        inner.clusters.insert(cluster.key(), cluster);
    }

    pub fn remove_cluster(&self, key: &ObjectKey) {
        self.inner.lock().unwrap().clusters.remove(key);
    }

    pub fn put_secret(&self, mut secret: Secret) {
        let mut inner = self.inner.lock().unwrap();
        inner.version += 1;
        secret.metadata.resource_version = Some(inner.version.to_string());
        inner.secrets.insert(secret_key(&secret), secret);
    }

    pub fn put_control_plane(&self, key: ObjectKey, uid: &str) {
        self.inner
            .lock()
            .unwrap()
            .control_planes
            .insert(key, uid.to_string());
    }

    pub fn secret(&self, key: &ObjectKey) -> Option<Secret> {
        self.inner.lock().unwrap().secrets.get(key).cloned()
    }

    pub fn secrets_in(&self, namespace: &str) -> Vec<Secret> {
        self.inner
            .lock()
            .unwrap()
            .secrets
            .values()
            .filter(|s| s.namespace().as_deref() == Some(namespace))
            .cloned()
            .collect()
    }

    pub fn writes(&self) -> Writes {
        self.inner.lock().unwrap().writes.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<Cluster>> {
        Ok(self.inner.lock().unwrap().clusters.get(key).cloned())
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        Ok(self.secret(key))
    }

    async fn control_plane_uid(
        &self,
        reference: &ControlPlaneRef,
        namespace: &str,
    ) -> StoreResult<Option<String>> {
        let key = ObjectKey::new(namespace, &reference.name);
        Ok(self.inner.lock().unwrap().control_planes.get(&key).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> StoreResult<Secret> {
        let key = secret_key(secret);
        let mut inner = self.inner.lock().unwrap();
        if inner.secrets.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        inner.version += 1;
        let mut created = secret.clone();
        created.metadata.resource_version = Some(inner.version.to_string());
        inner.secrets.insert(key, created.clone());
        inner.writes.creates += 1;
        Ok(created)
    }

    async fn replace_secret(&self, secret: &Secret) -> StoreResult<Secret> {
        let key = secret_key(secret);
        let mut inner = self.inner.lock().unwrap();
        let current = inner
            .secrets
            .get(&key)
            .and_then(|s| s.metadata.resource_version.clone());
        if current.is_none() || current != secret.metadata.resource_version {
            return Err(StoreError::Conflict(key));
        }
        inner.version += 1;
        let mut replaced = secret.clone();
        replaced.metadata.resource_version = Some(inner.version.to_string());
        inner.secrets.insert(key, replaced.clone());
        inner.writes.updates += 1;
        Ok(replaced)
    }

    async fn delete_secret(&self, key: &ObjectKey) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.secrets.remove(key).is_some();
        if removed {
            inner.writes.deletes += 1;
        }
        Ok(removed)
    }
}
