//! Access to the upstream records the engine reads and the registration
//! records it writes.
//!
//! The engine only talks to [`ObjectStore`], which keeps reconciliation
//! testable without an API server.

use std::fmt::Display;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{ApiResource, DeleteParams, DynamicObject, PostParams},
    core::GroupVersion,
    Api, Client,
};
use thiserror::Error;

use crate::api::capi_cluster::{Cluster, ControlPlaneRef};

#[cfg(test)]
pub(crate) mod memory;

/// Namespace and name of a namespaced record.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    #[error("{0} was modified concurrently")]
    Conflict(ObjectKey),

    #[error("Invalid control plane reference {0:?}")]
    InvalidReference(String),

    #[error("Kube error: {0}")]
    Kube(#[from] kube::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<Cluster>>;

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>>;

    /// UID of the referenced control plane object, `None` when it does not exist.
    async fn control_plane_uid(
        &self,
        reference: &ControlPlaneRef,
        namespace: &str,
    ) -> StoreResult<Option<String>>;

    async fn create_secret(&self, secret: &Secret) -> StoreResult<Secret>;

    /// Replace a secret, guarded by the resource version it carries.
    async fn replace_secret(&self, secret: &Secret) -> StoreResult<Secret>;

    /// Returns `false` when there was nothing to delete.
    async fn delete_secret(&self, key: &ObjectKey) -> StoreResult<bool>;
}

/// [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn status_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Key of a secret from its metadata.
pub(crate) fn secret_key(secret: &Secret) -> ObjectKey {
    ObjectKey::new(
        secret.metadata.namespace.clone().unwrap_or_default(),
        secret.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_cluster(&self, key: &ObjectKey) -> StoreResult<Option<Cluster>> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn get_secret(&self, key: &ObjectKey) -> StoreResult<Option<Secret>> {
        Ok(self.secrets(&key.namespace).get_opt(&key.name).await?)
    }

    async fn control_plane_uid(
        &self,
        reference: &ControlPlaneRef,
        namespace: &str,
    ) -> StoreResult<Option<String>> {
        let gv: GroupVersion = reference
            .api_version
            .parse()
            .map_err(|_| StoreError::InvalidReference(reference.api_version.clone()))?;
        let resource = ApiResource::from_gvk(&gv.with_kind(&reference.kind));
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        Ok(api
            .get_opt(&reference.name)
            .await?
            .and_then(|obj| obj.metadata.uid))
    }

    async fn create_secret(&self, secret: &Secret) -> StoreResult<Secret> {
        let key = secret_key(secret);
        self.secrets(&key.namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| match status_code(&e) {
                Some(409) => StoreError::AlreadyExists(key),
                _ => e.into(),
            })
    }

    async fn replace_secret(&self, secret: &Secret) -> StoreResult<Secret> {
        let key = secret_key(secret);
        self.secrets(&key.namespace)
            .replace(&key.name, &PostParams::default(), secret)
            .await
            .map_err(|e| match status_code(&e) {
                Some(409) => StoreError::Conflict(key),
                _ => e.into(),
            })
    }

    async fn delete_secret(&self, key: &ObjectKey) -> StoreResult<bool> {
        match self
            .secrets(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
