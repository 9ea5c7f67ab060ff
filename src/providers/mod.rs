//! Control plane provider resolution.
//!
//! Each supported control plane implementation stores the workload cluster
//! kubeconfig in its own secret, with its own ownership conventions. A
//! [`ProviderPolicy`] captures where that secret lives and how to recognise a
//! genuine one for a given cluster.

use std::{fmt::Display, str::FromStr};

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt as _;
use thiserror::Error;
use tracing::warn;

use crate::{
    api::capi_cluster::{Cluster, ControlPlaneRef},
    store::ObjectKey,
};

mod kubeadm;
mod managed;
mod vcluster;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProviderError {
    #[error("controlPlaneRef kind {0} unsupported")]
    UnsupportedProviderKind(String),

    #[error("cluster {0} has no controlPlaneRef")]
    MissingControlPlaneRef(ObjectKey),
}

/// Supported control plane implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    /// `KubeadmControlPlane`
    KubeadmBootstrapped,
    /// `AWSManagedControlPlane`
    ManagedControlPlane,
    /// `VCluster`
    VirtualCluster,
}

impl ProviderKind {
    pub fn control_plane_kind(&self) -> &'static str {
        match self {
            ProviderKind::KubeadmBootstrapped => kubeadm::KIND,
            ProviderKind::ManagedControlPlane => managed::KIND,
            ProviderKind::VirtualCluster => vcluster::KIND,
        }
    }

    /// Provider decision on whether the trust material in the kubeconfig is kept.
    pub fn tls_policy(&self) -> TlsPolicy {
        match self {
            ProviderKind::KubeadmBootstrapped => TlsPolicy::Preserve,
            // Both are reached through a proxied endpoint whose certificate
            // does not match the advertised CA.
            ProviderKind::ManagedControlPlane | ProviderKind::VirtualCluster => {
                TlsPolicy::Insecure
            }
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(kind: &str) -> ProviderResult<Self> {
        match kind {
            kubeadm::KIND => Ok(ProviderKind::KubeadmBootstrapped),
            managed::KIND => Ok(ProviderKind::ManagedControlPlane),
            vcluster::KIND => Ok(ProviderKind::VirtualCluster),
            other => Err(ProviderError::UnsupportedProviderKind(other.to_string())),
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.control_plane_kind())
    }
}

/// How TLS trust settings from the kubeconfig are carried into the registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsPolicy {
    Preserve,
    Insecure,
}

/// Resolve a control plane kind into its provider.
pub fn resolve(control_plane_kind: &str) -> ProviderResult<ProviderKind> {
    control_plane_kind.parse()
}

/// Locate and validate rules for the credential secret of one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub kind: ProviderKind,
    pub cluster_name: String,
    pub control_plane: ControlPlaneRef,
    /// Namespace of the control plane object and of its kubeconfig secret.
    pub namespace: String,
}

impl ProviderPolicy {
    pub fn for_cluster(cluster: &Cluster) -> ProviderResult<Self> {
        let control_plane = cluster
            .spec
            .control_plane_ref
            .clone()
            .ok_or_else(|| ProviderError::MissingControlPlaneRef(cluster.key()))?;
        let kind = resolve(&control_plane.kind)?;

        Ok(Self {
            kind,
            cluster_name: cluster.name_any(),
            namespace: cluster.control_plane_namespace().unwrap_or_default(),
            control_plane,
        })
    }

    pub fn api_version(&self) -> &str {
        &self.control_plane.api_version
    }

    /// Where the provider places the kubeconfig secret.
    pub fn locate(&self) -> ObjectKey {
        let name = match self.kind {
            ProviderKind::KubeadmBootstrapped => kubeadm::secret_name(&self.cluster_name),
            ProviderKind::ManagedControlPlane => managed::secret_name(&self.cluster_name),
            ProviderKind::VirtualCluster => vcluster::secret_name(&self.cluster_name),
        };
        ObjectKey::new(&self.namespace, name)
    }

    /// Control plane object whose UID must own the secret, if this provider
    /// checks ownership by UID.
    pub fn owner_lookup(&self) -> Option<(&ControlPlaneRef, &str)> {
        match self.kind {
            ProviderKind::KubeadmBootstrapped => Some((&self.control_plane, &self.namespace)),
            ProviderKind::ManagedControlPlane | ProviderKind::VirtualCluster => None,
        }
    }

    /// Decide whether `secret` is the kubeconfig generated for this cluster.
    ///
    /// `control_plane_uid` is the UID of the control plane object, when it
    /// was found. Unsupported API versions never validate.
    pub fn validate(&self, secret: &Secret, control_plane_uid: Option<&str>) -> bool {
        match self.kind {
            ProviderKind::KubeadmBootstrapped => match self.api_version() {
                kubeadm::API_VERSION => kubeadm::validate(self, secret, control_plane_uid),
                other => self.unsupported_version(other),
            },
            ProviderKind::ManagedControlPlane => match self.api_version() {
                managed::API_VERSION => managed::validate(self, secret),
                other => self.unsupported_version(other),
            },
            ProviderKind::VirtualCluster => match self.api_version() {
                vcluster::API_VERSION => vcluster::validate(self, secret),
                other => self.unsupported_version(other),
            },
        }
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        self.kind.tls_policy()
    }

    fn unsupported_version(&self, api_version: &str) -> bool {
        warn!(
            kind = %self.kind,
            api_version,
            cluster = %self.cluster_name,
            "APIVersion unsupported for control plane provider"
        );
        false
    }
}
