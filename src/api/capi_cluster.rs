use kube::{CustomResource, Resource as _, ResourceExt as _};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::store::ObjectKey;

pub static CONTROLPLANE_READY_CONDITION: &str = "ControlPlaneReady";

/// Read-only view of the Cluster API `Cluster` resource.
///
/// Only the fields needed to locate the cluster credentials are modelled,
/// everything else in the upstream schema is ignored on deserialization.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters"
)]
#[kube(namespaced)]
#[kube(status = "ClusterStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ControlPlaneRef>,
}

/// Reference to the object implementing the cluster control plane.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneRef {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ready: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<ClusterCondition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Cluster API v1beta1 condition. Reason and message are frequently omitted
/// upstream, so this is not the core `meta/v1` condition type.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Cluster {
    /// A cluster is ready once its control plane reports ready, either through
    /// the `controlPlaneReady` flag or the `ControlPlaneReady` condition.
    pub fn cluster_ready(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        let cp_ready = status.control_plane_ready.is_some_and(|ready| ready);
        let ready_condition = status.conditions.iter().flatten().any(|c| {
            c.type_ == CONTROLPLANE_READY_CONDITION && c.status == "True"
        });

        cp_ready || ready_condition
    }

    pub fn is_deleting(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace().unwrap_or_default(), self.name_any())
    }

    /// Namespace the control plane object lives in, defaulting to the cluster namespace.
    pub fn control_plane_namespace(&self) -> Option<String> {
        self.spec
            .control_plane_ref
            .as_ref()
            .and_then(|r| r.namespace.clone())
            .or_else(|| self.namespace())
    }
}
