use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt as _;
use tracing::debug;

use super::ProviderPolicy;
use crate::api::labels::{CAPI_CLUSTER_NAME_LABEL, CAPI_CLUSTER_SECRET_TYPE};
use crate::store::secret_key;

pub(super) const KIND: &str = "KubeadmControlPlane";
pub(super) const API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta1";

pub(super) fn secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

/// A kubeadm kubeconfig is a cluster secret labelled with the cluster name
/// and controlled by the `KubeadmControlPlane` of the cluster.
pub(super) fn validate(
    policy: &ProviderPolicy,
    secret: &Secret,
    control_plane_uid: Option<&str>,
) -> bool {
    let secret_ref = secret_key(secret);

    if secret.type_.as_deref() != Some(CAPI_CLUSTER_SECRET_TYPE) {
        debug!(secret = %secret_ref, secret_type = ?secret.type_, "Secret is not a cluster secret");
        return false;
    }

    let name = secret.labels().get(CAPI_CLUSTER_NAME_LABEL);
    if name != Some(&policy.cluster_name) {
        debug!(secret = %secret_ref, cluster_label = ?name, "Secret cluster name label does not contain cluster name");
        return false;
    }

    let Some(uid) = control_plane_uid else {
        debug!(secret = %secret_ref, control_plane = %policy.control_plane.name, "Could not find KubeadmControlPlane object for secret");
        return false;
    };

    let owners = secret.owner_references();
    let controlled = match owners {
        [owner] => {
            owner.controller == Some(true)
                && owner.uid == uid
                && owner.kind == KIND
                && owner.api_version == policy.api_version()
                && owner.name == policy.control_plane.name
        }
        _ => false,
    };
    if !controlled {
        debug!(secret = %secret_ref, owners = ?owners, "Secret is not owned by KubeadmControlPlane");
    }

    controlled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::tests::{cluster_with, owner, secret};

    fn policy(api_version: &str) -> ProviderPolicy {
        ProviderPolicy::for_cluster(&cluster_with(KIND, api_version, "c1-control-plane")).unwrap()
    }

    fn kcp_owner() -> k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
        owner(API_VERSION, KIND, "c1-control-plane", "kcp-uid")
    }

    const LABEL: (&str, &str) = (CAPI_CLUSTER_NAME_LABEL, "c1");

    #[test]
    fn accepts_a_kubeadm_kubeconfig() {
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[LABEL],
            vec![kcp_owner()],
        );
        assert!(policy(API_VERSION).validate(&s, Some("kcp-uid")));
    }

    #[test]
    fn rejects_invalid_kubeconfigs() {
        let p = policy(API_VERSION);

        // Missing secret type
        let s = secret("c1-kubeconfig", None, &[LABEL], vec![kcp_owner()]);
        assert!(!p.validate(&s, Some("kcp-uid")));

        // Missing label
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[],
            vec![kcp_owner()],
        );
        assert!(!p.validate(&s, Some("kcp-uid")));

        // Label for another cluster
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[(CAPI_CLUSTER_NAME_LABEL, "c2")],
            vec![kcp_owner()],
        );
        assert!(!p.validate(&s, Some("kcp-uid")));

        // No owner references
        let s = secret("c1-kubeconfig", Some(CAPI_CLUSTER_SECRET_TYPE), &[LABEL], vec![]);
        assert!(!p.validate(&s, Some("kcp-uid")));

        // Multiple owner references
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[LABEL],
            vec![kcp_owner(), owner("fake.io/v1alpha1", "Fake", "FakeObject", "fake")],
        );
        assert!(!p.validate(&s, Some("kcp-uid")));

        // Invalid owner reference
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[LABEL],
            vec![owner("fake.io/v1alpha1", "Fake", "FakeObject", "fake")],
        );
        assert!(!p.validate(&s, Some("kcp-uid")));
    }

    #[test]
    fn rejects_when_control_plane_is_missing_or_replaced() {
        let p = policy(API_VERSION);
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[LABEL],
            vec![kcp_owner()],
        );
        assert!(!p.validate(&s, None));
        assert!(!p.validate(&s, Some("another-uid")));
    }

    #[test]
    fn rejects_unsupported_api_version() {
        let p = policy("controlplane.cluster.x-k8s.io/v1alpha1");
        let s = secret(
            "c1-kubeconfig",
            Some(CAPI_CLUSTER_SECRET_TYPE),
            &[LABEL],
            vec![owner(
                "controlplane.cluster.x-k8s.io/v1alpha1",
                KIND,
                "c1-control-plane",
                "kcp-uid",
            )],
        );
        assert!(!p.validate(&s, Some("kcp-uid")));
    }
}
