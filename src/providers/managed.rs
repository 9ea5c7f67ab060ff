use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt as _;
use tracing::debug;

use super::ProviderPolicy;
use crate::api::labels::CAPI_CLUSTER_SECRET_TYPE;
use crate::store::secret_key;

pub(super) const KIND: &str = "AWSManagedControlPlane";
pub(super) const API_VERSION: &str = "controlplane.cluster.x-k8s.io/v1beta2";

pub(super) fn secret_name(cluster: &str) -> String {
    format!("{cluster}-user-kubeconfig")
}

/// The managed control plane publishes a user kubeconfig next to the
/// control plane object, owned by that object alone.
pub(super) fn validate(policy: &ProviderPolicy, secret: &Secret) -> bool {
    let secret_ref = secret_key(secret);

    if secret.type_.as_deref() != Some(CAPI_CLUSTER_SECRET_TYPE) {
        debug!(secret = %secret_ref, "Secret is not a cluster secret");
        return false;
    }

    let owner = match secret.owner_references() {
        [owner] => owner,
        owners => {
            debug!(secret = %secret_ref, count = owners.len(), "Secret has incorrect number of owner references");
            return false;
        }
    };
    if owner.kind != KIND {
        debug!(secret = %secret_ref, owner_kind = %owner.kind, "Secret not owned by AWSManagedControlPlane");
        return false;
    }

    if secret_ref.namespace != policy.namespace {
        debug!(secret = %secret_ref, control_plane_namespace = %policy.namespace, "Secret is not in the same namespace as AWSManagedControlPlane");
        return false;
    }

    if secret_ref.name != secret_name(&policy.cluster_name) {
        debug!(secret = %secret_ref, "Secret does not match '<cluster>-user-kubeconfig' pattern");
        return false;
    }

    true
}
