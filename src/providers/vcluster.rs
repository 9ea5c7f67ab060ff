use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use super::ProviderPolicy;
use crate::store::secret_key;

pub(super) const KIND: &str = "VCluster";
pub(super) const API_VERSION: &str = "infrastructure.cluster.x-k8s.io/v1alpha1";

pub(super) fn secret_name(cluster: &str) -> String {
    format!("{cluster}-kubeconfig")
}

/// The vcluster provider sets no owner references, so only placement and
/// naming are checked.
pub(super) fn validate(policy: &ProviderPolicy, secret: &Secret) -> bool {
    let secret_ref = secret_key(secret);

    if secret_ref.namespace != policy.namespace {
        debug!(secret = %secret_ref, vcluster_namespace = %policy.namespace, "Secret is not in the same namespace as VCluster");
        return false;
    }

    if secret_ref.name != secret_name(&policy.cluster_name) {
        debug!(secret = %secret_ref, "Secret does not match '*-kubeconfig' pattern");
        return false;
    }

    true
}
