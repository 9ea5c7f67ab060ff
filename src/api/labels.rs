//! Well-known labels, annotations and secret types shared with the upstream
//! Cluster API and ArgoCD controllers.

pub const CONTROLLER_NAME: &str = "capargo";

/// Label marking a registration record as produced by this controller.
pub const CONTROLLER_NAME_LABEL: &str = "capargo.superorbital.io/controller-name";

/// Back-reference to the source cluster name.
pub const CLUSTER_NAME_ANNOTATION: &str = "capargo.superorbital.io/cluster-name";

/// Back-reference to the source cluster namespace.
pub const CLUSTER_NAMESPACE_ANNOTATION: &str = "capargo.superorbital.io/cluster-namespace";

/// Finalizer held on managed clusters until their registration record is gone.
pub const REGISTRATION_FINALIZER: &str = "capargo.superorbital.io/registration";

pub const ARGOCD_SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";
pub const ARGOCD_SECRET_TYPE_CLUSTER: &str = "cluster";

/// Label set by Cluster API on every secret it generates for a cluster.
pub const CAPI_CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Secret type Cluster API uses for generated kubeconfig secrets.
pub const CAPI_CLUSTER_SECRET_TYPE: &str = "cluster.x-k8s.io/secret";

/// Key holding the kubeconfig document inside a Cluster API kubeconfig secret.
pub const KUBECONFIG_DATA_KEY: &str = "value";
