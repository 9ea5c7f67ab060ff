//! Construction of ArgoCD cluster secrets from managed cluster credentials.

use std::collections::BTreeMap;

use k8s_openapi::{api::core::v1::Secret, ByteString};
use kube::api::ObjectMeta;

use crate::{
    api::labels::{
        ARGOCD_SECRET_TYPE_CLUSTER, ARGOCD_SECRET_TYPE_LABEL, CLUSTER_NAMESPACE_ANNOTATION,
        CLUSTER_NAME_ANNOTATION, CONTROLLER_NAME, CONTROLLER_NAME_LABEL,
    },
    config::RegistrationTarget,
    credentials::{CredentialResult, NormalizedCredentials},
    store::ObjectKey,
};

pub const NAME_KEY: &str = "name";
pub const SERVER_KEY: &str = "server";
pub const CONFIG_KEY: &str = "config";

fn labels() -> BTreeMap<String, String> {
    [
        (ARGOCD_SECRET_TYPE_LABEL, ARGOCD_SECRET_TYPE_CLUSTER),
        (CONTROLLER_NAME_LABEL, CONTROLLER_NAME),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn annotations(cluster: &ObjectKey) -> BTreeMap<String, String> {
    [
        (CLUSTER_NAME_ANNOTATION, cluster.name.as_str()),
        (CLUSTER_NAMESPACE_ANNOTATION, cluster.namespace.as_str()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Desired registration record for a cluster.
pub fn synthesize(
    cluster: &ObjectKey,
    credentials: &NormalizedCredentials,
    target: &RegistrationTarget,
) -> CredentialResult<Secret> {
    let key = target.record_key(cluster);
    let data = [
        (NAME_KEY, cluster.name.clone()),
        (SERVER_KEY, credentials.host.clone()),
        (CONFIG_KEY, credentials.config_json()?),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), ByteString(v.into_bytes())))
    .collect();

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(key.name),
            namespace: Some(key.namespace),
            labels: Some(labels()),
            annotations: Some(annotations(cluster)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

fn contains_all(observed: Option<&BTreeMap<String, String>>, desired: Option<&BTreeMap<String, String>>) -> bool {
    desired.into_iter().flatten().all(|(k, v)| {
        observed.and_then(|o| o.get(k)) == Some(v)
    })
}

/// Whether the observed record has drifted from the desired one.
///
/// Labels and annotations added by other parties are tolerated.
pub fn differs(desired: &Secret, observed: &Secret) -> bool {
    desired.data != observed.data
        || !contains_all(observed.metadata.labels.as_ref(), desired.metadata.labels.as_ref())
        || !contains_all(
            observed.metadata.annotations.as_ref(),
            desired.metadata.annotations.as_ref(),
        )
}

/// Bring `observed` to the desired state, keeping its identity and resource version.
pub fn merge(desired: Secret, mut observed: Secret) -> Secret {
    observed
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .extend(desired.metadata.labels.unwrap_or_default());
    observed
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .extend(desired.metadata.annotations.unwrap_or_default());
    observed.metadata.managed_fields = None;
    observed.data = desired.data;
    observed.string_data = None;
    observed
}

/// Cluster a registration record points back to.
pub fn source_cluster(record: &Secret) -> Option<ObjectKey> {
    let labels = record.metadata.labels.as_ref()?;
    labels.get(CONTROLLER_NAME_LABEL)?;
    let annotations = record.metadata.annotations.as_ref()?;
    Some(ObjectKey::new(
        annotations.get(CLUSTER_NAMESPACE_ANNOTATION)?,
        annotations.get(CLUSTER_NAME_ANNOTATION)?,
    ))
}

/// Whether `record` was generated for `cluster`.
pub fn owned_by(record: &Secret, cluster: &ObjectKey) -> bool {
    source_cluster(record).as_ref() == Some(cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::{extract, tests::token_kubeconfig, ClusterConfig},
        providers::TlsPolicy,
    };

    fn target() -> RegistrationTarget {
        RegistrationTarget {
            namespace: "argocd".into(),
            ..Default::default()
        }
    }

    fn credentials(server: &str) -> NormalizedCredentials {
        extract(token_kubeconfig(server, "tok").as_bytes())
            .unwrap()
            .with_tls_policy(TlsPolicy::Insecure)
    }

    fn data<'a>(secret: &'a Secret, key: &str) -> &'a [u8] {
        &secret.data.as_ref().unwrap()[key].0
    }

    #[test]
    fn synthesizes_cluster_secret() {
        let cluster = ObjectKey::new("ns1", "c1");
        let secret = synthesize(&cluster, &credentials("https://h:443"), &target()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("ns1-c1"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("argocd"));
        let labels = secret.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[ARGOCD_SECRET_TYPE_LABEL], "cluster");
        assert_eq!(labels[CONTROLLER_NAME_LABEL], "capargo");
        let annotations = secret.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[CLUSTER_NAME_ANNOTATION], "c1");
        assert_eq!(annotations[CLUSTER_NAMESPACE_ANNOTATION], "ns1");

        assert_eq!(data(&secret, NAME_KEY), b"c1");
        assert_eq!(data(&secret, SERVER_KEY), b"https://h:443");
        let config: ClusterConfig = serde_json::from_slice(data(&secret, CONFIG_KEY)).unwrap();
        assert_eq!(config.bearer_token.as_deref(), Some("tok"));
        assert!(config.tls_client_config.insecure);

        assert_eq!(source_cluster(&secret), Some(cluster));
    }

    #[test]
    fn config_payload_is_byte_identical_for_identical_input() {
        let cluster = ObjectKey::new("ns1", "c1");
        let a = synthesize(&cluster, &credentials("https://h:443"), &target()).unwrap();
        let b = synthesize(&cluster, &credentials("https://h:443"), &target()).unwrap();
        assert_eq!(data(&a, CONFIG_KEY), data(&b, CONFIG_KEY));
        assert!(!differs(&a, &b));
    }

    #[test]
    fn detects_drift() {
        let cluster = ObjectKey::new("ns1", "c1");
        let desired = synthesize(&cluster, &credentials("https://h:443"), &target()).unwrap();

        let moved = synthesize(&cluster, &credentials("https://h:6443"), &target()).unwrap();
        assert!(differs(&desired, &moved));

        let mut unlabelled = desired.clone();
        unlabelled.metadata.labels = None;
        assert!(differs(&desired, &unlabelled));

        let mut decorated = desired.clone();
        decorated
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert("argocd.argoproj.io/refresh".into(), "hard".into());
        decorated.metadata.resource_version = Some("7".into());
        assert!(!differs(&desired, &decorated));
    }

    #[test]
    fn merge_keeps_identity() {
        let cluster = ObjectKey::new("ns1", "c1");
        let desired = synthesize(&cluster, &credentials("https://h:6443"), &target()).unwrap();
        let mut observed = synthesize(&cluster, &credentials("https://h:443"), &target()).unwrap();
        observed.metadata.resource_version = Some("3".into());
        observed
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("team".into(), "platform".into());

        let merged = merge(desired.clone(), observed);
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("3"));
        assert_eq!(merged.metadata.labels.as_ref().unwrap()["team"], "platform");
        assert_eq!(data(&merged, SERVER_KEY), b"https://h:6443");
        assert!(!differs(&desired, &merged));
    }

    #[test]
    fn unrelated_secrets_have_no_source() {
        assert_eq!(source_cluster(&Secret::default()), None);
    }

    #[test]
    fn ownership_follows_back_references() {
        let first = ObjectKey::new("a", "b-c");
        let second = ObjectKey::new("a-b", "c");
        let record = synthesize(&first, &credentials("https://h:443"), &target()).unwrap();
        let rival = synthesize(&second, &credentials("https://h:443"), &target()).unwrap();

        assert_eq!(record.metadata.name, rival.metadata.name);
        assert!(owned_by(&record, &first));
        assert!(!owned_by(&record, &second));

        let mut unmanaged = record.clone();
        unmanaged.metadata.labels = None;
        assert!(!owned_by(&unmanaged, &first));
    }
}
