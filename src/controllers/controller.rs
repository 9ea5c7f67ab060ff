use crate::api::capi_cluster::Cluster;
use crate::api::labels::{CAPI_CLUSTER_NAME_LABEL, REGISTRATION_FINALIZER};
use crate::config::Requeue;
use crate::metrics::Diagnostics;
use crate::registration::source_cluster;
use crate::{telemetry, Error, Metrics};
use chrono::Utc;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::events::{Event, EventType};
use kube::runtime::finalizer;
use kube::runtime::reflector::ObjectRef;
use kube::{api::Api, client::Client, runtime::controller::Action, Resource, ResourceExt};

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{self, debug, instrument, warn};

use super::cluster::{ClusterRegistrar, SyncOutcome};
use super::SyncError;

const KUBECONFIG_SUFFIX: &str = "-kubeconfig";
const USER_KUBECONFIG_SUFFIX: &str = "-user-kubeconfig";

// Context for the reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Registration engine
    pub registrar: ClusterRegistrar,
    /// Diagnostoics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prom metrics
    pub metrics: Metrics,
}

impl Context {
    async fn record(&self, cluster: &Cluster, outcome: SyncOutcome) {
        self.metrics.record_outcome(outcome);
        self.diagnostics.write().await.last_outcome = Some(outcome.as_str());

        let record = self.registrar.target().record_key(&cluster.key());
        let (reason, action, note) = match outcome {
            SyncOutcome::Created => ("Registered", "Creating", "Created"),
            SyncOutcome::Updated => ("Updated", "Updating", "Updated"),
            SyncOutcome::Removed => ("Unregistered", "Deleting", "Deleted"),
            _ => return,
        };

        let published = self
            .diagnostics
            .read()
            .await
            .recorder(self.client.clone())
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.into(),
                    note: Some(format!("{note} ArgoCD cluster secret `{record}`")),
                    action: action.into(),
                    secondary: None,
                },
                &cluster.object_ref(&()),
            )
            .await;
        if let Err(e) = published {
            warn!("Failed to publish event: {e}");
        }
    }
}

/// Reconcile a cluster into its ArgoCD registration.
///
/// The finalizer keeps the cluster around until its registration is gone.
#[instrument(skip_all, fields(trace_id = display(telemetry::get_trace_id()), name = cluster.name_any(), namespace = cluster.namespace()), err)]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> crate::Result<Action> {
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let namespace = cluster.namespace().unwrap_or_default();
    let api: Api<Cluster> = Api::namespaced(ctx.client.clone(), namespace.as_str());
    let key = cluster.key();
    debug!("Reconciling");

    finalizer(&api, REGISTRATION_FINALIZER, cluster, |event| async {
        let (outcome, cluster) = match event {
            finalizer::Event::Apply(c) => (ctx.registrar.reconcile(&key).await?, c),
            finalizer::Event::Cleanup(c) => (ctx.registrar.remove(&key).await?, c),
        };
        ctx.record(&cluster, outcome).await;

        Ok::<_, SyncError>(
            outcome
                .requeue_after(ctx.registrar.requeue())
                .map_or_else(Action::await_change, Action::requeue),
        )
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_failure(&cluster, error);
    retry_action(error, ctx.registrar.requeue())
}

/// Transient failures retry after a delay, the rest wait for an upstream change.
pub fn retry_action(error: &Error, requeue: &Requeue) -> Action {
    if error.is_transient() {
        Action::requeue(requeue.retry)
    } else {
        Action::await_change()
    }
}

/// Cluster a credential secret belongs to, by label or by conventional name.
///
/// Only metadata is inspected, so this also maps partial objects from a
/// metadata watch.
pub fn map_credential_secret<K: ResourceExt>(secret: K) -> Option<ObjectRef<Cluster>> {
    let namespace = secret.namespace()?;
    let cluster = match secret.labels().get(CAPI_CLUSTER_NAME_LABEL) {
        Some(cluster) => cluster.clone(),
        None => {
            let name = secret.name_any();
            name.strip_suffix(USER_KUBECONFIG_SUFFIX)
                .or_else(|| name.strip_suffix(KUBECONFIG_SUFFIX))
                .filter(|cluster| !cluster.is_empty())?
                .to_string()
        }
    };

    Some(ObjectRef::new(&cluster).within(&namespace))
}

/// Cluster a registration record was generated for.
pub fn map_registration(secret: Secret) -> Option<ObjectRef<Cluster>> {
    let cluster = source_cluster(&secret)?;
    Some(ObjectRef::new(&cluster.name).within(&cluster.namespace))
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, marker::PhantomData, time::Duration};

    use kube::{api::ObjectMeta, core::PartialObjectMeta};

    use super::*;
    use crate::{
        api::labels::{
            CLUSTER_NAMESPACE_ANNOTATION, CLUSTER_NAME_ANNOTATION, CONTROLLER_NAME,
            CONTROLLER_NAME_LABEL,
        },
        providers::ProviderError,
        store::{ObjectKey, StoreError},
    };

    fn secret(name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) -> Secret {
        let map = |pairs: &[(&str, &str)]| {
            Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            )
        };
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ns1".into()),
                labels: map(labels),
                annotations: map(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn cluster_ref(name: &str, namespace: &str) -> Option<ObjectRef<Cluster>> {
        Some(ObjectRef::new(name).within(namespace))
    }

    #[test]
    fn credential_secrets_map_to_clusters() {
        assert_eq!(
            map_credential_secret(secret("c1-kubeconfig", &[], &[])),
            cluster_ref("c1", "ns1")
        );
        assert_eq!(
            map_credential_secret(secret("eks-user-kubeconfig", &[], &[])),
            cluster_ref("eks", "ns1")
        );
        assert_eq!(
            map_credential_secret(secret(
                "anything",
                &[(CAPI_CLUSTER_NAME_LABEL, "c2")],
                &[]
            )),
            cluster_ref("c2", "ns1")
        );
        assert_eq!(map_credential_secret(secret("c1-ca", &[], &[])), None);
        assert_eq!(map_credential_secret(secret("-kubeconfig", &[], &[])), None);
    }

    #[test]
    fn credential_metadata_maps_to_clusters() {
        let partial = |secret: Secret| PartialObjectMeta::<Secret> {
            types: None,
            metadata: secret.metadata,
            _phantom: PhantomData,
        };
        assert_eq!(
            map_credential_secret(partial(secret("c1-kubeconfig", &[], &[]))),
            cluster_ref("c1", "ns1")
        );
        assert_eq!(
            map_credential_secret(partial(secret(
                "anything",
                &[(CAPI_CLUSTER_NAME_LABEL, "c2")],
                &[]
            ))),
            cluster_ref("c2", "ns1")
        );
        assert_eq!(map_credential_secret(partial(secret("tls", &[], &[]))), None);
    }

    #[test]
    fn only_transient_errors_retry() {
        let requeue = Requeue {
            not_ready: Duration::from_secs(10),
            retry: Duration::from_secs(15),
        };

        let timeout: Error = SyncError::Timeout {
            operation: "get cluster",
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(
            retry_action(&timeout, &requeue),
            Action::requeue(Duration::from_secs(15))
        );

        let cleanup = Error::FinalizerError(Box::new(finalizer::Error::CleanupFailed(
            SyncError::Delete(StoreError::Conflict(ObjectKey::new("argocd", "ns1-c1"))),
        )));
        assert_eq!(
            retry_action(&cleanup, &requeue),
            Action::requeue(Duration::from_secs(15))
        );

        let unsupported: Error =
            SyncError::Provider(ProviderError::UnsupportedProviderKind("Foo".into())).into();
        assert_eq!(retry_action(&unsupported, &requeue), Action::await_change());

        let foreign: Error = SyncError::ForeignRecord {
            record: ObjectKey::new("argocd", "a-b-c"),
            owner: Some(ObjectKey::new("a", "b-c")),
        }
        .into();
        assert_eq!(retry_action(&foreign, &requeue), Action::await_change());
    }

    #[test]
    fn registrations_map_to_source_clusters() {
        let record = secret(
            "ns1-c1",
            &[(CONTROLLER_NAME_LABEL, CONTROLLER_NAME)],
            &[
                (CLUSTER_NAME_ANNOTATION, "c1"),
                (CLUSTER_NAMESPACE_ANNOTATION, "clusters"),
            ],
        );
        assert_eq!(map_registration(record), cluster_ref("c1", "clusters"));

        let foreign = secret("in-cluster", &[], &[(CLUSTER_NAME_ANNOTATION, "c1")]);
        assert_eq!(map_registration(foreign), None);
    }
}
