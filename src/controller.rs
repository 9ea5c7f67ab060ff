use crate::api::capi_cluster::Cluster;
use crate::api::labels::{CONTROLLER_NAME, CONTROLLER_NAME_LABEL};
use crate::config::Options;
use crate::controllers::cluster::ClusterRegistrar;
use crate::controllers::controller::{
    error_policy, map_credential_secret, map_registration, reconcile, Context,
};
use crate::metrics::Diagnostics;
use crate::store::KubeStore;
use crate::{Error, Metrics, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{controller, metadata_watcher, watcher, Controller, WatchStreamExt},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, options: &Options) -> Result<Arc<Context>> {
        let registrar = ClusterRegistrar::new(
            Arc::new(KubeStore::new(client.clone())),
            options.target(),
            options.requeue(),
            options.timeout,
        );

        Ok(Arc::new(Context {
            client,
            registrar,
            metrics: Metrics::register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
        }))
    }
}

/// Scope an API to the watched namespace, or to all namespaces.
fn scoped<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

/// Initialize the cluster controller and run it until a termination signal
pub async fn run(state: State, options: Options) -> Result<()> {
    let client = Client::try_default().await?;
    let namespace = options.cluster_namespace.as_deref();

    let clusters: Api<Cluster> = scoped(client.clone(), namespace);
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("Clusters are not queryable; {e:?}. Is Cluster API installed?");
        return Err(Error::KubeError(e));
    }

    // Credential secrets are only needed as triggers, so their payloads are not watched
    let credentials: Api<Secret> = scoped(client.clone(), namespace);
    let registrations: Api<Secret> = Api::namespaced(client.clone(), &options.argo_namespace);
    let managed = watcher::Config::default()
        .labels(&format!("{CONTROLLER_NAME_LABEL}={CONTROLLER_NAME}"));

    let ctx = state.to_context(client, &options)?;
    info!(
        namespace = namespace.unwrap_or("*"),
        argo_namespace = %options.argo_namespace,
        workers = options.workers,
        "Starting cluster controller"
    );

    Controller::new(clusters, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(options.workers))
        .watches_stream(
            metadata_watcher(credentials, watcher::Config::default()).touched_objects(),
            map_credential_secret,
        )
        .watches(registrations, managed, map_registration)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(cluster = %obj, "Reconciled"),
                Err(e) => debug!("Reconcile error: {e}"),
            }
        })
        .await;

    info!("Cluster controller stopped");
    Ok(())
}
