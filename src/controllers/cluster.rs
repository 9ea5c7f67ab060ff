use std::{future::Future, sync::Arc, time::Duration};

use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info, instrument, warn};

use crate::{
    api::{capi_cluster::Cluster, labels::KUBECONFIG_DATA_KEY},
    config::{Requeue, RegistrationTarget},
    credentials::{self, NormalizedCredentials},
    providers::ProviderPolicy,
    registration,
    store::{secret_key, ObjectKey, ObjectStore, StoreError, StoreResult},
};

use super::{SyncError, SyncResult};

/// Lifecycle state of a managed cluster, as seen by one reconciliation.
#[derive(Debug)]
pub enum ClusterState {
    /// Not found, or deletion in progress.
    Absent,
    NotReady(Cluster),
    Ready(Cluster),
}

impl From<Option<Cluster>> for ClusterState {
    fn from(cluster: Option<Cluster>) -> Self {
        match cluster {
            Some(cluster) if cluster.is_deleting() => ClusterState::Absent,
            Some(cluster) if cluster.cluster_ready() => ClusterState::Ready(cluster),
            Some(cluster) => ClusterState::NotReady(cluster),
            None => ClusterState::Absent,
        }
    }
}

/// What a reconciliation did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Removed,
    AlreadyRemoved,
    /// Cluster control plane is not ready yet.
    NotReady,
    /// Credential secret is missing or not (yet) the genuine one.
    AwaitingCredentials,
    /// The secret under the record name was not generated for this cluster.
    Foreign,
}

impl SyncOutcome {
    /// Delay after which the cluster should be looked at again regardless of events.
    pub fn requeue_after(&self, requeue: &Requeue) -> Option<Duration> {
        match self {
            SyncOutcome::NotReady | SyncOutcome::AwaitingCredentials => Some(requeue.not_ready),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOutcome::Created => "created",
            SyncOutcome::Updated => "updated",
            SyncOutcome::Unchanged => "unchanged",
            SyncOutcome::Removed => "removed",
            SyncOutcome::AlreadyRemoved => "already_removed",
            SyncOutcome::NotReady => "not_ready",
            SyncOutcome::AwaitingCredentials => "awaiting_credentials",
            SyncOutcome::Foreign => "foreign",
        }
    }
}

/// Level triggered synchronization of one managed cluster into its
/// registration record. Every call recomputes the desired record from the
/// current upstream state, so repeated calls on the same state write nothing.
#[derive(Clone)]
pub struct ClusterRegistrar {
    store: Arc<dyn ObjectStore>,
    target: RegistrationTarget,
    requeue: Requeue,
    timeout: Duration,
}

impl ClusterRegistrar {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        target: RegistrationTarget,
        requeue: Requeue,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            target,
            requeue,
            timeout,
        }
    }

    pub fn requeue(&self) -> &Requeue {
        &self.requeue
    }

    pub fn target(&self) -> &RegistrationTarget {
        &self.target
    }

    #[instrument(skip(self), fields(cluster = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> SyncResult<SyncOutcome> {
        let cluster = self
            .bounded("get cluster", SyncError::Lookup, self.store.get_cluster(key))
            .await?;

        match ClusterState::from(cluster) {
            ClusterState::Absent => self.remove(key).await,
            ClusterState::NotReady(_) => {
                debug!("Control plane is not ready");
                Ok(SyncOutcome::NotReady)
            }
            ClusterState::Ready(cluster) => self.sync(&cluster).await,
        }
    }

    /// Delete the registration record of a cluster. Missing records are not an error.
    ///
    /// A secret under the record name that was not generated for this cluster
    /// is left in place.
    #[instrument(skip(self), fields(cluster = %key))]
    pub async fn remove(&self, key: &ObjectKey) -> SyncResult<SyncOutcome> {
        let record = self.target.record_key(key);
        let observed = self
            .bounded(
                "get registration",
                SyncError::Lookup,
                self.store.get_secret(&record),
            )
            .await?;

        match observed {
            None => {
                debug!(record = %record, "Registration record already gone");
                return Ok(SyncOutcome::AlreadyRemoved);
            }
            Some(observed) if !registration::owned_by(&observed, key) => {
                warn!(
                    record = %record,
                    owner = ?registration::source_cluster(&observed),
                    "Secret under the registration name belongs elsewhere, not deleting"
                );
                return Ok(SyncOutcome::Foreign);
            }
            Some(_) => {}
        }

        let deleted = self
            .bounded(
                "delete registration",
                SyncError::Delete,
                self.store.delete_secret(&record),
            )
            .await?;

        if deleted {
            info!(record = %record, "Deleted registration record");
            Ok(SyncOutcome::Removed)
        } else {
            debug!(record = %record, "Registration record already gone");
            Ok(SyncOutcome::AlreadyRemoved)
        }
    }

    async fn sync(&self, cluster: &Cluster) -> SyncResult<SyncOutcome> {
        let key = cluster.key();
        let Some(credentials) = self.credentials(cluster).await? else {
            return Ok(SyncOutcome::AwaitingCredentials);
        };

        let desired = registration::synthesize(&key, &credentials, &self.target)
            .map_err(|source| SyncError::Synthesis {
                cluster: key.clone(),
                source,
            })?;

        self.apply(&key, desired).await
    }

    /// Locate, validate and extract the credentials of a ready cluster.
    ///
    /// `None` means the secret is not there yet or is not the one the
    /// provider generated for this cluster.
    async fn credentials(&self, cluster: &Cluster) -> SyncResult<Option<NormalizedCredentials>> {
        let policy = ProviderPolicy::for_cluster(cluster)?;
        let location = policy.locate();

        let Some(secret) = self
            .bounded(
                "get credential secret",
                SyncError::Lookup,
                self.store.get_secret(&location),
            )
            .await?
        else {
            debug!(secret = %location, provider = %policy.kind, "Credential secret not found");
            return Ok(None);
        };

        let control_plane_uid = match policy.owner_lookup() {
            Some((reference, namespace)) => {
                self.bounded(
                    "get control plane",
                    SyncError::Lookup,
                    self.store.control_plane_uid(reference, namespace),
                )
                .await?
            }
            None => None,
        };

        if !policy.validate(&secret, control_plane_uid.as_deref()) {
            debug!(secret = %location, provider = %policy.kind, "Secret is not a valid kubeconfig for the cluster");
            return Ok(None);
        }

        let raw = raw_kubeconfig(&secret)?;
        let credentials =
            credentials::extract(raw).map_err(|source| SyncError::MalformedCredentials {
                secret: secret_key(&secret),
                source,
            })?;

        Ok(Some(credentials.with_tls_policy(policy.tls_policy())))
    }

    async fn apply(&self, cluster: &ObjectKey, desired: Secret) -> SyncResult<SyncOutcome> {
        let record = secret_key(&desired);
        let observed = self
            .bounded(
                "get registration",
                SyncError::Lookup,
                self.store.get_secret(&record),
            )
            .await?;

        let observed = match observed {
            Some(observed) => observed,
            None => match self
                .bounded(
                    "create registration",
                    SyncError::Create,
                    self.store.create_secret(&desired),
                )
                .await
            {
                Ok(_) => {
                    info!(record = %record, "Created registration record");
                    return Ok(SyncOutcome::Created);
                }
                Err(SyncError::Create(StoreError::AlreadyExists(_))) => {
                    debug!(record = %record, "Registration record appeared concurrently");
                    self.bounded(
                        "get registration",
                        SyncError::Lookup,
                        self.store.get_secret(&record),
                    )
                    .await?
                    .ok_or(SyncError::Create(StoreError::AlreadyExists(record.clone())))?
                }
                Err(e) => return Err(e),
            },
        };

        if !registration::owned_by(&observed, cluster) {
            return Err(SyncError::ForeignRecord {
                record,
                owner: registration::source_cluster(&observed),
            });
        }

        if !registration::differs(&desired, &observed) {
            debug!(record = %record, "Registration record up to date");
            return Ok(SyncOutcome::Unchanged);
        }

        self.bounded(
            "update registration",
            SyncError::Update,
            self.store
                .replace_secret(&registration::merge(desired, observed)),
        )
        .await?;
        info!(record = %record, "Updated registration record");

        Ok(SyncOutcome::Updated)
    }

    /// Run a store operation under the operation timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        wrap: fn(StoreError) -> SyncError,
        fut: impl Future<Output = StoreResult<T>>,
    ) -> SyncResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(wrap),
            Err(_) => {
                warn!(operation, timeout = ?self.timeout, "Operation timed out");
                Err(SyncError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }
}

fn raw_kubeconfig(secret: &Secret) -> SyncResult<&[u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(KUBECONFIG_DATA_KEY))
        .map(|value| value.0.as_slice())
        .ok_or_else(|| SyncError::MissingCredentialKey {
            secret: secret_key(secret),
            key: KUBECONFIG_DATA_KEY,
        })
}
