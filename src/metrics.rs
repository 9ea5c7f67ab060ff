use crate::{api::capi_cluster::Cluster, controllers::cluster::SyncOutcome, Error};
use chrono::{DateTime, Utc};
use kube::{
    runtime::events::{Recorder, Reporter},
    Client, ResourceExt,
};
use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, Registry};
use serde::Serialize;
use tokio::time::Instant;

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub last_outcome: Option<&'static str>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            last_outcome: None,
            reporter: crate::api::labels::CONTROLLER_NAME.into(),
        }
    }
}

impl Diagnostics {
    pub fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub writes: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Metrics {
    /// Create the controller metrics and register them to start tracking them.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "capargo_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )?;
        let failures = IntCounterVec::new(
            opts!(
                "capargo_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["instance", "error"],
        )?;
        let writes = IntCounterVec::new(
            opts!(
                "capargo_registration_writes_total",
                "writes to ArgoCD cluster secrets",
            ),
            &["op"],
        )?;
        let reconciliations = IntCounter::new("capargo_reconciliations_total", "reconciliations")?;

        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(writes.clone()))?;
        registry.register(Box::new(reconciliations.clone()))?;

        Ok(Metrics {
            reconciliations,
            failures,
            writes,
            reconcile_duration,
        })
    }

    pub fn reconcile_failure(&self, cluster: &Cluster, e: &Error) {
        self.failures
            .with_label_values(&[cluster.name_any().as_str(), e.metric_label().as_str()])
            .inc()
    }

    pub fn record_outcome(&self, outcome: SyncOutcome) {
        let op = match outcome {
            SyncOutcome::Created => "create",
            SyncOutcome::Updated => "update",
            SyncOutcome::Removed => "delete",
            _ => return,
        };
        self.writes.with_label_values(&[op]).inc();
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values::<&str>(&[]).observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use prometheus::TextEncoder;

    use super::*;

    #[test]
    fn counts_registration_writes() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();

        metrics.record_outcome(SyncOutcome::Created);
        metrics.record_outcome(SyncOutcome::Unchanged);
        metrics.record_outcome(SyncOutcome::NotReady);
        metrics.record_outcome(SyncOutcome::Updated);
        metrics.record_outcome(SyncOutcome::Updated);

        assert_eq!(metrics.writes.with_label_values(&["create"]).get(), 1);
        assert_eq!(metrics.writes.with_label_values(&["update"]).get(), 2);
        assert_eq!(metrics.writes.with_label_values(&["delete"]).get(), 0);
    }

    #[test]
    fn measures_reconciliations() {
        let registry = Registry::new();
        let metrics = Metrics::register(&registry).unwrap();
        drop(metrics.count_and_measure());

        assert_eq!(metrics.reconciliations.get(), 1);
        let text = TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("capargo_reconcile_duration_seconds_count 1"));
    }

    #[test]
    fn double_registration_fails() {
        let registry = Registry::new();
        Metrics::register(&registry).unwrap();
        assert!(Metrics::register(&registry).is_err());
    }
}
