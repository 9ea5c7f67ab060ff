use std::{net::SocketAddr, time::Duration};

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::store::ObjectKey;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_NOT_READY_REQUEUE: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--argo-namespace is required")]
    MissingTargetNamespace,

    #[error("--workers must be at least 1")]
    NoWorkers,
}

/// Mirrors Cluster API workload cluster credentials into ArgoCD cluster secrets
#[derive(Parser, Clone, Debug)]
#[command(name = "capi-argocd-registrar", version)]
pub struct Options {
    /// The name of the cluster where the controller is located.
    #[arg(long = "id", env = "CLUSTER_ID", default_value = "kind")]
    pub cluster_id: String,

    /// The namespace to watch for clusters. All namespaces when unset.
    #[arg(long, env = "CLUSTER_NAMESPACE")]
    pub cluster_namespace: Option<String>,

    /// The argo namespace in which to place the secrets.
    #[arg(long, env = "ARGO_NAMESPACE", default_value = "")]
    pub argo_namespace: String,

    /// The timeout period for any read or update action.
    #[arg(long, env = "OPERATION_TIMEOUT", default_value = "5m", value_parser = parse_duration)]
    pub timeout: Duration,

    /// The number of concurrent workers available to reconcile the state.
    #[arg(long, env = "WORKERS", default_value_t = 3)]
    pub workers: u16,

    /// Naming scheme of the generated ArgoCD cluster secrets.
    #[arg(long, env = "RECORD_NAMING", value_enum, default_value_t = RecordNaming::Namespaced)]
    pub naming: RecordNaming,

    /// Prefix applied to generated secret names.
    #[arg(long)]
    pub name_prefix: Option<String>,

    /// Suffix applied to generated secret names.
    #[arg(long)]
    pub name_suffix: Option<String>,

    /// Delay before checking again on a cluster which is not ready yet.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub not_ready_requeue: Duration,

    /// Delay before recomputing after a failed write.
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    pub retry_delay: Duration,

    /// Address of the health and metrics server.
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8443")]
    pub metrics_addr: SocketAddr,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Options {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.argo_namespace.trim().is_empty() {
            return Err(ConfigError::MissingTargetNamespace);
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    pub fn target(&self) -> RegistrationTarget {
        RegistrationTarget {
            namespace: self.argo_namespace.clone(),
            naming: NamingStrategy {
                scheme: self.naming,
                prefix: self.name_prefix.clone(),
                suffix: self.name_suffix.clone(),
            },
        }
    }

    pub fn requeue(&self) -> Requeue {
        Requeue {
            not_ready: self.not_ready_requeue,
            retry: self.retry_delay,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// How a registration record name is derived from its cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum RecordNaming {
    /// `<namespace>-<name>`. Dashes are valid in both parts, so `a/b-c` and
    /// `a-b/c` share a record name; the first registered cluster keeps it.
    #[default]
    Namespaced,
    /// `<name>` only; clusters with the same name in different namespaces collide,
    /// and the first registered cluster keeps the record.
    Name,
}

/// NamingStrategy is controlling registration record naming
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamingStrategy {
    pub scheme: RecordNaming,
    /// Specify a prefix for the record name
    pub prefix: Option<String>,
    /// Specify a suffix for the record name
    pub suffix: Option<String>,
}

impl NamingStrategy {
    pub fn apply(&self, cluster: &ObjectKey) -> String {
        let name = match self.scheme {
            RecordNaming::Namespaced => format!("{}-{}", cluster.namespace, cluster.name),
            RecordNaming::Name => cluster.name.clone(),
        };
        let name = match &self.prefix {
            Some(prefix) => prefix.clone() + &name,
            None => name,
        };
        match &self.suffix {
            Some(suffix) => name + suffix,
            None => name,
        }
    }
}

/// Where and under which names registration records are written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationTarget {
    pub namespace: String,
    pub naming: NamingStrategy,
}

impl RegistrationTarget {
    pub fn record_key(&self, cluster: &ObjectKey) -> ObjectKey {
        ObjectKey::new(&self.namespace, self.naming.apply(cluster))
    }
}

/// Delays handed back to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requeue {
    pub not_ready: Duration,
    pub retry: Duration,
}

impl Default for Requeue {
    fn default() -> Self {
        Self {
            not_ready: DEFAULT_NOT_READY_REQUEUE,
            retry: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Parse durations such as `300`, `1500ms`, `15s`, `5m` or `1h`.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid duration {value:?}"))?;

    let seconds = |per_unit: u64| {
        amount
            .checked_mul(per_unit)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {value:?} is out of range"))
    };

    match unit {
        "ms" => Ok(Duration::from_millis(amount)),
        "" | "s" => Ok(Duration::from_secs(amount)),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        other => Err(format!("unknown duration unit {other:?} in {value:?}")),
    }
}
