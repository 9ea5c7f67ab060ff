use config::ConfigError;
use controllers::SyncError;
use kube::runtime::finalizer;
use telemetry::TelemetryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Sync error: {0}")]
    SyncError(#[from] SyncError),

    #[error("Finalizer Error: {0}")]
    // NB: finalizer::Error embeds the reconciler error, boxed to keep Error small
    FinalizerError(#[source] Box<finalizer::Error<SyncError>>),

    #[error("Metrics registration error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    #[error("Telemetry error: {0}")]
    TelemetryError(#[from] TelemetryError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::SyncError(e) => sync_label(e),
            Error::FinalizerError(e) => match e.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    sync_label(e)
                }
                finalizer::Error::AddFinalizer(_) | finalizer::Error::RemoveFinalizer(_) => {
                    "finalizer_patch".into()
                }
                _ => "finalizer".into(),
            },
            Error::KubeError(_) => "kube".into(),
            Error::MetricsError(_) => "metrics".into(),
            Error::ConfigError(_) => "config".into(),
            Error::TelemetryError(_) => "telemetry".into(),
        }
    }

    /// Whether retrying after a delay may succeed without upstream changes.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::SyncError(e) => e.is_transient(),
            Error::FinalizerError(e) => match e.as_ref() {
                finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => {
                    e.is_transient()
                }
                finalizer::Error::AddFinalizer(_) | finalizer::Error::RemoveFinalizer(_) => true,
                _ => false,
            },
            Error::KubeError(_) => true,
            Error::MetricsError(_) | Error::ConfigError(_) | Error::TelemetryError(_) => false,
        }
    }
}

fn sync_label(e: &SyncError) -> String {
    match e {
        SyncError::Provider(_) => "provider",
        SyncError::MissingCredentialKey { .. } => "missing_credential_key",
        SyncError::MalformedCredentials { .. } => "malformed_credentials",
        SyncError::Synthesis { .. } => "synthesis",
        SyncError::ForeignRecord { .. } => "foreign_record",
        SyncError::Lookup(_) => "lookup",
        SyncError::Create(_) => "create",
        SyncError::Update(_) => "update",
        SyncError::Delete(_) => "delete",
        SyncError::Timeout { .. } => "timeout",
    }
    .into()
}

/// Expose all controller components used by main
pub mod controller;
pub use crate::controller::*;
pub mod api;
pub mod config;
pub mod controllers;
pub mod credentials;
pub mod providers;
pub mod registration;
pub mod store;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;
