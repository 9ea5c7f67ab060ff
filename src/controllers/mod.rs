use std::time::Duration;

use thiserror::Error;

use crate::{
    credentials::CredentialError, providers::ProviderError, store::ObjectKey, store::StoreError,
};

pub mod cluster;
pub mod controller;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Secret {secret} has no {key:?} key")]
    MissingCredentialKey { secret: ObjectKey, key: &'static str },

    #[error("Secret {secret}: {source}")]
    MalformedCredentials {
        secret: ObjectKey,
        #[source]
        source: CredentialError,
    },

    #[error("Registration record for {cluster} could not be built: {source}")]
    Synthesis {
        cluster: ObjectKey,
        #[source]
        source: CredentialError,
    },

    #[error("Registration record {record} is {}", owned_elsewhere(.owner))]
    ForeignRecord {
        record: ObjectKey,
        owner: Option<ObjectKey>,
    },

    #[error("Lookup error: {0}")]
    Lookup(#[source] StoreError),

    #[error("Create error: {0}")]
    Create(#[source] StoreError),

    #[error("Update error: {0}")]
    Update(#[source] StoreError),

    #[error("Delete error: {0}")]
    Delete(#[source] StoreError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl SyncError {
    /// Transient failures are retried after a delay. Everything else waits for
    /// the upstream records to change.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Lookup(_)
            | SyncError::Create(_)
            | SyncError::Update(_)
            | SyncError::Delete(_)
            | SyncError::Timeout { .. } => true,
            SyncError::Provider(_)
            | SyncError::MissingCredentialKey { .. }
            | SyncError::MalformedCredentials { .. }
            | SyncError::Synthesis { .. }
            | SyncError::ForeignRecord { .. } => false,
        }
    }
}

fn owned_elsewhere(owner: &Option<ObjectKey>) -> String {
    match owner {
        Some(owner) => format!("registered for cluster {owner}"),
        None => "not managed by this controller".into(),
    }
}
