//! Kubeconfig parsing and normalization into the ArgoCD cluster config shape.

use std::collections::BTreeMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use thiserror::Error;

use crate::providers::TlsPolicy;

pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Malformed kubeconfig: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Malformed kubeconfig: current context {0:?} not found")]
    MissingContext(String),

    #[error("Malformed kubeconfig: cluster {0:?} not found")]
    MissingCluster(String),

    #[error("Malformed kubeconfig: cluster {0:?} has no server")]
    MissingServer(String),

    #[error("Malformed kubeconfig: field {field} is not valid base64: {source}")]
    Encoding {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Cluster config serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: String,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Deserialize, Debug)]
struct NamedCluster {
    name: String,
    cluster: KubeconfigCluster,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigCluster {
    #[serde(default)]
    server: String,
    #[serde(default)]
    tls_server_name: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
    #[serde(default)]
    certificate_authority_data: Option<String>,
}

#[derive(Deserialize, Debug)]
struct NamedContext {
    name: String,
    context: KubeconfigContext,
}

#[derive(Deserialize, Debug)]
struct KubeconfigContext {
    cluster: String,
    #[serde(default)]
    user: String,
}

#[derive(Deserialize, Debug)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: KubeconfigUser,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigUser {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    client_certificate_data: Option<String>,
    client_key_data: Option<String>,
    exec: Option<KubeconfigExec>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct KubeconfigExec {
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: Vec<ExecEnvVar>,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    install_hint: String,
}

#[derive(Deserialize, Debug)]
struct ExecEnvVar {
    name: String,
    value: String,
}

/// Cluster config as stored in the `config` key of an ArgoCD cluster secret.
///
/// Field order is the serialization order and must stay stable, so that
/// unchanged credentials serialize to identical bytes.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    pub tls_client_config: TlsClientConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_provider_config: Option<ExecProviderConfig>,
}

#[serde_as]
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientConfig {
    pub insecure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_data: Option<Vec<u8>>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<Vec<u8>>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_data: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecProviderConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_hint: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Basic,
    BearerToken,
    ClientCertificate,
    Exec,
    Anonymous,
}

/// Provider independent credentials of a workload cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedCredentials {
    /// API server endpoint.
    pub host: String,
    pub config: ClusterConfig,
}

impl NormalizedCredentials {
    pub fn auth_mode(&self) -> AuthMode {
        let config = &self.config;
        if config.exec_provider_config.is_some() {
            AuthMode::Exec
        } else if config.bearer_token.is_some() {
            AuthMode::BearerToken
        } else if config.tls_client_config.cert_data.is_some() {
            AuthMode::ClientCertificate
        } else if config.username.is_some() {
            AuthMode::Basic
        } else {
            AuthMode::Anonymous
        }
    }

    /// Apply the provider decision on TLS trust.
    pub fn with_tls_policy(mut self, policy: TlsPolicy) -> Self {
        if policy == TlsPolicy::Insecure {
            self.config.tls_client_config.insecure = true;
            self.config.tls_client_config.ca_data = None;
        }
        self
    }

    /// Canonical JSON form of the cluster config.
    pub fn config_json(&self) -> CredentialResult<String> {
        Ok(serde_json::to_string(&self.config)?)
    }
}

fn decode(field: &'static str, data: Option<String>) -> CredentialResult<Option<Vec<u8>>> {
    data.filter(|d| !d.is_empty())
        .map(|d| {
            BASE64_STANDARD
                .decode(d.trim())
                .map_err(|source| CredentialError::Encoding { field, source })
        })
        .transpose()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse a kubeconfig document and extract the credentials of its current context.
pub fn extract(raw: &[u8]) -> CredentialResult<NormalizedCredentials> {
    let kubeconfig: Kubeconfig = serde_yaml::from_slice(raw)?;

    let context = kubeconfig
        .contexts
        .into_iter()
        .find(|c| c.name == kubeconfig.current_context)
        .map(|c| c.context)
        .ok_or_else(|| CredentialError::MissingContext(kubeconfig.current_context.clone()))?;

    let cluster = kubeconfig
        .clusters
        .into_iter()
        .find(|c| c.name == context.cluster)
        .map(|c| c.cluster)
        .ok_or_else(|| CredentialError::MissingCluster(context.cluster.clone()))?;
    if cluster.server.is_empty() {
        return Err(CredentialError::MissingServer(context.cluster));
    }

    let user = kubeconfig
        .users
        .into_iter()
        .find(|u| u.name == context.user)
        .map(|u| u.user)
        .unwrap_or_default();

    let (username, password) = match non_empty(user.username) {
        Some(username) => (Some(username), non_empty(user.password)),
        None => (None, None),
    };

    let exec_provider_config = user.exec.map(|exec| ExecProviderConfig {
        command: exec.command,
        args: exec.args,
        env: exec.env.into_iter().map(|e| (e.name, e.value)).collect(),
        api_version: exec.api_version,
        install_hint: exec.install_hint,
    });

    Ok(NormalizedCredentials {
        host: cluster.server,
        config: ClusterConfig {
            username,
            password,
            bearer_token: non_empty(user.token),
            tls_client_config: TlsClientConfig {
                insecure: cluster.insecure_skip_tls_verify,
                server_name: non_empty(cluster.tls_server_name),
                cert_data: decode("client-certificate-data", user.client_certificate_data)?,
                key_data: decode("client-key-data", user.client_key_data)?,
                ca_data: decode("certificate-authority-data", cluster.certificate_authority_data)?,
            },
            exec_provider_config,
        },
    })
}
