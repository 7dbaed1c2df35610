//! Kubeconfig documents issued to provider connections
//!
//! Issued kubeconfigs always hold a single cluster, user, and context, all
//! named after the connection. Admin kubeconfigs are also parsed here so
//! their user credential can be re-issued against a different server.

use base64::{engine::general_purpose::STANDARD, Engine};
use canopy_common::yaml::to_yaml_string;
use canopy_common::Error;
use serde::{Deserialize, Serialize};

/// Kubeconfig structure
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    /// Kind (always "Config")
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Clusters
    #[serde(default)]
    pub clusters: Vec<KubeconfigCluster>,
    /// Users
    #[serde(default)]
    pub users: Vec<KubeconfigUser>,
    /// Contexts
    #[serde(default)]
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    #[serde(default)]
    pub current_context: String,
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Config".to_string()
}

/// Cluster entry in kubeconfig
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// CA certificate (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// User entry in kubeconfig
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct UserConfig {
    /// Bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Client certificate (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    /// Client key (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_data: Option<String>,
}

impl UserConfig {
    fn is_empty(&self) -> bool {
        self.token.is_none() && self.client_certificate_data.is_none()
    }
}

/// Context entry in kubeconfig
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// User name (reference)
    pub user: String,
}

/// Server, bearer token, and CA for one workspace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopedCredential {
    /// Workspace server URL, `<base>/clusters/<path>`
    pub server: String,
    /// Bearer token
    pub token: String,
    /// PEM-encoded CA bundle
    pub ca_data: Option<Vec<u8>>,
}

impl Kubeconfig {
    /// Single-context kubeconfig with a bearer token
    pub fn for_credential(name: &str, credential: &ScopedCredential) -> Self {
        Self::single(
            name,
            &credential.server,
            credential.ca_data.as_deref(),
            UserConfig {
                token: Some(credential.token.clone()),
                ..Default::default()
            },
        )
    }

    /// Single-context kubeconfig with an arbitrary user credential
    pub fn single(name: &str, server: &str, ca_data: Option<&[u8]>, user: UserConfig) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            clusters: vec![KubeconfigCluster {
                name: name.to_string(),
                cluster: ClusterConfig {
                    server: server.to_string(),
                    certificate_authority_data: ca_data.map(|ca| STANDARD.encode(ca)),
                },
            }],
            users: vec![KubeconfigUser {
                name: name.to_string(),
                user,
            }],
            contexts: vec![KubeconfigContext {
                name: name.to_string(),
                context: ContextConfig {
                    cluster: name.to_string(),
                    user: name.to_string(),
                },
            }],
            current_context: name.to_string(),
        }
    }

    /// Parse a kubeconfig document
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::validation_for_field("kubeconfig", format!("not UTF-8: {e}")))?;
        serde_yaml::from_str(text)
            .map_err(|e| Error::validation_for_field("kubeconfig", format!("invalid document: {e}")))
    }

    /// The user credential of the current context
    pub fn current_user(&self) -> Result<&UserConfig, Error> {
        let context = self
            .contexts
            .iter()
            .find(|c| c.name == self.current_context)
            .or_else(|| self.contexts.first())
            .ok_or_else(|| Error::validation_for_field("kubeconfig", "no contexts"))?;
        let user = self
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .map(|u| &u.user)
            .ok_or_else(|| {
                Error::validation_for_field(
                    "kubeconfig",
                    format!("context '{}' references unknown user", context.name),
                )
            })?;
        if user.is_empty() {
            return Err(Error::validation_for_field(
                "kubeconfig",
                format!("user '{}' has no token or client certificate", context.context.user),
            ));
        }
        Ok(user)
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> Result<String, Error> {
        to_yaml_string(self).map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))
    }
}
