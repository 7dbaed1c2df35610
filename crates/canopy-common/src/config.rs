//! Operator configuration
//!
//! All built-in defaults (connection lists, well-known identity exports,
//! requeue delays) live here and are passed explicitly to every component,
//! so tests and callers can substitute their own without shared state.

use std::path::PathBuf;
use std::time::Duration;

use crate::crd::{InitializerConnection, ProviderConnection};
use crate::{CANOPY_SYSTEM_NAMESPACE, FIELD_MANAGER, ROOT_WORKSPACE};

/// Requeue delay after a fully converged reconcile
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue delay while waiting on a dependency (workspace phase, endpoint URL)
pub const REQUEUE_NOT_READY_SECS: u64 = 5;

/// Requeue delay after a retryable error
pub const REQUEUE_ERROR_SECS: u64 = 60;

/// Default lifetime of minted ServiceAccount tokens
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Built-in ClusterRole granting content access to a workspace
pub const WORKSPACE_ACCESS_ROLE: &str = "system:kcp:workspace:access";

/// Reference to one key of a Secret in the host cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretKeyRef {
    /// Secret namespace
    pub namespace: String,
    /// Secret name
    pub name: String,
    /// Key within the Secret's data
    pub key: String,
}

impl SecretKeyRef {
    /// Create a new secret key reference
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            key: key.into(),
        }
    }
}

/// An APIExport whose identity hash is discovered on every bootstrap pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityExport {
    /// Export name; also the key in the identity inventory
    pub name: String,
    /// Workspace path holding the export
    pub workspace_path: String,
}

impl IdentityExport {
    /// Create a new identity export reference
    pub fn new(name: impl Into<String>, workspace_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace_path: workspace_path.into(),
        }
    }
}

/// Requeue delays returned to the controller runtime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequeueConfig {
    /// After a fully converged reconcile
    pub success: Duration,
    /// While a dependency is not ready
    pub not_ready: Duration,
    /// After a retryable error
    pub error: Duration,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            success: Duration::from_secs(REQUEUE_SUCCESS_SECS),
            not_ready: Duration::from_secs(REQUEUE_NOT_READY_SECS),
            error: Duration::from_secs(REQUEUE_ERROR_SECS),
        }
    }
}

/// Control plane endpoints and the host-cluster secrets describing them
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KcpEndpoints {
    /// Base URL reachable from inside the host cluster
    pub internal_url: String,
    /// Base URL reachable by external consumers
    pub external_url: String,
    /// CA bundle for the control plane's serving certificate
    pub ca_secret: SecretKeyRef,
    /// Admin kubeconfig used by the operator and issued to admin connections
    pub admin_kubeconfig_secret: SecretKeyRef,
}

impl Default for KcpEndpoints {
    fn default() -> Self {
        Self {
            internal_url: "https://kcp-front-proxy.canopy-system:8443".to_string(),
            external_url: "https://kcp.canopy.localhost:8443".to_string(),
            ca_secret: SecretKeyRef::new(CANOPY_SYSTEM_NAMESPACE, "kcp-ca", "tls.crt"),
            admin_kubeconfig_secret: SecretKeyRef::new(
                CANOPY_SYSTEM_NAMESPACE,
                "kcp-admin-kubeconfig",
                crate::KUBECONFIG_SECRET_KEY,
            ),
        }
    }
}

/// Operator-wide configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Field manager used for every write
    pub field_manager: String,
    /// Requeue delays
    pub requeue: RequeueConfig,
    /// Lifetime of minted tokens
    pub token_lifetime: Duration,
    /// Namespace, inside each provider workspace, holding synthesized identities
    pub service_account_namespace: String,
    /// Built-in role granting workspace content access
    pub workspace_access_role: String,
    /// Exports whose identity hashes are exposed to templates
    pub identity_exports: Vec<IdentityExport>,
    /// Provider connections used when a Platform declares none
    pub default_provider_connections: Vec<ProviderConnection>,
    /// Initializer connections used when a Platform declares none
    pub default_initializer_connections: Vec<InitializerConnection>,
    /// Control plane endpoints
    pub kcp: KcpEndpoints,
    /// YAML file listing workspaces and their manifest files
    pub structure_path: PathBuf,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            field_manager: FIELD_MANAGER.to_string(),
            requeue: RequeueConfig::default(),
            token_lifetime: Duration::from_secs(DEFAULT_TOKEN_LIFETIME_SECS as u64),
            service_account_namespace: "default".to_string(),
            workspace_access_role: WORKSPACE_ACCESS_ROLE.to_string(),
            identity_exports: default_identity_exports(),
            default_provider_connections: default_provider_connections(),
            default_initializer_connections: default_initializer_connections(),
            kcp: KcpEndpoints::default(),
            structure_path: PathBuf::from("/etc/canopy/workspaces/structure.yaml"),
        }
    }
}

impl OperatorConfig {
    /// Token lifetime in seconds, falling back to the default for zero
    pub fn token_lifetime_secs(&self) -> i64 {
        match i64::try_from(self.token_lifetime.as_secs()) {
            Ok(0) | Err(_) => DEFAULT_TOKEN_LIFETIME_SECS,
            Ok(secs) => secs,
        }
    }
}

/// The well-known exports templates may reference by identity hash
pub fn default_identity_exports() -> Vec<IdentityExport> {
    ["tenancy.kcp.io", "topology.kcp.io", "shards.core.kcp.io"]
        .into_iter()
        .map(|name| IdentityExport::new(name, ROOT_WORKSPACE))
        .collect()
}

/// Built-in provider connections
pub fn default_provider_connections() -> Vec<ProviderConnection> {
    vec![
        ProviderConnection {
            capability_name: Some("accounts.canopy.dev".to_string()),
            workspace_path: "root:canopy-system".to_string(),
            secret_name: "account-operator-kubeconfig".to_string(),
            ..Default::default()
        },
        ProviderConnection {
            capability_name: Some("security.canopy.dev".to_string()),
            workspace_path: "root:canopy-system".to_string(),
            secret_name: "security-operator-kubeconfig".to_string(),
            ..Default::default()
        },
        ProviderConnection {
            workspace_path: ROOT_WORKSPACE.to_string(),
            secret_name: "canopy-admin-kubeconfig".to_string(),
            use_admin_credential: true,
            ..Default::default()
        },
    ]
}

/// Built-in initializer connections
pub fn default_initializer_connections() -> Vec<InitializerConnection> {
    vec![InitializerConnection {
        workspace_type_name: "account".to_string(),
        workspace_path: ROOT_WORKSPACE.to_string(),
        secret_name: "account-initializer-kubeconfig".to_string(),
        namespace: None,
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.field_manager, "canopy-operator");
        assert_eq!(config.requeue.not_ready, Duration::from_secs(5));
        assert_eq!(config.identity_exports.len(), 3);
        assert!(config
            .identity_exports
            .iter()
            .all(|e| e.workspace_path == "root"));
        assert_eq!(config.workspace_access_role, WORKSPACE_ACCESS_ROLE);
    }

    #[test]
    fn test_default_scoped_connections_name_a_capability() {
        for conn in default_provider_connections() {
            if !conn.use_admin_credential {
                assert!(conn.capability_name.is_some(), "{}", conn.secret_name);
            }
        }
    }

    #[test]
    fn test_zero_token_lifetime_uses_default() {
        let config = OperatorConfig {
            token_lifetime: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.token_lifetime_secs(), DEFAULT_TOKEN_LIFETIME_SECS);

        let config = OperatorConfig {
            token_lifetime: Duration::from_secs(600),
            ..Default::default()
        };
        assert_eq!(config.token_lifetime_secs(), 600);
    }
}
