//! Provider and initializer connection secrets
//!
//! Every connection ends in one host-cluster Secret holding a kubeconfig:
//! a scoped identity for capability consumers, the admin credential for
//! `useAdminCredential` connections, and the admin credential pointed at a
//! workspace type's initializer endpoint for initializer connections.
//! Connections are processed in order; one that is not ready or fails does
//! not stop the rest.

use canopy_common::crd::{InitializerConnection, PlatformSpec, ProviderConnection};
use canopy_common::kube_utils::ResourceKey;
use canopy_common::{Error, OperatorConfig};
use canopy_workspace::{workspace_url, WorkspacePath};
use serde_json::Value;
use tracing::{info, warn};

use crate::synthesizer::{CredentialSynthesizer, SecretRef};

/// APIVersion of kcp's WorkspaceType
pub const WORKSPACE_TYPE_API_VERSION: &str = "tenancy.kcp.io/v1alpha1";

/// Outcome of one pass over all connections
#[derive(Debug, Default)]
pub struct ConnectionReport {
    /// Secrets written in this pass
    pub written: Vec<SecretRef>,
    /// Secrets not written because a dependency is not ready yet
    pub pending: Vec<(SecretRef, String)>,
    /// Secrets not written because of an error
    pub failed: Vec<(SecretRef, Error)>,
}

impl ConnectionReport {
    /// Whether every connection's secret was written
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.failed.is_empty()
    }

    /// Whether a retry could succeed without an input change
    pub fn is_retryable(&self) -> bool {
        self.failed.iter().all(|(_, e)| e.is_retryable())
    }

    /// One-line summary for status messages
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} written", self.written.len())];
        if !self.pending.is_empty() {
            parts.push(format!("{} pending", self.pending.len()));
        }
        if !self.failed.is_empty() {
            parts.push(format!("{} failed", self.failed.len()));
        }
        parts.join(", ")
    }

    /// First error or not-ready reason, for status messages
    pub fn first_problem(&self) -> Option<String> {
        self.failed
            .first()
            .map(|(secret, e)| format!("{secret}: {e}"))
            .or_else(|| {
                self.pending
                    .first()
                    .map(|(secret, reason)| format!("{secret}: {reason}"))
            })
    }

    fn record(&mut self, secret: SecretRef, result: Result<(), Error>) {
        match result {
            Ok(()) => self.written.push(secret),
            Err(e) if e.is_not_ready() => {
                info!(secret = %secret, reason = %e, "connection not ready");
                self.pending.push((secret, e.to_string()));
            }
            Err(e) => {
                warn!(secret = %secret, error = %e, "connection failed");
                self.failed.push((secret, e));
            }
        }
    }
}

/// Provider connections declared on the Platform, or the configured defaults
pub fn provider_connections(spec: &PlatformSpec, config: &OperatorConfig) -> Vec<ProviderConnection> {
    spec.provider_connections
        .clone()
        .unwrap_or_else(|| config.default_provider_connections.clone())
}

/// Initializer connections declared on the Platform, or the configured defaults
pub fn initializer_connections(
    spec: &PlatformSpec,
    config: &OperatorConfig,
) -> Vec<InitializerConnection> {
    spec.initializer_connections
        .clone()
        .unwrap_or_else(|| config.default_initializer_connections.clone())
}

/// Base URL for a connection: external or in-cluster, Platform overrides first
pub fn base_url(spec: &PlatformSpec, config: &OperatorConfig, external: bool) -> String {
    let kcp = spec.kcp.as_ref();
    let url = if external {
        kcp.and_then(|k| k.external_url.clone())
            .unwrap_or_else(|| config.kcp.external_url.clone())
    } else {
        kcp.and_then(|k| k.internal_url.clone())
            .unwrap_or_else(|| config.kcp.internal_url.clone())
    };
    url.trim_end_matches('/').to_string()
}

/// `<base>/clusters/<workspacePath>` for a provider connection
pub fn connection_server_url(
    spec: &PlatformSpec,
    config: &OperatorConfig,
    conn: &ProviderConnection,
) -> Result<String, Error> {
    let path = WorkspacePath::parse(&conn.workspace_path)?;
    workspace_url(&base_url(spec, config, conn.external), &path)
}

/// Write the Secret for every provider and initializer connection
///
/// Secrets without an explicit namespace go to `default_namespace`.
pub async fn reconcile_connections(
    synthesizer: &CredentialSynthesizer,
    spec: &PlatformSpec,
    default_namespace: &str,
) -> ConnectionReport {
    let config = synthesizer.config();
    let mut report = ConnectionReport::default();

    for conn in provider_connections(spec, config) {
        let secret = SecretRef::new(
            conn.namespace.as_deref().unwrap_or(default_namespace),
            &conn.secret_name,
        );
        let result = provider_connection(synthesizer, spec, &conn, &secret).await;
        report.record(secret, result);
    }

    for conn in initializer_connections(spec, config) {
        let secret = SecretRef::new(
            conn.namespace.as_deref().unwrap_or(default_namespace),
            &conn.secret_name,
        );
        let result = initializer_connection(synthesizer, &conn, &secret).await;
        report.record(secret, result);
    }

    report
}

async fn provider_connection(
    synthesizer: &CredentialSynthesizer,
    spec: &PlatformSpec,
    conn: &ProviderConnection,
    secret: &SecretRef,
) -> Result<(), Error> {
    if conn.secret_name.is_empty() {
        return Err(Error::validation_for_field("secretName", "must not be empty"));
    }
    let server = connection_server_url(spec, synthesizer.config(), conn)?;

    if conn.use_admin_credential {
        return synthesizer.issue_admin_credential(&server, secret).await;
    }
    synthesizer
        .provision_scoped_credential(
            conn.capability_name.as_deref().unwrap_or_default(),
            &conn.workspace_path,
            &server,
            secret,
        )
        .await
}

async fn initializer_connection(
    synthesizer: &CredentialSynthesizer,
    conn: &InitializerConnection,
    secret: &SecretRef,
) -> Result<(), Error> {
    if conn.workspace_type_name.is_empty() {
        return Err(Error::validation_for_field(
            "workspaceTypeName",
            "must not be empty",
        ));
    }
    let path = WorkspacePath::parse(&conn.workspace_path)?;
    let client = synthesizer.factory().for_workspace(&path)?;

    let key = ResourceKey::cluster(
        WORKSPACE_TYPE_API_VERSION,
        "WorkspaceType",
        &conn.workspace_type_name,
    );
    let resource = format!("WorkspaceType/{}", conn.workspace_type_name);
    let workspace_type = client
        .get(&key)
        .await?
        .ok_or_else(|| Error::not_ready(&resource, format!("not found in {path}")))?;

    let url = workspace_type
        .pointer("/status/virtualWorkspaces/0/url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::not_ready(&resource, "no virtual workspace URL published yet"))?;

    synthesizer.issue_admin_credential(url, secret).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::tests::{env, issued_kubeconfig};
    use canopy_common::crd::KcpSpec;
    use rstest::rstest;
    use serde_json::json;

    fn workspace_type(name: &str, url: Option<&str>) -> Value {
        let mut obj = json!({
            "apiVersion": WORKSPACE_TYPE_API_VERSION,
            "kind": "WorkspaceType",
            "metadata": {"name": name}
        });
        if let Some(url) = url {
            obj["status"] = json!({"virtualWorkspaces": [{"url": url}]});
        }
        obj
    }

    fn scoped(name: &str, secret: &str) -> ProviderConnection {
        ProviderConnection {
            capability_name: Some(name.to_string()),
            workspace_path: "root:canopy-system".to_string(),
            secret_name: secret.to_string(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(false, "https://kcp-front-proxy.canopy-system:8443/clusters/root:canopy-system")]
    #[case(true, "https://kcp.canopy.localhost:8443/clusters/root:canopy-system")]
    fn test_server_url_selects_base(#[case] external: bool, #[case] expected: &str) {
        let conn = ProviderConnection {
            external,
            ..scoped("accounts.canopy.dev", "s")
        };
        let url =
            connection_server_url(&PlatformSpec::default(), &OperatorConfig::default(), &conn)
                .unwrap();
        assert_eq!(url, expected);
    }

    #[test]
    fn test_platform_overrides_base_url() {
        let spec = PlatformSpec {
            kcp: Some(KcpSpec {
                external_url: Some("https://kcp.example.com/".to_string()),
                internal_url: None,
            }),
            ..Default::default()
        };
        let config = OperatorConfig::default();
        assert_eq!(base_url(&spec, &config, true), "https://kcp.example.com");
        assert_eq!(base_url(&spec, &config, false), config.kcp.internal_url);
    }

    #[test]
    fn test_absent_lists_fall_back_to_defaults() {
        let config = OperatorConfig::default();
        let spec = PlatformSpec::default();
        assert_eq!(
            provider_connections(&spec, &config),
            config.default_provider_connections
        );
        assert_eq!(initializer_connections(&spec, &config).len(), 1);

        let explicit = PlatformSpec {
            provider_connections: Some(vec![]),
            ..Default::default()
        };
        assert!(provider_connections(&explicit, &config).is_empty());
    }

    /// Story: a Platform with one scoped consumer, one admin consumer, and
    /// one initializer whose workspace type has not published its endpoint.
    /// Two secrets are written; the initializer waits for the next pass.
    #[tokio::test]
    async fn story_mixed_connections() {
        let env = env();
        env.workspaces
            .workspace("root")
            .insert(workspace_type("account", None));

        let spec = PlatformSpec {
            provider_connections: Some(vec![
                scoped("accounts.canopy.dev", "account-operator-kubeconfig"),
                ProviderConnection {
                    workspace_path: "root".to_string(),
                    secret_name: "canopy-admin-kubeconfig".to_string(),
                    namespace: Some("tools".to_string()),
                    external: true,
                    use_admin_credential: true,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let report = reconcile_connections(&env.synthesizer, &spec, "platform-ns").await;

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.pending.len(), 1);
        assert!(report.failed.is_empty());
        assert!(!report.is_complete());
        assert_eq!(
            report.pending[0].0,
            SecretRef::new("platform-ns", "account-initializer-kubeconfig")
        );
        assert_eq!(report.summary(), "2 written, 1 pending");

        let admin = issued_kubeconfig(&env.host, "tools", "canopy-admin-kubeconfig").unwrap();
        assert_eq!(
            admin.clusters[0].cluster.server,
            "https://kcp.canopy.localhost:8443/clusters/root"
        );
        assert!(
            issued_kubeconfig(&env.host, "platform-ns", "account-operator-kubeconfig").is_some()
        );
    }

    #[tokio::test]
    async fn initializer_points_at_virtual_workspace() {
        let env = env();
        env.workspaces.workspace("root").insert(workspace_type(
            "account",
            Some("https://kcp.test:6443/services/initializingworkspaces/root:account"),
        ));
        let spec = PlatformSpec {
            provider_connections: Some(vec![]),
            ..Default::default()
        };

        let report = reconcile_connections(&env.synthesizer, &spec, "canopy-system").await;

        assert!(report.is_complete());
        let kubeconfig =
            issued_kubeconfig(&env.host, "canopy-system", "account-initializer-kubeconfig")
                .unwrap();
        assert_eq!(
            kubeconfig.clusters[0].cluster.server,
            "https://kcp.test:6443/services/initializingworkspaces/root:account"
        );
    }

    #[tokio::test]
    async fn scoped_connection_without_capability_fails_terminally() {
        let env = env();
        let spec = PlatformSpec {
            provider_connections: Some(vec![ProviderConnection {
                capability_name: None,
                ..scoped("", "broken-kubeconfig")
            }]),
            initializer_connections: Some(vec![]),
            ..Default::default()
        };

        let report = reconcile_connections(&env.synthesizer, &spec, "canopy-system").await;

        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_retryable());
        assert!(report
            .first_problem()
            .unwrap()
            .contains("capabilityName"));
        assert_eq!(env.workspaces.total_calls(), 0);
    }
}
