//! Scoped credential synthesis
//!
//! A scoped credential is a kubeconfig for a dedicated service identity in
//! a provider workspace, carrying exactly the permissions a capability
//! export's consumer needs. Nothing is written to the destination Secret
//! unless every earlier step succeeded.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use canopy_apply::ApplyEngine;
use canopy_common::config::SecretKeyRef;
use canopy_common::error::is_not_found;
use canopy_common::kube_utils::{secret_data, ResourceClient, ResourceKey};
use canopy_common::{
    Error, OperatorConfig, KUBECONFIG_SECRET_KEY, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CANOPY,
};
use canopy_workspace::{WorkspaceClientFactory, WorkspacePath};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::identity::{provision_identity, ServiceIdentity};
use crate::kubeconfig::{Kubeconfig, ScopedCredential, UserConfig};
use crate::rbac::derive_rules;

/// APIVersion of kcp's APIExport and APIExportEndpointSlice
pub const APIS_API_VERSION: &str = "apis.kcp.io/v1alpha1";

/// Destination of an issued kubeconfig
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRef {
    /// Namespace in the host cluster
    pub namespace: String,
    /// Secret name
    pub name: String,
}

impl SecretRef {
    /// Secret `name` in `namespace`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Issues kubeconfigs into host-cluster Secrets
pub struct CredentialSynthesizer {
    factory: Arc<dyn WorkspaceClientFactory>,
    host: Arc<dyn ResourceClient>,
    engine: ApplyEngine,
    config: OperatorConfig,
}

impl CredentialSynthesizer {
    /// Create a synthesizer
    ///
    /// `factory` reaches provider workspaces; `host` is the cluster holding
    /// the CA and admin secrets and receiving the issued Secrets.
    pub fn new(
        factory: Arc<dyn WorkspaceClientFactory>,
        host: Arc<dyn ResourceClient>,
        engine: ApplyEngine,
        config: &OperatorConfig,
    ) -> Self {
        Self {
            factory,
            host,
            engine,
            config: config.clone(),
        }
    }

    /// Operator configuration in use
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Workspace client factory in use
    pub fn factory(&self) -> &dyn WorkspaceClientFactory {
        self.factory.as_ref()
    }

    /// Issue a least-privilege kubeconfig for the consumer of an export
    #[instrument(skip(self, secret), fields(secret = %secret))]
    pub async fn provision_scoped_credential(
        &self,
        export_name: &str,
        export_workspace_path: &str,
        server_url: &str,
        secret: &SecretRef,
    ) -> Result<(), Error> {
        if export_name.is_empty() {
            return Err(Error::validation_for_field(
                "capabilityName",
                "must not be empty",
            ));
        }
        if export_workspace_path.is_empty() {
            return Err(Error::validation_for_field(
                "workspacePath",
                "must not be empty",
            ));
        }
        let path = WorkspacePath::parse(export_workspace_path)?;
        let client = self.factory.for_workspace(&path)?;

        let export = client
            .get(&ResourceKey::cluster(APIS_API_VERSION, "APIExport", export_name))
            .await?
            .ok_or_else(|| {
                Error::not_ready(
                    format!("APIExport/{export_name}"),
                    format!("not found in {path}"),
                )
            })?;
        ensure_endpoint_published(client.as_ref(), export_name).await?;
        let ca = self.read_ca().await?;

        let rules = derive_rules(&export);
        let identity = ServiceIdentity::for_key(
            &format!("{export_name}-{}-{}", secret.namespace, secret.name),
            &self.config.service_account_namespace,
        );
        provision_identity(
            client.as_ref(),
            &self.engine,
            &identity,
            &rules,
            &self.config.workspace_access_role,
        )
        .await?;

        let token = self.mint_token(client.as_ref(), &identity).await?;
        let credential = ScopedCredential {
            server: server_url.to_string(),
            token,
            ca_data: Some(ca),
        };
        self.write_kubeconfig(secret, &Kubeconfig::for_credential(&secret.name, &credential))
            .await?;

        info!(export = export_name, workspace = %path, identity = %identity.name, "scoped credential issued");
        Ok(())
    }

    /// Issue the operator's admin credential against `server_url`
    #[instrument(skip(self, secret), fields(secret = %secret))]
    pub async fn issue_admin_credential(&self, server_url: &str, secret: &SecretRef) -> Result<(), Error> {
        let admin_ref = &self.config.kcp.admin_kubeconfig_secret;
        let raw = self.read_secret_key(admin_ref).await?;
        let admin = Kubeconfig::parse(&raw)?;
        let user: UserConfig = admin.current_user()?.clone();
        let ca = self.read_ca().await?;

        let kubeconfig = Kubeconfig::single(&secret.name, server_url, Some(&ca), user);
        self.write_kubeconfig(secret, &kubeconfig).await?;

        info!(server = server_url, "admin credential issued");
        Ok(())
    }

    /// CA bundle of the control plane's serving certificate
    pub async fn read_ca(&self) -> Result<Vec<u8>, Error> {
        self.read_secret_key(&self.config.kcp.ca_secret).await
    }

    async fn read_secret_key(&self, reference: &SecretKeyRef) -> Result<Vec<u8>, Error> {
        let key = ResourceKey::namespaced("v1", "Secret", &reference.namespace, &reference.name);
        let secret = self.host.get(&key).await?.ok_or_else(|| {
            Error::not_ready(
                format!("Secret/{}/{}", reference.namespace, reference.name),
                "not found",
            )
        })?;
        secret_data(&secret, &reference.key).ok_or_else(|| {
            Error::not_ready(
                format!("Secret/{}/{}", reference.namespace, reference.name),
                format!("key '{}' is missing", reference.key),
            )
        })
    }

    async fn mint_token(
        &self,
        client: &dyn ResourceClient,
        identity: &ServiceIdentity,
    ) -> Result<String, Error> {
        let resource = format!("ServiceAccount/{}/{}", identity.namespace, identity.name);
        self.engine.ensure_not_cancelled()?;
        let token = match client
            .request_token(
                &identity.namespace,
                &identity.name,
                self.config.token_lifetime_secs(),
            )
            .await
        {
            Ok(token) => token,
            // freshly created accounts can take a moment to become visible
            Err(e) if is_not_found(&e) => {
                return Err(Error::not_ready(resource, "not visible to the token API yet"))
            }
            Err(e) => return Err(e.into()),
        };
        if token.is_empty() {
            return Err(Error::not_ready(resource, "token request returned no token"));
        }
        Ok(token)
    }

    /// Upsert `kubeconfig` into the destination Secret under `kubeconfig`
    pub async fn write_kubeconfig(&self, secret: &SecretRef, kubeconfig: &Kubeconfig) -> Result<(), Error> {
        let encoded = STANDARD.encode(kubeconfig.to_yaml()?);
        let doc = kubeconfig_secret(secret, encoded);
        let outcome = self.engine.apply(self.host.as_ref(), &doc).await?;
        debug!(secret = %secret, ?outcome, "kubeconfig secret written");
        Ok(())
    }
}

fn kubeconfig_secret(secret: &SecretRef, encoded: String) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": secret.name,
            "namespace": secret.namespace,
            "labels": {LABEL_MANAGED_BY: LABEL_MANAGED_BY_CANOPY}
        },
        "type": "Opaque",
        "data": {KUBECONFIG_SECRET_KEY: encoded}
    })
}

/// The export's endpoint slice must publish a URL before consumers can use it
async fn ensure_endpoint_published(client: &dyn ResourceClient, export_name: &str) -> Result<(), Error> {
    let key = ResourceKey::cluster(APIS_API_VERSION, "APIExportEndpointSlice", export_name);
    let published = client
        .get(&key)
        .await?
        .and_then(|slice| {
            slice
                .pointer("/status/apiExportEndpoints")
                .and_then(Value::as_array)
                .map(|endpoints| {
                    endpoints.iter().any(|e| {
                        e.get("url")
                            .and_then(Value::as_str)
                            .is_some_and(|u| !u.is_empty())
                    })
                })
        })
        .unwrap_or(false);

    if published {
        Ok(())
    } else {
        Err(Error::not_ready(
            format!("APIExportEndpointSlice/{export_name}"),
            "no endpoint URL published yet",
        ))
    }
}
