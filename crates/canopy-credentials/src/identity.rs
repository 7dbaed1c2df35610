//! Service identity provisioning inside a provider workspace
//!
//! An identity is a ServiceAccount bound to a ClusterRole of the same name
//! holding the derived rules, plus a second binding to the built-in
//! workspace-access role so the account can enter the workspace at all.

use canopy_apply::ApplyEngine;
use canopy_common::error::is_already_exists;
use canopy_common::kube_utils::{ResourceClient, ResourceKey};
use canopy_common::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_CANOPY};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// A namespaced service account and the RBAC objects named after it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Name shared by the ServiceAccount, ClusterRole, and ClusterRoleBinding
    pub name: String,
    /// Namespace of the ServiceAccount
    pub namespace: String,
}

impl ServiceIdentity {
    /// Identity for a caller key, e.g. `accounts.canopy.dev-canopy-system-account-operator`
    ///
    /// The key is lowercased and `_` and spaces become `-`.
    pub fn for_key(key: &str, namespace: impl Into<String>) -> Self {
        Self {
            name: sanitize_name(key),
            namespace: namespace.into(),
        }
    }

    /// Name of the binding to the workspace-access role
    pub fn access_binding_name(&self) -> String {
        format!("{}-workspace-access", self.name)
    }

    fn subject(&self) -> Subject {
        Subject {
            kind: "ServiceAccount".to_string(),
            name: self.name.clone(),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }
}

/// Lowercase and replace `_` and whitespace with `-`
pub fn sanitize_name(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '_' => '-',
            c if c.is_whitespace() => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

fn metadata(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(
            [(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_CANOPY.to_string())].into(),
        ),
        ..Default::default()
    }
}

fn cluster_role(identity: &ServiceIdentity, rules: &[PolicyRule]) -> ClusterRole {
    ClusterRole {
        metadata: metadata(&identity.name, None),
        rules: Some(rules.to_vec()),
        ..Default::default()
    }
}

fn cluster_role_binding(name: &str, role: &str, identity: &ServiceIdentity) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: metadata(name, None),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![identity.subject()]),
    }
}

/// Create or update the identity's objects through `client`
///
/// Existing ServiceAccounts and bindings are left as they are; the
/// ClusterRole is replaced so its rules track the current export. No write
/// starts once `engine`'s cancellation token has fired.
pub async fn provision_identity(
    client: &dyn ResourceClient,
    engine: &ApplyEngine,
    identity: &ServiceIdentity,
    rules: &[PolicyRule],
    access_role: &str,
) -> Result<(), Error> {
    let service_account = ServiceAccount {
        metadata: metadata(&identity.name, Some(&identity.namespace)),
        ..Default::default()
    };
    create_if_absent(client, engine, &service_account).await?;

    upsert_cluster_role(client, engine, &cluster_role(identity, rules)).await?;

    create_if_absent(
        client,
        engine,
        &cluster_role_binding(&identity.name, &identity.name, identity),
    )
    .await?;
    create_if_absent(
        client,
        engine,
        &cluster_role_binding(&identity.access_binding_name(), access_role, identity),
    )
    .await?;

    info!(identity = %identity.name, namespace = %identity.namespace, rules = rules.len(), "service identity provisioned");
    Ok(())
}

fn to_document<T: Serialize>(obj: &T) -> Result<(ResourceKey, Value), Error> {
    let doc = serde_json::to_value(obj)?;
    let key = ResourceKey::from_object(&doc)?;
    Ok((key, doc))
}

async fn create_if_absent<T: Serialize>(
    client: &dyn ResourceClient,
    engine: &ApplyEngine,
    obj: &T,
) -> Result<(), Error> {
    let (key, doc) = to_document(obj)?;
    engine.ensure_not_cancelled()?;
    match client.create(&key, &doc).await {
        Ok(_) => {
            debug!(resource = %key, "created");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            debug!(resource = %key, "already exists");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn upsert_cluster_role(
    client: &dyn ResourceClient,
    engine: &ApplyEngine,
    role: &ClusterRole,
) -> Result<(), Error> {
    let (key, mut doc) = to_document(role)?;

    let live = client.get(&key).await?;
    engine.ensure_not_cancelled()?;
    match live {
        Some(live) => {
            if let Some(rv) = live.pointer("/metadata/resourceVersion") {
                doc["metadata"]["resourceVersion"] = rv.clone();
            }
            client.replace(&key, &doc).await?;
            debug!(resource = %key, "updated rules");
        }
        None => match client.create(&key, &doc).await {
            Ok(_) => debug!(resource = %key, "created"),
            Err(e) if is_already_exists(&e) => debug!(resource = %key, "created concurrently"),
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}
