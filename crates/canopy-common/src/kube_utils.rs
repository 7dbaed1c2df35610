//! Dynamic Kubernetes object access using kube-rs
//!
//! Everything the operator writes into workspaces is a schema-less document
//! (`serde_json::Value`), so the API surface is a small trait over
//! `DynamicObject` addressed by [`ResourceKey`]. The trait is the seam tests
//! replace with the in-memory fake from the `testing` module.

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;

use crate::Error;

/// Identity of a single API object: (apiVersion, kind, namespace, name)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// API version, e.g. `tenancy.kcp.io/v1alpha1` or `v1`
    pub api_version: String,
    /// Kind, e.g. `Workspace`
    pub kind: String,
    /// Namespace; `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceKey {
    /// Key for a cluster-scoped object
    pub fn cluster(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }

    /// Key for a namespaced object
    pub fn namespaced(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Extract the key from a document's `apiVersion`, `kind`, and metadata
    pub fn from_object(obj: &Value) -> Result<Self, Error> {
        let field = |path: &str, value: Option<&Value>| -> Result<String, Error> {
            value
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::validation_for_field(path, "missing from object"))
        };

        let metadata = obj.get("metadata");
        Ok(Self {
            api_version: field("apiVersion", obj.get("apiVersion"))?,
            kind: field("kind", obj.get("kind"))?,
            namespace: metadata
                .and_then(|m| m.get("namespace"))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            name: field("metadata.name", metadata.and_then(|m| m.get("name")))?,
        })
    }

    /// ApiResource for this key's apiVersion and kind
    pub fn api_resource(&self) -> ApiResource {
        build_api_resource(&self.api_version, &self.kind)
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Schema-less object access against one API endpoint (one workspace)
///
/// Every method surfaces the raw `kube::Error` so callers can inspect the
/// structured API status (code and reason) when deciding how to react.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<Value>, kube::Error>;

    /// Server-side apply without forcing conflicts
    async fn apply(
        &self,
        key: &ResourceKey,
        obj: &Value,
        field_manager: &str,
    ) -> Result<Value, kube::Error>;

    /// Create an object
    async fn create(&self, key: &ResourceKey, obj: &Value) -> Result<Value, kube::Error>;

    /// Replace an existing object (optimistic concurrency on resourceVersion)
    async fn replace(&self, key: &ResourceKey, obj: &Value) -> Result<Value, kube::Error>;

    /// Request a time-bounded token for a ServiceAccount
    ///
    /// Returns an empty string if the server answered without a token.
    async fn request_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_seconds: i64,
    ) -> Result<String, kube::Error>;
}

/// `ResourceClient` backed by a real kube-rs `Client`
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, key: &ResourceKey) -> Api<DynamicObject> {
        let ar = key.api_resource();
        match &key.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn to_dynamic(obj: &Value) -> Result<DynamicObject, kube::Error> {
    serde_json::from_value(obj.clone()).map_err(kube::Error::SerdeError)
}

fn from_dynamic(obj: DynamicObject) -> Result<Value, kube::Error> {
    serde_json::to_value(obj).map_err(kube::Error::SerdeError)
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Value>, kube::Error> {
        match self.api_for(key).get_opt(&key.name).await? {
            Some(obj) => from_dynamic(obj).map(Some),
            None => Ok(None),
        }
    }

    async fn apply(
        &self,
        key: &ResourceKey,
        obj: &Value,
        field_manager: &str,
    ) -> Result<Value, kube::Error> {
        let params = PatchParams::apply(field_manager);
        let applied = self
            .api_for(key)
            .patch(&key.name, &params, &Patch::Apply(obj))
            .await?;
        from_dynamic(applied)
    }

    async fn create(&self, key: &ResourceKey, obj: &Value) -> Result<Value, kube::Error> {
        let created = self
            .api_for(key)
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(created)
    }

    async fn replace(&self, key: &ResourceKey, obj: &Value) -> Result<Value, kube::Error> {
        let replaced = self
            .api_for(key)
            .replace(&key.name, &PostParams::default(), &to_dynamic(obj)?)
            .await?;
        from_dynamic(replaced)
    }

    async fn request_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_seconds: i64,
    ) -> Result<String, kube::Error> {
        let sa_api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);

        let token_request = TokenRequest {
            metadata: Default::default(),
            spec: TokenRequestSpec {
                audiences: vec![],
                expiration_seconds: Some(expiration_seconds),
                bound_object_ref: None,
            },
            status: None,
        };

        let result = sa_api
            .create_token_request(service_account, &Default::default(), &token_request)
            .await?;

        Ok(result.status.map(|s| s.token).unwrap_or_default())
    }
}

/// Build an ApiResource from an apiVersion string and kind
///
/// ```
/// use canopy_common::kube_utils::build_api_resource;
///
/// let ar = build_api_resource("tenancy.kcp.io/v1alpha1", "Workspace");
/// assert_eq!(ar.group, "tenancy.kcp.io");
/// assert_eq!(ar.plural, "workspaces");
/// ```
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version); the core group is `""`
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Known kinds whose plural isn't derivable by the simple rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("apiexportendpointslice", "apiexportendpointslices"),
    ("logicalcluster", "logicalclusters"),
    ("workspacetype", "workspacetypes"),
    ("networkpolicy", "networkpolicies"),
    ("ingressclass", "ingressclasses"),
    ("endpoints", "endpoints"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple English
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Decode one key of a Secret document's base64 `data` map
pub fn secret_data(secret: &Value, key: &str) -> Option<Vec<u8>> {
    use base64::{engine::general_purpose::STANDARD, Engine};

    secret
        .get("data")
        .and_then(|d| d.get(key))
        .and_then(Value::as_str)
        .and_then(|encoded| STANDARD.decode(encoded).ok())
}
