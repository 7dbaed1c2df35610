//! Platform Custom Resource Definition
//!
//! A Platform is the declarative intent the operator converges: the
//! workspace tree it bootstraps and the provider connections it mints
//! credentials for.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Specification for a Platform
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "canopy.dev",
    version = "v1alpha1",
    kind = "Platform",
    plural = "platforms",
    shortname = "plat",
    namespaced,
    status = "PlatformStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Control plane endpoint overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kcp: Option<KcpSpec>,

    /// Connections that receive a kubeconfig for a provider workspace.
    /// When unset the operator's built-in defaults are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_connections: Option<Vec<ProviderConnection>>,

    /// Connections that receive a kubeconfig for a workspace type's
    /// initializer endpoint. When unset the built-in defaults are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer_connections: Option<Vec<InitializerConnection>>,

    /// Free-form values made available to workspace manifest templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
}

/// Control plane endpoint overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KcpSpec {
    /// Base URL used for connections marked `external`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,

    /// Base URL used for in-cluster connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_url: Option<String>,
}

/// A consumer of a provider workspace's capability export
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConnection {
    /// Name of the APIExport to derive RBAC from. Required unless
    /// `useAdminCredential` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_name: Option<String>,

    /// Workspace path holding the export, e.g. `root:canopy-system`
    pub workspace_path: String,

    /// Name of the Secret receiving the kubeconfig
    pub secret_name: String,

    /// Namespace of the Secret; defaults to the Platform's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Point the kubeconfig at the external URL instead of the in-cluster one
    #[serde(default)]
    pub external: bool,

    /// Issue the operator's admin credential instead of a scoped identity
    #[serde(default)]
    pub use_admin_credential: bool,
}

/// A consumer of a workspace type's initializer virtual workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitializerConnection {
    /// Name of the WorkspaceType whose initializer endpoint is used
    pub workspace_type_name: String,

    /// Workspace path holding the WorkspaceType
    pub workspace_path: String,

    /// Name of the Secret receiving the kubeconfig
    pub secret_name: String,

    /// Namespace of the Secret; defaults to the Platform's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Platform lifecycle phase
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PlatformPhase {
    /// Nothing has been reconciled yet
    #[default]
    Pending,
    /// Workspaces are being created or are not ready yet
    Bootstrapping,
    /// Workspaces are ready; connection credentials are being written
    Provisioning,
    /// Everything has converged
    Ready,
    /// A terminal error needs operator intervention
    Failed,
}

impl std::fmt::Display for PlatformPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Bootstrapping => write!(f, "Bootstrapping"),
            Self::Provisioning => write!(f, "Provisioning"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state of one workspace in the bootstrap order
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceState {
    /// Workspace path
    pub path: String,
    /// Bootstrap state (Pending, Applying, AwaitingReady, Ready, Failed)
    pub state: String,
}

/// Status of a Platform
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Current phase
    #[serde(default)]
    pub phase: PlatformPhase,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-workspace bootstrap state, in bootstrap order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceState>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Observed generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl PlatformStatus {
    /// Create a status with the given phase
    pub fn with_phase(phase: PlatformPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add or replace a condition by type
    ///
    /// The previous transition time is kept when the condition's state did
    /// not change.
    pub fn condition(mut self, mut condition: Condition) -> Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Whether two statuses report the same state, ignoring timestamps
    pub fn same_state(&self, other: &PlatformStatus) -> bool {
        self.phase == other.phase
            && self.message == other.message
            && self.workspaces == other.workspaces
            && self.observed_generation == other.observed_generation
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(&other.conditions)
                .all(|(a, b)| a.same_state(b))
    }
}

fn preserve_unknown_fields(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    let mut extensions = schemars::Map::new();
    extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        extensions,
        ..Default::default()
    })
}
