//! Ordered workspace bootstrap
//!
//! Each node of the [`DirectoryStructure`] moves through
//! `Pending → Applying → AwaitingReady → Ready | Failed`. Nodes are processed
//! strictly in order and a node's manifests are applied only after every
//! earlier node is Ready. A workspace that is not ready ends the pass with a
//! requeue; nothing here sleeps. There is no rollback: the next pass
//! re-applies idempotently.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use canopy_apply::ApplyEngine;
use canopy_common::config::IdentityExport;
use canopy_common::error::is_not_found;
use canopy_common::kube_utils::{ResourceClient, ResourceKey};
use canopy_common::template::{TemplateContext, TemplateEngine};
use canopy_common::{Error, OperatorConfig};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::client::{WorkspaceClientFactory, WorkspacePath};
use crate::inventory::{discover_identities, IdentityInventory};
use crate::structure::{DirectoryStructure, WorkspaceNode};

/// APIVersion of kcp's LogicalCluster
pub const LOGICAL_CLUSTER_API_VERSION: &str = "core.kcp.io/v1alpha1";

/// Every workspace holds exactly one LogicalCluster with this name
pub const LOGICAL_CLUSTER_NAME: &str = "cluster";

/// Phase a workspace reports once it accepts content
pub const READY_PHASE: &str = "Ready";

/// Bootstrap state of one workspace node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Not reached yet in this pass
    Pending,
    /// Manifests are being rendered and applied
    Applying,
    /// Manifests applied; waiting for the workspace to report Ready
    AwaitingReady,
    /// Workspace is Ready
    Ready,
    /// Rendering or applying failed
    Failed,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Applying => write!(f, "Applying"),
            Self::AwaitingReady => write!(f, "AwaitingReady"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// How a bootstrap pass ended
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// Every workspace is Ready
    Ready,
    /// A workspace is not ready; run the pass again after `after`
    Requeue {
        /// Delay before the next pass
        after: Duration,
        /// Workspace path being waited on
        waiting_on: String,
        /// Observed state of the workspace
        reason: String,
    },
    /// A node failed; the error says whether retrying can help
    Failed(Error),
}

/// Result of a bootstrap pass
#[derive(Debug)]
pub struct BootstrapReport {
    /// How the pass ended
    pub outcome: BootstrapOutcome,
    /// State of every node, in structure order
    pub nodes: Vec<(WorkspacePath, NodeState)>,
    /// Identity inventory the templates were rendered with
    pub inventory: IdentityInventory,
}

impl BootstrapReport {
    /// Whether every workspace reached Ready
    pub fn is_ready(&self) -> bool {
        matches!(self.outcome, BootstrapOutcome::Ready)
    }
}

/// Result of driving a single node
enum NodeOutcome {
    Ready,
    NotReady(String),
}

/// Drives a [`DirectoryStructure`] to Ready
pub struct Bootstrapper {
    factory: Arc<dyn WorkspaceClientFactory>,
    engine: ApplyEngine,
    templates: TemplateEngine,
    identity_exports: Vec<IdentityExport>,
    not_ready_delay: Duration,
}

impl Bootstrapper {
    /// Create a bootstrapper from the operator configuration
    pub fn new(
        factory: Arc<dyn WorkspaceClientFactory>,
        engine: ApplyEngine,
        config: &OperatorConfig,
    ) -> Self {
        Self {
            factory,
            engine,
            templates: TemplateEngine::new(),
            identity_exports: config.identity_exports.clone(),
            not_ready_delay: config.requeue.not_ready,
        }
    }

    /// Run one bootstrap pass
    ///
    /// `base` carries the instance spec and values; the identity inventory
    /// and the target workspace are filled in per node.
    #[instrument(skip_all, fields(workspaces = structure.workspaces.len()))]
    pub async fn run(&self, structure: &DirectoryStructure, base: TemplateContext) -> BootstrapReport {
        let inventory = match discover_identities(self.factory.as_ref(), &self.identity_exports).await {
            Ok(inventory) => inventory,
            Err(e) => {
                warn!(error = %e, "proceeding with partial identity inventory");
                e.partial
            }
        };

        let mut nodes: Vec<(WorkspacePath, NodeState)> = structure
            .workspaces
            .iter()
            .map(|n| (n.path.clone(), NodeState::Pending))
            .collect();

        for (idx, node) in structure.workspaces.iter().enumerate() {
            let ctx = TemplateContext {
                identities: inventory.clone(),
                workspace: node.path.to_string(),
                ..base.clone()
            };

            let result = self.drive_node(node, &ctx, &mut nodes[idx].1).await;
            let outcome = match result {
                Ok(NodeOutcome::Ready) => continue,
                Ok(NodeOutcome::NotReady(reason)) => {
                    info!(workspace = %node.path, %reason, "workspace not ready, requeueing");
                    BootstrapOutcome::Requeue {
                        after: self.not_ready_delay,
                        waiting_on: node.path.to_string(),
                        reason,
                    }
                }
                Err(e) => {
                    nodes[idx].1 = NodeState::Failed;
                    warn!(workspace = %node.path, error = %e, "workspace bootstrap failed");
                    BootstrapOutcome::Failed(e)
                }
            };
            return BootstrapReport {
                outcome,
                nodes,
                inventory,
            };
        }

        BootstrapReport {
            outcome: BootstrapOutcome::Ready,
            nodes,
            inventory,
        }
    }

    async fn drive_node(
        &self,
        node: &WorkspaceNode,
        ctx: &TemplateContext,
        state: &mut NodeState,
    ) -> Result<NodeOutcome, Error> {
        let client = self.factory.for_workspace(&node.path)?;

        // An earlier node's manifests create this workspace; until it exists
        // there is nothing to apply into.
        if let Phase::Missing(reason) = workspace_phase(client.as_ref(), &node.path).await? {
            *state = NodeState::AwaitingReady;
            return Ok(NodeOutcome::NotReady(reason));
        }

        *state = NodeState::Applying;
        for file in &node.files {
            self.apply_file(client.as_ref(), file, ctx).await?;
        }

        *state = NodeState::AwaitingReady;
        match workspace_phase(client.as_ref(), &node.path).await? {
            Phase::Ready => {
                *state = NodeState::Ready;
                debug!(workspace = %node.path, "workspace ready");
                Ok(NodeOutcome::Ready)
            }
            Phase::Missing(reason) | Phase::NotReady(reason) => Ok(NodeOutcome::NotReady(reason)),
        }
    }

    async fn apply_file(
        &self,
        client: &dyn ResourceClient,
        file: &Path,
        ctx: &TemplateContext,
    ) -> Result<(), Error> {
        let name = file.display().to_string();
        let source = tokio::fs::read_to_string(file).await.map_err(|e| {
            Error::internal_with_context("bootstrap", format!("failed to read {name}: {e}"))
        })?;

        let objects = self
            .templates
            .render_manifests(&name, &source, ctx)
            .map_err(|e| Error::template(&name, e.to_string()))?;
        if objects.is_empty() {
            debug!(file = %name, "template rendered empty, skipping");
            return Ok(());
        }

        for obj in &objects {
            let outcome = self.engine.apply(client, obj).await?;
            debug!(file = %name, kind = obj["kind"].as_str().unwrap_or_default(), ?outcome, "applied manifest");
        }
        Ok(())
    }
}

/// Observed readiness of a workspace
enum Phase {
    Missing(String),
    NotReady(String),
    Ready,
}

/// Read the workspace's LogicalCluster phase
async fn workspace_phase(client: &dyn ResourceClient, path: &WorkspacePath) -> Result<Phase, Error> {
    let key = ResourceKey::cluster(
        LOGICAL_CLUSTER_API_VERSION,
        "LogicalCluster",
        LOGICAL_CLUSTER_NAME,
    );
    let cluster = match client.get(&key).await {
        Ok(cluster) => cluster,
        // kcp answers 403 for workspaces that do not exist yet
        Err(kube::Error::Api(ae)) if ae.code == 403 => None,
        Err(e) if is_not_found(&e) => None,
        Err(e) => return Err(e.into()),
    };

    let Some(cluster) = cluster else {
        return Ok(Phase::Missing(format!("workspace {path} does not exist yet")));
    };

    Ok(match cluster.pointer("/status/phase").and_then(Value::as_str) {
        Some(READY_PHASE) => Phase::Ready,
        Some(phase) => Phase::NotReady(format!("workspace {path} is {phase}")),
        None => Phase::NotReady(format!("workspace {path} has no phase yet")),
    })
}
