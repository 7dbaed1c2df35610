//! Platform controller
//!
//! One reconcile pass bootstraps the workspace tree in order, then writes a
//! kubeconfig Secret for every provider and initializer connection. A
//! workspace or dependency that is not ready yet ends the pass with a
//! requeue; errors go through [`error_policy`].

use std::sync::Arc;

use async_trait::async_trait;
use canopy_apply::ApplyEngine;
use canopy_common::crd::{
    Condition, ConditionStatus, Platform, PlatformPhase, PlatformStatus, WorkspaceState,
};
use canopy_common::kube_utils::ResourceClient;
use canopy_common::template::TemplateContext;
use canopy_common::{Error, OperatorConfig};
use canopy_credentials::{reconcile_connections, ConnectionReport, CredentialSynthesizer};
use canopy_workspace::{
    BootstrapOutcome, BootstrapReport, Bootstrapper, DirectoryStructure, WorkspaceClientFactory,
};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

/// Condition type: every workspace in the structure is Ready
pub const CONDITION_WORKSPACES_READY: &str = "WorkspacesReady";
/// Condition type: every connection Secret was written
pub const CONDITION_CREDENTIALS_READY: &str = "CredentialsReady";
/// Condition type: the Platform has converged
pub const CONDITION_READY: &str = "Ready";

/// Kubernetes operations on the Platform resource itself
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlatformKubeClient: Send + Sync {
    /// Patch the status subresource of a Platform
    async fn patch_platform_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PlatformStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct PlatformKubeClientImpl {
    client: Client,
    field_manager: String,
}

impl PlatformKubeClientImpl {
    /// Wrap a host-cluster client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl PlatformKubeClient for PlatformKubeClientImpl {
    async fn patch_platform_status(
        &self,
        name: &str,
        namespace: &str,
        status: &PlatformStatus,
    ) -> Result<(), Error> {
        let api: Api<Platform> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}

/// Shared state for every reconcile
pub struct Context {
    /// Platform status access
    pub kube: Arc<dyn PlatformKubeClient>,
    /// Ordered workspace bootstrap
    pub bootstrapper: Bootstrapper,
    /// Connection Secret writer
    pub synthesizer: CredentialSynthesizer,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Build a context
    ///
    /// `factory` reaches workspaces; `host` is the cluster the Platform
    /// lives in. Writes stop being issued once `cancel` fires.
    pub fn new(
        kube: Arc<dyn PlatformKubeClient>,
        factory: Arc<dyn WorkspaceClientFactory>,
        host: Arc<dyn ResourceClient>,
        config: OperatorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let engine = ApplyEngine::new(&config.field_manager).with_cancellation(cancel);
        Self {
            kube,
            bootstrapper: Bootstrapper::new(factory.clone(), engine.clone(), &config),
            synthesizer: CredentialSynthesizer::new(factory, host, engine, &config),
            config,
        }
    }
}

/// Reconcile a Platform
#[instrument(skip(platform, ctx), fields(platform = %platform.name_any()))]
pub async fn reconcile(platform: Arc<Platform>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!("reconciling platform");
    let namespace = platform
        .namespace()
        .ok_or_else(|| Error::validation("Platform is missing a namespace"))?;

    let structure = match DirectoryStructure::load(&ctx.config.structure_path).await {
        Ok(structure) => structure,
        Err(e) => {
            let phase = failure_phase(&e, PlatformPhase::Pending);
            let status = build_status(&platform, phase, e.to_string(), None)
                .condition(not_ready(CONDITION_READY, "StructureUnavailable", &e.to_string()));
            update_status(&platform, &ctx, status).await?;
            return Err(e);
        }
    };

    let base = TemplateContext::builder()
        .spec(serde_json::to_value(&platform.spec)?)
        .values(
            platform
                .spec
                .values
                .clone()
                .unwrap_or_else(|| serde_json::json!({})),
        )
        .build();

    let report = ctx.bootstrapper.run(&structure, base).await;
    let workspaces = workspace_states(&report);

    match report.outcome {
        BootstrapOutcome::Ready => {}
        BootstrapOutcome::Requeue {
            after,
            waiting_on,
            reason,
        } => {
            debug!(%waiting_on, %reason, "waiting for workspace");
            let status = build_status(&platform, PlatformPhase::Bootstrapping, reason.clone(), Some(workspaces))
                .condition(not_ready(CONDITION_WORKSPACES_READY, "WorkspaceNotReady", &reason))
                .condition(not_ready(CONDITION_READY, "Bootstrapping", &reason));
            update_status(&platform, &ctx, status).await?;
            return Ok(Action::requeue(after));
        }
        BootstrapOutcome::Failed(e) => {
            let phase = failure_phase(&e, PlatformPhase::Bootstrapping);
            let message = e.to_string();
            let status = build_status(&platform, phase, message.clone(), Some(workspaces))
                .condition(not_ready(CONDITION_WORKSPACES_READY, "BootstrapFailed", &message))
                .condition(not_ready(CONDITION_READY, "BootstrapFailed", &message));
            update_status(&platform, &ctx, status).await?;
            return Err(e);
        }
    }

    let connections = reconcile_connections(&ctx.synthesizer, &platform.spec, &namespace).await;
    finish(&platform, &ctx, workspaces, connections).await
}

async fn finish(
    platform: &Platform,
    ctx: &Context,
    workspaces: Vec<WorkspaceState>,
    connections: ConnectionReport,
) -> Result<Action, Error> {
    let workspaces_ready = ready(
        CONDITION_WORKSPACES_READY,
        "WorkspacesReady",
        &format!("{} workspaces ready", workspaces.len()),
    );
    let summary = connections.summary();

    if connections.is_complete() {
        let status = build_status(platform, PlatformPhase::Ready, "platform is ready".to_string(), Some(workspaces))
            .condition(workspaces_ready)
            .condition(ready(CONDITION_CREDENTIALS_READY, "CredentialsIssued", &summary))
            .condition(ready(CONDITION_READY, "Reconciled", "platform is ready"));
        update_status(platform, ctx, status).await?;
        info!(%summary, "platform ready");
        return Ok(Action::requeue(ctx.config.requeue.success));
    }

    let problem = connections.first_problem().unwrap_or_else(|| summary.clone());
    let message = format!("{summary}; {problem}");
    let retryable = connections.is_retryable();
    let phase = if retryable {
        PlatformPhase::Provisioning
    } else {
        PlatformPhase::Failed
    };
    let reason = if connections.failed.is_empty() {
        "WaitingForDependencies"
    } else {
        "CredentialFailed"
    };
    let status = build_status(platform, phase, message.clone(), Some(workspaces))
        .condition(workspaces_ready)
        .condition(not_ready(CONDITION_CREDENTIALS_READY, reason, &message))
        .condition(not_ready(CONDITION_READY, reason, &message));
    update_status(platform, ctx, status).await?;

    // Prefer a terminal error so error_policy stops requeueing
    let mut failed = connections.failed;
    failed.sort_by_key(|(_, e)| e.is_retryable());
    match failed.into_iter().next() {
        Some((_, e)) => Err(e),
        None => Ok(Action::requeue(ctx.config.requeue.not_ready)),
    }
}

/// Error policy for the Platform controller
///
/// Retryable errors requeue after the configured delay; terminal errors wait
/// for a spec change.
pub fn error_policy(platform: Arc<Platform>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        platform = %platform.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.config.requeue.error)
    } else {
        Action::await_change()
    }
}

fn failure_phase(error: &Error, retry_phase: PlatformPhase) -> PlatformPhase {
    if error.is_retryable() {
        retry_phase
    } else {
        PlatformPhase::Failed
    }
}

fn workspace_states(report: &BootstrapReport) -> Vec<WorkspaceState> {
    report
        .nodes
        .iter()
        .map(|(path, state)| WorkspaceState {
            path: path.to_string(),
            state: state.to_string(),
        })
        .collect()
}

fn ready(type_: &str, reason: &str, message: &str) -> Condition {
    Condition::new(type_, ConditionStatus::True, reason, message)
}

fn not_ready(type_: &str, reason: &str, message: &str) -> Condition {
    Condition::new(type_, ConditionStatus::False, reason, message)
}

/// Start from the current status so condition transition times carry over
fn build_status(
    platform: &Platform,
    phase: PlatformPhase,
    message: String,
    workspaces: Option<Vec<WorkspaceState>>,
) -> PlatformStatus {
    let current = platform.status.clone().unwrap_or_default();
    PlatformStatus {
        phase,
        message: Some(message),
        workspaces: workspaces.unwrap_or(current.workspaces),
        observed_generation: platform.metadata.generation,
        conditions: current.conditions,
    }
}

async fn update_status(platform: &Platform, ctx: &Context, status: PlatformStatus) -> Result<(), Error> {
    if platform
        .status
        .as_ref()
        .is_some_and(|current| current.same_state(&status))
    {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    let name = platform.name_any();
    let namespace = platform.namespace().unwrap_or_default();
    if let Err(e) = ctx.kube.patch_platform_status(&name, &namespace, &status).await {
        warn!(error = %e, "failed to patch platform status");
        return Err(e);
    }
    Ok(())
}
