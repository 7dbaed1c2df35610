//! Canopy Operator - bootstraps a kcp workspace tree and issues provider credentials

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use canopy_common::crd::Platform;
use canopy_common::kube_utils::KubeResourceClient;
use canopy_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig, DEFAULT_LOG_FILTER};
use canopy_common::OperatorConfig;
use canopy_operator::{error_policy, reconcile, Context, PlatformKubeClientImpl};
use canopy_workspace::KubeWorkspaceClientFactory;

/// Canopy - Platform operator for kcp workspace trees
#[derive(Parser, Debug)]
#[command(name = "canopy-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Platform CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Workspace structure file
    #[arg(
        long,
        env = "CANOPY_STRUCTURE_PATH",
        default_value = "/etc/canopy/workspaces/structure.yaml"
    )]
    structure_path: PathBuf,

    /// Kubeconfig for the kcp front proxy; in-cluster config when unset
    #[arg(long, env = "CANOPY_KCP_KUBECONFIG")]
    kcp_kubeconfig: Option<PathBuf>,

    /// In-cluster base URL written into internal connection kubeconfigs
    #[arg(long, env = "CANOPY_KCP_INTERNAL_URL")]
    kcp_internal_url: Option<String>,

    /// Externally reachable base URL written into external connection kubeconfigs
    #[arg(long, env = "CANOPY_KCP_EXTERNAL_URL")]
    kcp_external_url: Option<String>,

    /// Namespace service identities are created in inside each workspace
    #[arg(long, env = "CANOPY_SERVICE_ACCOUNT_NAMESPACE")]
    service_account_namespace: Option<String>,

    /// Requested lifetime of issued tokens in seconds
    #[arg(long, env = "CANOPY_TOKEN_LIFETIME_SECS")]
    token_lifetime_secs: Option<u64>,

    /// Log output format: json or plain
    #[arg(long, env = "CANOPY_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Install the Platform CRD on startup
    #[arg(long, env = "CANOPY_INSTALL_CRD", default_value_t = true, action = clap::ArgAction::Set)]
    install_crd: bool,
}

impl Cli {
    fn operator_config(&self) -> OperatorConfig {
        let mut config = OperatorConfig {
            structure_path: self.structure_path.clone(),
            ..Default::default()
        };
        if let Some(url) = &self.kcp_internal_url {
            config.kcp.internal_url = url.clone();
        }
        if let Some(url) = &self.kcp_external_url {
            config.kcp.external_url = url.clone();
        }
        if let Some(ns) = &self.service_account_namespace {
            config.service_account_namespace = ns.clone();
        }
        if let Some(secs) = self.token_lifetime_secs {
            config.token_lifetime = Duration::from_secs(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Platform::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        default_filter: DEFAULT_LOG_FILTER.to_string(),
    })?;

    run_controller(cli).await
}

/// Install the Platform CRD with server-side apply
async fn ensure_crd_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    tracing::info!("Installing Platform CRD...");
    crds.patch(
        "platforms.canopy.dev",
        &params,
        &Patch::Apply(&Platform::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Platform CRD: {}", e))?;

    Ok(())
}

/// Client configuration for the kcp front proxy
async fn kcp_config(path: Option<&PathBuf>) -> anyhow::Result<kube::Config> {
    match path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| anyhow::anyhow!("Failed to read kcp kubeconfig {:?}: {}", path, e))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| anyhow::anyhow!("Invalid kcp kubeconfig {:?}: {}", path, e))
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to infer kcp client config: {}", e)),
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let config = cli.operator_config();
    tracing::info!(
        structure = %config.structure_path.display(),
        internal_url = %config.kcp.internal_url,
        external_url = %config.kcp.external_url,
        "Starting Canopy operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crd {
        ensure_crd_installed(&client, &config.field_manager).await?;
    }

    let factory = Arc::new(KubeWorkspaceClientFactory::new(
        kcp_config(cli.kcp_kubeconfig.as_ref()).await?,
    ));

    let cancel = CancellationToken::new();
    let ctx = Arc::new(Context::new(
        Arc::new(PlatformKubeClientImpl::new(
            client.clone(),
            &config.field_manager,
        )),
        factory,
        Arc::new(KubeResourceClient::new(client.clone())),
        config,
        cancel.clone(),
    ));

    // Stop issuing writes as soon as shutdown starts
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        }
    });

    let platforms: Api<Platform> = Api::all(client);
    Controller::new(platforms, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Platform reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Platform reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Platform controller completed");
    Ok(())
}
