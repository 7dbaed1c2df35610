//! Workspace-scoped API clients
//!
//! A workspace is addressed by a colon-separated path under `root`
//! (`root:orgs:acme`). The front proxy serves each workspace at
//! `<base>/clusters/<path>`, so scoping a client is a matter of rewriting the
//! cluster URL of a base connection.

use std::sync::Arc;
use std::time::Duration;

use canopy_common::kube_utils::{KubeResourceClient, ResourceClient};
use canopy_common::{Error, ROOT_WORKSPACE};

/// Default connection timeout for workspace clients
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for workspace clients
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A validated workspace path such as `root:orgs:acme`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    /// Parse and validate a full workspace path
    pub fn parse(path: &str) -> Result<Self, Error> {
        if path.is_empty() {
            return Err(Error::validation_for_field("workspacePath", "must not be empty"));
        }
        let mut segments = path.split(':');
        if segments.next() != Some(ROOT_WORKSPACE) {
            return Err(Error::validation_for_field(
                "workspacePath",
                format!("'{path}' must start with '{ROOT_WORKSPACE}'"),
            ));
        }
        for segment in segments {
            if !is_valid_segment(segment) {
                return Err(Error::validation_for_field(
                    "workspacePath",
                    format!("'{path}' has invalid segment '{segment}'"),
                ));
            }
        }
        Ok(Self(path.to_string()))
    }

    /// Resolve a name that is either a full path or a child of `root`
    pub fn resolve(name: &str) -> Result<Self, Error> {
        if name == ROOT_WORKSPACE || name.starts_with("root:") {
            Self::parse(name)
        } else {
            Self::parse(&format!("{ROOT_WORKSPACE}:{name}"))
        }
    }

    /// The root workspace
    pub fn root() -> Self {
        Self(ROOT_WORKSPACE.to_string())
    }

    /// Path as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent path; `None` for root
    pub fn parent(&self) -> Option<WorkspacePath> {
        self.0
            .rsplit_once(':')
            .map(|(parent, _)| WorkspacePath(parent.to_string()))
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase DNS label: `[a-z0-9]([-a-z0-9]*[a-z0-9])?`, at most 63 chars
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 63
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !segment.starts_with('-')
        && !segment.ends_with('-')
}

/// Build `<base>/clusters/<path>`, validating the base URL
pub fn workspace_url(base: &str, path: &WorkspacePath) -> Result<String, Error> {
    let uri: http::Uri = base
        .parse()
        .map_err(|e| Error::validation_for_field("url", format!("invalid URL '{base}': {e}")))?;
    if !matches!(uri.scheme_str(), Some("https" | "http")) || uri.authority().is_none() {
        return Err(Error::validation_for_field(
            "url",
            format!("'{base}' must be an absolute http(s) URL"),
        ));
    }
    Ok(format!(
        "{}/clusters/{}",
        strip_cluster_suffix(base.trim_end_matches('/')),
        path
    ))
}

/// Drop an existing `/clusters/<path>` suffix so URLs never nest
fn strip_cluster_suffix(url: &str) -> &str {
    match url.find("/clusters/") {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Produces API clients scoped to a workspace
pub trait WorkspaceClientFactory: Send + Sync {
    /// Client for the given workspace
    fn for_workspace(&self, path: &WorkspacePath) -> Result<Arc<dyn ResourceClient>, Error>;

    /// Base URL the clients are derived from
    fn base_url(&self) -> String;
}

/// `WorkspaceClientFactory` deriving clients from a base kube `Config`
#[derive(Clone)]
pub struct KubeWorkspaceClientFactory {
    base: kube::Config,
    base_url: String,
}

impl KubeWorkspaceClientFactory {
    /// Create a factory from a connection to the control plane front proxy
    pub fn new(mut base: kube::Config) -> Self {
        let base_url = strip_cluster_suffix(base.cluster_url.to_string().trim_end_matches('/'))
            .to_string();
        base.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
        base.read_timeout = Some(DEFAULT_READ_TIMEOUT);
        Self { base, base_url }
    }
}

impl WorkspaceClientFactory for KubeWorkspaceClientFactory {
    fn for_workspace(&self, path: &WorkspacePath) -> Result<Arc<dyn ResourceClient>, Error> {
        let url = workspace_url(&self.base_url, path)?;
        let mut config = self.base.clone();
        config.cluster_url = url.parse().map_err(|e| {
            Error::validation_for_field("url", format!("invalid workspace URL '{url}': {e}"))
        })?;
        let client = kube::Client::try_from(config)?;
        Ok(Arc::new(KubeResourceClient::new(client)))
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }
}
