//! In-memory workspace client factory for tests
//!
//! Hands out one [`FakeApiServer`] per workspace path, created on first use,
//! so tests can seed and inspect each workspace independently.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use canopy_common::kube_utils::ResourceClient;
use canopy_common::testing::FakeApiServer;
use canopy_common::Error;

use crate::client::{WorkspaceClientFactory, WorkspacePath};

/// Base URL reported by [`FakeWorkspaces`]
pub const FAKE_BASE_URL: &str = "https://kcp.test:6443";

/// One fake API server per workspace path
#[derive(Default)]
pub struct FakeWorkspaces {
    servers: Mutex<BTreeMap<String, Arc<FakeApiServer>>>,
    requested: Mutex<Vec<String>>,
}

impl FakeWorkspaces {
    /// Create an empty set of workspaces
    pub fn new() -> Self {
        Self::default()
    }

    /// The fake server for a workspace path, created on first use
    pub fn workspace(&self, path: &str) -> Arc<FakeApiServer> {
        self.servers
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .clone()
    }

    /// Workspace paths clients were requested for, in order
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }

    /// Total calls received across all workspaces
    pub fn total_calls(&self) -> usize {
        self.servers
            .lock()
            .unwrap()
            .values()
            .map(|s| s.calls().len())
            .sum()
    }
}

impl WorkspaceClientFactory for FakeWorkspaces {
    fn for_workspace(&self, path: &WorkspacePath) -> Result<Arc<dyn ResourceClient>, Error> {
        self.requested.lock().unwrap().push(path.to_string());
        Ok(self.workspace(path.as_str()))
    }

    fn base_url(&self) -> String {
        FAKE_BASE_URL.to_string()
    }
}
