//! Identity inventory of well-known APIExports
//!
//! Templates reference a provider's identity hash (to scope permission
//! claims, for example) without hard-coding it. The inventory is rebuilt
//! from scratch on every bootstrap pass and never persisted.

use std::collections::BTreeMap;

use canopy_common::config::IdentityExport;
use canopy_common::kube_utils::ResourceKey;
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::{WorkspaceClientFactory, WorkspacePath};

/// APIVersion of kcp's APIExport
pub const APIEXPORT_API_VERSION: &str = "apis.kcp.io/v1alpha1";

/// Export name → identity hash; empty string when discovery failed
pub type IdentityInventory = BTreeMap<String, String>;

/// Some lookups failed; `partial` still holds every successful one
#[derive(Debug, Error)]
#[error("identity lookup failed for {}", describe_failures(.failures))]
pub struct InventoryError {
    /// Inventory with empty strings for the failed names
    pub partial: IdentityInventory,
    /// Failed export names with the reason each failed
    pub failures: Vec<(String, String)>,
}

impl InventoryError {
    /// Names whose lookup failed
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|(name, _)| name.as_str()).collect()
    }
}

fn describe_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, reason)| format!("{name} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Look up the identity hash of each export independently
///
/// A failure on one export does not stop the others; if any failed the
/// error carries the partial inventory so the caller can proceed degraded.
pub async fn discover_identities(
    factory: &dyn WorkspaceClientFactory,
    exports: &[IdentityExport],
) -> Result<IdentityInventory, InventoryError> {
    let mut inventory = IdentityInventory::new();
    let mut failures = Vec::new();

    for export in exports {
        match lookup_identity(factory, export).await {
            Ok(hash) => {
                debug!(export = %export.name, "discovered identity hash");
                inventory.insert(export.name.clone(), hash);
            }
            Err(reason) => {
                warn!(export = %export.name, workspace = %export.workspace_path, %reason, "identity lookup failed");
                inventory.insert(export.name.clone(), String::new());
                failures.push((export.name.clone(), reason));
            }
        }
    }

    if failures.is_empty() {
        Ok(inventory)
    } else {
        Err(InventoryError {
            partial: inventory,
            failures,
        })
    }
}

async fn lookup_identity(
    factory: &dyn WorkspaceClientFactory,
    export: &IdentityExport,
) -> Result<String, String> {
    let path = WorkspacePath::parse(&export.workspace_path).map_err(|e| e.to_string())?;
    let client = factory.for_workspace(&path).map_err(|e| e.to_string())?;
    let key = ResourceKey::cluster(APIEXPORT_API_VERSION, "APIExport", &export.name);

    let obj = client
        .get(&key)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "not found".to_string())?;

    obj.pointer("/status/identityHash")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| "status.identityHash not set".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWorkspaces;
    use canopy_common::testing::{api_error, Verb};
    use serde_json::json;

    fn api_export(name: &str, hash: Option<&str>) -> serde_json::Value {
        let mut obj = json!({
            "apiVersion": APIEXPORT_API_VERSION,
            "kind": "APIExport",
            "metadata": {"name": name}
        });
        if let Some(hash) = hash {
            obj["status"] = json!({"identityHash": hash});
        }
        obj
    }

    fn exports() -> Vec<IdentityExport> {
        vec![
            IdentityExport::new("tenancy.kcp.io", "root"),
            IdentityExport::new("topology.kcp.io", "root"),
            IdentityExport::new("shards.core.kcp.io", "root"),
        ]
    }

    #[tokio::test]
    async fn all_lookups_succeed() {
        let workspaces = FakeWorkspaces::new();
        let root = workspaces.workspace("root");
        root.insert(api_export("tenancy.kcp.io", Some("t-hash")));
        root.insert(api_export("topology.kcp.io", Some("p-hash")));
        root.insert(api_export("shards.core.kcp.io", Some("s-hash")));

        let inventory = discover_identities(&workspaces, &exports()).await.unwrap();
        assert_eq!(inventory["tenancy.kcp.io"], "t-hash");
        assert_eq!(inventory.len(), 3);
    }

    /// Story: two of three exports resolve; the third is missing. The caller
    /// gets both hashes, an empty entry for the third, and an error naming it.
    #[tokio::test]
    async fn story_partial_failure_returns_partial_map() {
        let workspaces = FakeWorkspaces::new();
        let root = workspaces.workspace("root");
        root.insert(api_export("tenancy.kcp.io", Some("t-hash")));
        root.insert(api_export("topology.kcp.io", Some("p-hash")));

        let err = discover_identities(&workspaces, &exports()).await.unwrap_err();

        let populated = err.partial.values().filter(|v| !v.is_empty()).count();
        assert_eq!(populated, 2);
        assert_eq!(err.partial["shards.core.kcp.io"], "");
        assert_eq!(err.failed_names(), vec!["shards.core.kcp.io"]);
        assert!(err.to_string().contains("shards.core.kcp.io (not found)"));
    }

    #[tokio::test]
    async fn api_errors_do_not_stop_other_lookups() {
        let workspaces = FakeWorkspaces::new();
        let root = workspaces.workspace("root");
        root.insert(api_export("topology.kcp.io", Some("p-hash")));
        root.insert(api_export("shards.core.kcp.io", None));
        root.fail_once(Verb::Get, Some("APIExport"), api_error(500, "InternalError", "boom"));

        let err = discover_identities(&workspaces, &exports()).await.unwrap_err();

        assert_eq!(err.partial["topology.kcp.io"], "p-hash");
        assert_eq!(
            err.failed_names(),
            vec!["tenancy.kcp.io", "shards.core.kcp.io"]
        );
        assert_eq!(root.calls().len(), 3);
    }
}
