//! Workspace tree support for Canopy
//!
//! - [`client`]: API clients scoped to a workspace path
//! - [`inventory`]: identity hashes of well-known APIExports
//! - [`structure`]: the ordered list of workspaces and their manifest files
//! - [`bootstrap`]: renders and applies each workspace's manifests in order,
//!   yielding a requeue while a workspace is not ready

#![deny(missing_docs)]

pub mod bootstrap;
pub mod client;
pub mod inventory;
pub mod structure;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bootstrap::{BootstrapOutcome, BootstrapReport, Bootstrapper, NodeState};
pub use client::{
    workspace_url, KubeWorkspaceClientFactory, WorkspaceClientFactory, WorkspacePath,
};
pub use inventory::{discover_identities, IdentityInventory, InventoryError};
pub use structure::{DirectoryStructure, WorkspaceNode};
