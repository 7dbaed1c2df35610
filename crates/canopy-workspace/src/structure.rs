//! Directory structure: the ordered workspace list and its manifest files
//!
//! ```yaml
//! workspaces:
//!   - name: root
//!     files:
//!       - root/workspace-types.yaml
//!       - root/orgs-workspace.yaml
//!   - name: orgs
//!     files:
//!       - orgs/apibindings.yaml
//! ```
//!
//! Order is significant: each workspace must be Ready before the next one's
//! manifests are applied, so parents come before children. Relative file
//! paths resolve against the structure file's directory.

use std::path::{Path, PathBuf};

use canopy_common::yaml::parse_yaml;
use canopy_common::Error;
use serde::Deserialize;

use crate::client::WorkspacePath;

/// One workspace and its manifest files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkspaceNode {
    /// Workspace path
    pub path: WorkspacePath,
    /// Manifest templates, applied in order
    pub files: Vec<PathBuf>,
}

/// Ordered list of workspace nodes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryStructure {
    /// Nodes in bootstrap order
    pub workspaces: Vec<WorkspaceNode>,
}

#[derive(Deserialize)]
struct RawStructure {
    #[serde(default)]
    workspaces: Vec<RawNode>,
}

#[derive(Deserialize)]
struct RawNode {
    name: String,
    #[serde(default)]
    files: Vec<PathBuf>,
}

impl DirectoryStructure {
    /// Parse a structure document, resolving relative files against `base_dir`
    pub fn from_yaml(yaml: &str, base_dir: &Path) -> Result<Self, Error> {
        let value = parse_yaml(yaml)
            .map_err(|e| Error::validation(format!("invalid structure file: {e}")))?;
        let raw: RawStructure = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("invalid structure file: {e}")))?;

        let workspaces = raw
            .workspaces
            .into_iter()
            .map(|node| {
                Ok(WorkspaceNode {
                    path: WorkspacePath::resolve(&node.name)?,
                    files: node
                        .files
                        .into_iter()
                        .map(|f| if f.is_absolute() { f } else { base_dir.join(f) })
                        .collect(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { workspaces })
    }

    /// Read and parse a structure file
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::internal_with_context(
                "structure",
                format!("failed to read {}: {e}", path.display()),
            )
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_yaml(&yaml, base_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURE: &str = r#"
workspaces:
  - name: root
    files:
      - root/orgs.yaml
      - /abs/shared.yaml
  - name: orgs
    files:
      - orgs/bindings.yaml
  - name: root:canopy-system
"#;

    #[test]
    fn test_parse_resolves_paths_and_files() {
        let s = DirectoryStructure::from_yaml(STRUCTURE, Path::new("/etc/canopy")).unwrap();
        let paths: Vec<_> = s.workspaces.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["root", "root:orgs", "root:canopy-system"]);
        assert_eq!(
            s.workspaces[0].files,
            vec![
                PathBuf::from("/etc/canopy/root/orgs.yaml"),
                PathBuf::from("/abs/shared.yaml")
            ]
        );
        assert!(s.workspaces[2].files.is_empty());
    }

    #[test]
    fn test_invalid_workspace_name_is_terminal() {
        let err = DirectoryStructure::from_yaml(
            "workspaces:\n  - name: Bad_Name\n",
            Path::new("."),
        )
        .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let err =
            DirectoryStructure::from_yaml("workspaces:\n  - files: [a.yaml]\n", Path::new("."))
                .unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure.yaml");
        std::fs::write(&path, STRUCTURE).unwrap();

        let s = DirectoryStructure::load(&path).await.unwrap();
        assert_eq!(s.workspaces.len(), 3);
        assert_eq!(s.workspaces[1].files[0], dir.path().join("orgs/bindings.yaml"));
    }

    #[tokio::test]
    async fn test_load_missing_file_is_retryable() {
        let err = DirectoryStructure::load(Path::new("/nonexistent/structure.yaml"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
