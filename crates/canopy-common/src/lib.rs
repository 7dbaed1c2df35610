//! Common types for Canopy: CRDs, errors, configuration, templates, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod template;
pub mod yaml;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::OperatorConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager identity used for every write the operator performs
pub const FIELD_MANAGER: &str = "canopy-operator";

/// Namespace the operator runs in and writes provider secrets to by default
pub const CANOPY_SYSTEM_NAMESPACE: &str = "canopy-system";

/// Key under which synthesized kubeconfigs are stored in their Secret
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Label key for the component managing a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value marking resources as managed by Canopy
pub const LABEL_MANAGED_BY_CANOPY: &str = "canopy";

/// Name of the root workspace every workspace path descends from
pub const ROOT_WORKSPACE: &str = "root";
