//! Scoped credentials for Canopy provider connections
//!
//! Derives least-privilege RBAC from an APIExport, provisions a service
//! identity in the provider workspace, mints a short-lived token, and writes
//! a workspace-scoped kubeconfig into a host-cluster Secret.

#![deny(missing_docs)]

pub mod connections;
pub mod identity;
pub mod kubeconfig;
pub mod rbac;
pub mod synthesizer;

pub use connections::{reconcile_connections, ConnectionReport};
pub use identity::{provision_identity, ServiceIdentity};
pub use kubeconfig::{Kubeconfig, ScopedCredential};
pub use rbac::derive_rules;
pub use synthesizer::{CredentialSynthesizer, SecretRef};
