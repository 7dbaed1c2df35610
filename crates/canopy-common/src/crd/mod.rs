//! Custom Resource Definitions for Canopy

mod platform;
mod types;

pub use platform::{
    InitializerConnection, KcpSpec, Platform, PlatformPhase, PlatformSpec, PlatformStatus,
    ProviderConnection, WorkspaceState,
};
pub use types::{Condition, ConditionStatus};
