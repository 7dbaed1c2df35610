//! Canopy operator: watches Platform resources and drives workspace
//! bootstrap and connection credential issuance

#![deny(missing_docs)]

pub mod controller;

pub use controller::{
    error_policy, reconcile, Context, PlatformKubeClient, PlatformKubeClientImpl,
};
