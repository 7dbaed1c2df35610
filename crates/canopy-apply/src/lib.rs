//! Merge and apply engine for Canopy
//!
//! Writes go out as non-forcing server-side apply first. When the server
//! rejects the patch for a recognized reason (schema rejection, typed patch
//! failure, field ownership conflict) the engine falls back once to
//! get → merge → create/replace, merging per field according to a static
//! ownership policy table.

#![deny(missing_docs)]

pub mod classify;
pub mod engine;
pub mod merge;
pub mod policy;

pub use classify::{classify, ApplyErrorClass};
pub use engine::{ApplyEngine, ApplyOutcome};
pub use merge::{merge_maps_with_deletion, merge_prefer_live, reconcile};
pub use policy::{policy_for, strip_unmanaged, FieldPolicy};
