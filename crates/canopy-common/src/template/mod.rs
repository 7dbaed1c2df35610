//! Manifest templating for workspace bootstrap
//!
//! Workspace manifests are minijinja templates rendered against the Platform
//! spec, free-form values, and the identity inventory discovered for the
//! current pass. A template that renders to nothing is skipped, so a
//! manifest can be conditionally absent.
//!
//! # Helpers
//!
//! - Filters: `default`, `to_yaml`/`toYaml`, `indent`, `nindent`, `quote`,
//!   `required`, `b64enc`
//! - Functions: `all(...)`, `any(...)`
//! - The `and`, `or`, and `not` operators are part of the template syntax

mod context;
mod engine;
mod error;
mod filters;

pub use context::{TemplateContext, TemplateContextBuilder};
pub use engine::TemplateEngine;
pub use error::TemplateError;
