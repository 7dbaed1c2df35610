//! Variables available to workspace manifest templates
//!
//! - `{{ spec.* }}` - the Platform spec, camelCase keys as in the CRD
//! - `{{ values.* }}` - free-form values from the Platform spec
//! - `{{ identities["tenancy.kcp.io"] }}` - discovered APIExport identity hashes
//! - `{{ workspace }}` - path of the workspace the manifest is applied to

use std::collections::BTreeMap;

use minijinja::Value;
use serde_json::Value as JsonValue;

/// Template context containing all values available for rendering
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    /// Serialized instance spec
    pub spec: JsonValue,
    /// Free-form values
    pub values: JsonValue,
    /// Identity hashes keyed by export name; empty when discovery failed
    pub identities: BTreeMap<String, String>,
    /// Workspace path the rendered objects are written to
    pub workspace: String,
}

impl TemplateContext {
    /// Create a new builder for TemplateContext
    pub fn builder() -> TemplateContextBuilder {
        TemplateContextBuilder::default()
    }

    /// Convert to minijinja Value for rendering
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("spec", Value::from_serialize(&self.spec));
        map.insert("values", Value::from_serialize(&self.values));
        map.insert("identities", Value::from_serialize(&self.identities));
        map.insert("workspace", Value::from(self.workspace.clone()));
        Value::from_iter(map)
    }
}

/// Builder for TemplateContext
#[derive(Debug, Default)]
pub struct TemplateContextBuilder {
    spec: Option<JsonValue>,
    values: Option<JsonValue>,
    identities: BTreeMap<String, String>,
    workspace: String,
}

impl TemplateContextBuilder {
    /// Set the serialized instance spec
    pub fn spec(mut self, spec: JsonValue) -> Self {
        self.spec = Some(spec);
        self
    }

    /// Set the free-form values
    pub fn values(mut self, values: JsonValue) -> Self {
        self.values = Some(values);
        self
    }

    /// Add one identity hash
    pub fn identity(mut self, export: impl Into<String>, hash: impl Into<String>) -> Self {
        self.identities.insert(export.into(), hash.into());
        self
    }

    /// Replace all identity hashes
    pub fn identities(mut self, identities: BTreeMap<String, String>) -> Self {
        self.identities = identities;
        self
    }

    /// Set the target workspace path
    pub fn workspace(mut self, path: impl Into<String>) -> Self {
        self.workspace = path.into();
        self
    }

    /// Build the TemplateContext
    pub fn build(self) -> TemplateContext {
        TemplateContext {
            spec: self.spec.unwrap_or_else(empty_object),
            values: self.values.unwrap_or_else(empty_object),
            identities: self.identities,
            workspace: self.workspace,
        }
    }
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}
