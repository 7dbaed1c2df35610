//! Template engine for workspace manifests
//!
//! Uses minijinja with its standard `{{ }}` / `{% %}` syntax and chainable
//! undefined handling, so a missing key renders as empty instead of failing
//! and `{% if spec.kcp.enabled %}` works when `kcp` is absent. Rendered text
//! is parsed as a YAML document stream; an empty render means "skip".

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value as JsonValue;

use super::context::TemplateContext;
use super::error::TemplateError;
use super::filters;
use crate::yaml::parse_yaml_multi;

/// Template engine for manifest rendering
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine with the Helm-style helpers registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);

        env.add_filter("default", filters::default_filter);
        env.add_filter("to_yaml", filters::to_yaml);
        env.add_filter("toYaml", filters::to_yaml);
        env.add_filter("indent", filters::indent);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("quote", filters::quote);
        env.add_filter("required", filters::required);
        env.add_filter("b64enc", filters::b64enc);
        env.add_function("all", filters::all);
        env.add_function("any", filters::any);

        Self { env }
    }

    /// Render a template string with the given context
    pub fn render(
        &self,
        name: &str,
        template: &str,
        ctx: &TemplateContext,
    ) -> Result<String, TemplateError> {
        self.env
            .render_named_str(name, template, ctx.to_value())
            .map_err(TemplateError::from)
    }

    /// Render a manifest template into the objects it declares
    ///
    /// Returns an empty list when the template renders to nothing (only
    /// whitespace, comments, or document separators), which lets a manifest
    /// be conditionally absent.
    pub fn render_manifests(
        &self,
        name: &str,
        template: &str,
        ctx: &TemplateContext,
    ) -> Result<Vec<JsonValue>, TemplateError> {
        let rendered = self.render(name, template, ctx)?;
        if rendered.trim().is_empty() {
            return Ok(Vec::new());
        }

        let docs = parse_yaml_multi(&rendered)?;
        for doc in &docs {
            if !doc.is_object() {
                return Err(TemplateError::NotAnObject(describe(doc).to_string()));
            }
        }
        Ok(docs)
    }
}

fn describe(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a list",
        JsonValue::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TemplateContext {
        TemplateContext::builder()
            .spec(json!({"kcp": {"enabled": true, "domain": "kcp.example.com"}}))
            .values(json!({"helm": {"replicas": 2, "image": "ghcr.io/acme/api"}}))
            .identity("tenancy.kcp.io", "abc123")
            .identity("topology.kcp.io", "")
            .workspace("root:orgs")
            .build()
    }

    #[test]
    fn test_simple_variable() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "domain: {{ spec.kcp.domain }}", &ctx())
            .unwrap();
        assert_eq!(out, "domain: kcp.example.com");
    }

    #[test]
    fn test_missing_key_renders_empty_and_defaults() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "t",
                "[{{ spec.missing.deeper }}] {{ spec.logLevel | default(\"info\") }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(out, "[] info");
    }

    #[test]
    fn test_identity_lookup_by_bracket_path() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("t", "{{ identities[\"tenancy.kcp.io\"] }}", &ctx())
            .unwrap();
        assert_eq!(out, "abc123");
    }

    #[test]
    fn test_boolean_combinators() {
        let engine = TemplateEngine::new();
        let tpl = "{% if all(spec.kcp.enabled, values.helm) %}a{% endif %}\
                   {% if any(spec.missing, identities[\"topology.kcp.io\"]) %}b{% endif %}\
                   {% if not spec.missing and spec.kcp.enabled %}c{% endif %}";
        assert_eq!(engine.render("t", tpl, &ctx()).unwrap(), "ac");
    }

    #[test]
    fn test_to_yaml_with_nindent() {
        let engine = TemplateEngine::new();
        let tpl = "values:{{ values.helm | toYaml | nindent(2) }}";
        let out = engine.render("t", tpl, &ctx()).unwrap();
        assert_eq!(out, "values:\n  image: ghcr.io/acme/api\n  replicas: 2");
    }

    #[test]
    fn test_required_fails_render() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("t", "{{ spec.nope | required(\"nope is required\") }}", &ctx())
            .unwrap_err();
        assert!(err.to_string().contains("nope is required"));
    }

    #[test]
    fn test_render_manifests_parses_documents() {
        let engine = TemplateEngine::new();
        let tpl = r#"
apiVersion: tenancy.kcp.io/v1alpha1
kind: Workspace
metadata:
  name: orgs
---
apiVersion: apis.kcp.io/v1alpha1
kind: APIBinding
metadata:
  name: tenancy
spec:
  reference:
    export:
      path: root
      name: tenancy.kcp.io
  permissionClaims:
    - group: ""
      resource: secrets
      identityHash: {{ identities["tenancy.kcp.io"] | quote }}
"#;
        let docs = engine.render_manifests("orgs.yaml", tpl, &ctx()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "Workspace");
        assert_eq!(
            docs[1]["spec"]["permissionClaims"][0]["identityHash"],
            "abc123"
        );
    }

    #[test]
    fn test_empty_render_is_skipped() {
        let engine = TemplateEngine::new();
        let tpl = "{% if spec.missing %}\nkind: ConfigMap\n{% endif %}\n";
        let docs = engine.render_manifests("optional.yaml", tpl, &ctx()).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn test_non_mapping_document_is_rejected() {
        let engine = TemplateEngine::new();
        let err = engine
            .render_manifests("list.yaml", "- a\n- b\n", &ctx())
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotAnObject(_)));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let engine = TemplateEngine::new();
        let err = engine
            .render("broken.yaml", "{{ spec.kcp.domain ", &ctx())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }
}
