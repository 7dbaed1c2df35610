//! Least-privilege RBAC derived from an APIExport
//!
//! Derivation is pure: the same export always yields the same rules, in the
//! same order. Exported resources and permission claims are read from both
//! the `v1alpha1` (`latestResourceSchemas`) and `v1alpha2` (`resources`,
//! claim `verbs`) shapes of the export.

use std::collections::BTreeSet;

use k8s_openapi::api::rbac::v1::PolicyRule;
use serde_json::Value;

/// API group of kcp's APIs
pub const KCP_APIS_GROUP: &str = "apis.kcp.io";

/// Verbs that mutate an object; a claim with any of them may write status
const WRITE_VERBS: &[&str] = &["*", "create", "update", "patch", "delete", "deletecollection"];

/// Verbs granted on the status subresource
const STATUS_VERBS: &[&str] = &["get", "update", "patch"];

/// Verbs granted for read-only access
const READ_VERBS: &[&str] = &["get", "list", "watch"];

/// Discovery endpoints a client needs before it can use the exported APIs
const DISCOVERY_URLS: &[&str] = &["/api", "/api/*", "/apis", "/apis/*", "/version", "/openapi/*"];

/// A (group, resource) pair served by the export
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ExportedResource {
    group: String,
    resource: String,
}

/// A permission claim on another API
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Claim {
    group: String,
    resource: String,
    verbs: Vec<String>,
}

/// Derive the rules a consumer of `export` needs
///
/// `export` is the APIExport document; its `metadata.name` scopes the
/// `apiexports/content` rule.
pub fn derive_rules(export: &Value) -> Vec<PolicyRule> {
    let export_name = export
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let spec = export.get("spec").unwrap_or(&Value::Null);

    let mut rules = Vec::new();

    for exported in exported_resources(spec) {
        rules.push(rule(&exported.group, &exported.resource, &["*"]));
        rules.push(rule(
            &exported.group,
            &format!("{}/status", exported.resource),
            STATUS_VERBS,
        ));
    }

    for claim in claims(spec) {
        let verbs: Vec<&str> = claim.verbs.iter().map(String::as_str).collect();
        rules.push(rule(&claim.group, &claim.resource, &verbs));
        if verbs.iter().any(|v| WRITE_VERBS.contains(v)) {
            rules.push(rule(
                &claim.group,
                &format!("{}/status", claim.resource),
                STATUS_VERBS,
            ));
        }
    }

    rules.push(PolicyRule {
        resource_names: Some(vec![export_name.to_string()]),
        ..rule(KCP_APIS_GROUP, "apiexports/content", &["*"])
    });
    rules.push(rule(KCP_APIS_GROUP, "apiexportendpointslices", READ_VERBS));
    rules.push(rule(KCP_APIS_GROUP, "apibindings", READ_VERBS));
    rules.push(PolicyRule {
        non_resource_urls: Some(DISCOVERY_URLS.iter().map(|u| u.to_string()).collect()),
        verbs: vec!["get".to_string()],
        ..Default::default()
    });

    rules
}

fn rule(group: &str, resource: &str, verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(vec![resource.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

fn exported_resources(spec: &Value) -> BTreeSet<ExportedResource> {
    let mut out = BTreeSet::new();

    // v1alpha2: resources[].{group, name}
    for res in array(spec, "resources") {
        if let Some(name) = res.get("name").and_then(Value::as_str) {
            out.insert(ExportedResource {
                group: str_field(res, "group"),
                resource: name.to_string(),
            });
        }
    }

    // v1alpha1: schema names are `<prefix>.<resource>.<group>`
    for schema in array(spec, "latestResourceSchemas") {
        let Some((_, rest)) = schema.as_str().and_then(|s| s.split_once('.')) else {
            continue;
        };
        let (resource, group) = rest.split_once('.').unwrap_or((rest, ""));
        if !resource.is_empty() {
            out.insert(ExportedResource {
                group: group.to_string(),
                resource: resource.to_string(),
            });
        }
    }

    out
}

fn claims(spec: &Value) -> BTreeSet<Claim> {
    array(spec, "permissionClaims")
        .filter_map(|claim| {
            let resource = claim.get("resource").and_then(Value::as_str)?;
            let mut verbs: Vec<String> = claim
                .get("verbs")
                .and_then(Value::as_array)
                .map(|vs| {
                    vs.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if verbs.is_empty() {
                verbs.push("*".to_string());
            }
            verbs.sort();
            verbs.dedup();
            Some(Claim {
                group: str_field(claim, "group"),
                resource: resource.to_string(),
                verbs,
            })
        })
        .collect()
}

fn array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
