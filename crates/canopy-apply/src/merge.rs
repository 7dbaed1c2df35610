//! Desired/live document merging
//!
//! Maps merge recursively; scalars and lists are replaced wholesale and
//! never element-merged. No merge ever produces a key that is absent from
//! both inputs.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::policy::{policy_for, FieldPolicy};

/// A policy could not be applied to the shapes it was given
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    /// Pruning needs both sides to be maps
    #[error("cannot prune {field}: desired is {desired}, live is {live}")]
    TypeMismatch {
        /// Field being merged
        field: String,
        /// JSON type of the desired value
        desired: &'static str,
        /// JSON type of the live value
        live: &'static str,
    },
}

/// Merge preferring live: shared keys take live, live-only keys are kept,
/// desired-only keys are added. Maps on both sides recurse.
pub fn merge_prefer_live(desired: &Value, live: &Value) -> Value {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => {
            let mut out = l.clone();
            for (key, dv) in d {
                let merged = match l.get(key) {
                    Some(lv) => merge_prefer_live(dv, lv),
                    None => dv.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        (_, live) => live.clone(),
    }
}

/// Merge pruning to desired: the result's keys are exactly desired's keys,
/// recursively. Shared leaves take the live value; shared maps recurse with
/// the same rule; a map on only one side takes the desired value. A missing
/// desired map yields an empty map whatever `live` holds.
pub fn merge_maps_with_deletion(
    desired: Option<&Map<String, Value>>,
    live: &Map<String, Value>,
) -> Map<String, Value> {
    let Some(desired) = desired else {
        return Map::new();
    };

    desired
        .iter()
        .map(|(key, dv)| {
            let merged = match (dv, live.get(key)) {
                (Value::Object(d), Some(Value::Object(l))) => {
                    Value::Object(merge_maps_with_deletion(Some(d), l))
                }
                (Value::Object(_), Some(_)) | (_, Some(Value::Object(_))) | (_, None) => {
                    dv.clone()
                }
                (_, Some(lv)) => lv.clone(),
            };
            (key.clone(), merged)
        })
        .collect()
}

/// Recursive desired-wins overlay of `desired` onto `base`
pub fn merge_overlay(base: &mut Value, desired: &Value) {
    match (base, desired) {
        (Value::Object(base), Value::Object(desired)) => {
            for (key, dv) in desired {
                match base.get_mut(key) {
                    Some(bv) => merge_overlay(bv, dv),
                    None => {
                        base.insert(key.clone(), dv.clone());
                    }
                }
            }
        }
        (base, desired) => *base = desired.clone(),
    }
}

/// Merge one spec field by policy. `Ok(None)` removes the field.
pub fn merge_field(
    field: &str,
    policy: FieldPolicy,
    desired: Option<&Value>,
    live: Option<&Value>,
) -> Result<Option<Value>, MergeError> {
    Ok(match (policy, desired, live) {
        (FieldPolicy::Unmanaged, _, live) => live.cloned(),
        (FieldPolicy::PruneToDesired, None, _) => None,
        (_, None, live) => live.cloned(),
        (_, Some(d), None) => Some(d.clone()),
        (FieldPolicy::PreferLive, Some(d), Some(l)) => Some(merge_prefer_live(d, l)),
        (FieldPolicy::PruneToDesired, Some(d), Some(l)) => match (d, l) {
            (Value::Object(d), Value::Object(l)) => {
                Some(Value::Object(merge_maps_with_deletion(Some(d), l)))
            }
            (d, l) => {
                return Err(MergeError::TypeMismatch {
                    field: field.to_string(),
                    desired: json_type(d),
                    live: json_type(l),
                })
            }
        },
        (FieldPolicy::DesiredWins, Some(d), Some(l)) => {
            let mut merged = l.clone();
            merge_overlay(&mut merged, d);
            Some(merged)
        }
    })
}

/// Compute the object to persist from a desired object and the live one.
///
/// Without a live object the result is exactly `desired`. With one, the
/// result starts from live: non-spec sections are overlaid desired-wins,
/// each spec field is merged by its kind's policy, live `status` is dropped,
/// and live `metadata.resourceVersion` is kept for optimistic concurrency.
/// A field whose policy cannot be applied falls back to the desired value.
pub fn reconcile(desired: &Value, live: Option<&Value>) -> Value {
    let Some(live) = live else {
        return desired.clone();
    };
    let (Some(desired_map), Some(live_map)) = (desired.as_object(), live.as_object()) else {
        return desired.clone();
    };

    let kind = desired_map
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut out = live_map.clone();
    out.remove("status");

    for (key, dv) in desired_map {
        match key.as_str() {
            "spec" | "status" => {}
            "metadata" => {
                let mut metadata = dv.clone();
                if let Some(meta) = metadata.as_object_mut() {
                    meta.remove("resourceVersion");
                }
                let slot = out
                    .entry("metadata")
                    .or_insert_with(|| Value::Object(Map::new()));
                merge_overlay(slot, &metadata);
            }
            _ => match out.get_mut(key) {
                Some(slot) => merge_overlay(slot, dv),
                None => {
                    out.insert(key.clone(), dv.clone());
                }
            },
        }
    }

    let desired_spec = desired_map.get("spec").and_then(Value::as_object);
    let live_spec = live_map.get("spec").and_then(Value::as_object);
    if desired_spec.is_some() || live_spec.is_some() {
        let empty = Map::new();
        let desired_spec = desired_spec.unwrap_or(&empty);
        let live_spec = live_spec.unwrap_or(&empty);

        let mut spec = Map::new();
        let fields = live_spec
            .keys()
            .chain(desired_spec.keys().filter(|k| !live_spec.contains_key(*k)));
        for field in fields {
            let dv = desired_spec.get(field);
            let policy = policy_for(kind, field);
            let merged = merge_field(field, policy, dv, live_spec.get(field)).unwrap_or_else(|e| {
                warn!(%kind, %field, error = %e, "merge failed, using desired value");
                dv.cloned()
            });
            if let Some(value) = merged {
                spec.insert(field.clone(), value);
            }
        }
        out.insert("spec".to_string(), Value::Object(spec));
    }

    Value::Object(out)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys_recursive(value: &Value, prefix: &str, out: &mut Vec<String>) {
        if let Value::Object(map) = value {
            for (k, v) in map {
                let path = format!("{prefix}/{k}");
                out.push(path.clone());
                keys_recursive(v, &path, out);
            }
        }
    }

    fn key_set(value: &Value) -> Vec<String> {
        let mut out = Vec::new();
        keys_recursive(value, "", &mut out);
        out.sort();
        out
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    // ==========================================================================
    // Story Tests: pruning to desired
    // ==========================================================================

    /// Story: a live-only key disappears when desired is the allow-list.
    #[test]
    fn story_prune_drops_live_only_keys() {
        let desired = obj(json!({"a": "v1", "b": "v2"}));
        let live = obj(json!({"a": "v1", "b": "v2", "c": "v3"}));
        assert_eq!(
            Value::Object(merge_maps_with_deletion(Some(&desired), &live)),
            json!({"a": "v1", "b": "v2"})
        );
    }

    /// Story: nested live-only keys are pruned too, shared leaves keep live.
    #[test]
    fn story_prune_recurses_and_keeps_live_leaves() {
        let desired = obj(json!({"ref": {"tag": "1.2.0"}, "url": "oci://new"}));
        let live = obj(json!({
            "ref": {"tag": "1.1.0", "digest": "sha256:abc"},
            "url": "oci://old",
            "insecure": true
        }));
        let merged = Value::Object(merge_maps_with_deletion(Some(&desired), &live));
        assert_eq!(merged, json!({"ref": {"tag": "1.1.0"}, "url": "oci://old"}));
        assert_eq!(key_set(&merged), key_set(&Value::Object(desired)));
    }

    #[test]
    fn prune_adds_new_desired_leaves() {
        let desired = obj(json!({"ref": {"tag": "1.2.0", "semver": ">=1"}}));
        let live = obj(json!({"ref": {"tag": "1.1.0"}}));
        assert_eq!(
            Value::Object(merge_maps_with_deletion(Some(&desired), &live)),
            json!({"ref": {"tag": "1.1.0", "semver": ">=1"}})
        );
    }

    #[test]
    fn prune_without_desired_is_empty() {
        let live = obj(json!({"a": 1, "b": {"c": 2}}));
        assert!(merge_maps_with_deletion(None, &live).is_empty());
        assert!(merge_maps_with_deletion(None, &Map::new()).is_empty());
    }

    #[test]
    fn prune_key_set_matches_desired_for_varied_shapes() {
        let cases = [
            (json!({}), json!({"x": 1})),
            (json!({"x": {"y": {"z": 1}}}), json!({"x": {"y": {"z": 2, "w": 3}, "v": 4}})),
            (json!({"x": [1, 2]}), json!({"x": {"nested": true}, "y": null})),
            (json!({"x": {"y": 1}}), json!({"x": "scalar"})),
        ];
        for (desired, live) in cases {
            let merged = Value::Object(merge_maps_with_deletion(
                desired.as_object(),
                live.as_object().unwrap(),
            ));
            assert_eq!(key_set(&merged), key_set(&desired), "desired={desired} live={live}");
        }
    }

    // ==========================================================================
    // Story Tests: preferring live
    // ==========================================================================

    /// Story: a user tuned a release's values on the live object; the
    /// operator's desired values never clobber them.
    #[test]
    fn story_prefer_live_keeps_user_edits() {
        let desired = json!({"kcp": {"enabled": false, "domains": ["x", "y2"]}});
        let live = json!({
            "kcp": {"enabled": true, "url": "https://u", "domains": ["x", "y"]},
            "logLevel": "info"
        });
        let merged = merge_prefer_live(&desired, &live);
        assert_eq!(merged["kcp"]["enabled"], true);
        assert_eq!(merged["kcp"]["url"], "https://u");
        assert_eq!(merged["kcp"]["domains"], json!(["x", "y"]));
        assert_eq!(merged["logLevel"], "info");
    }

    #[test]
    fn prefer_live_adds_desired_only_keys() {
        let merged = merge_prefer_live(&json!({"new": 1, "a": 2}), &json!({"a": 3}));
        assert_eq!(merged, json!({"new": 1, "a": 3}));
    }

    #[test]
    fn prefer_live_on_scalars_takes_live() {
        assert_eq!(merge_prefer_live(&json!("d"), &json!("l")), json!("l"));
        assert_eq!(merge_prefer_live(&json!({"a": 1}), &json!([1])), json!([1]));
    }

    // ==========================================================================
    // reconcile
    // ==========================================================================

    fn helm_release(spec: Value) -> Value {
        json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {"name": "kcp", "namespace": "canopy-system"},
            "spec": spec
        })
    }

    #[test]
    fn reconcile_without_live_is_identity() {
        let desired = helm_release(json!({"interval": "5m", "values": {"a": 1}}));
        assert_eq!(reconcile(&desired, None), desired);
    }

    #[test]
    fn reconcile_applies_field_policies() {
        let desired = helm_release(json!({
            "interval": "5m",
            "values": {"replicas": 1, "image": "new"},
            "releaseName": "kcp",
        }));
        let mut live = helm_release(json!({
            "interval": "10m",
            "values": {"replicas": 3, "extra": true},
            "releaseName": "old",
            "suspend": false,
        }));
        live["metadata"]["resourceVersion"] = json!("42");
        live["status"] = json!({"ready": true});

        let merged = reconcile(&desired, Some(&live));
        assert_eq!(merged["spec"]["interval"], "10m");
        assert_eq!(
            merged["spec"]["values"],
            json!({"replicas": 3, "extra": true, "image": "new"})
        );
        assert_eq!(merged["spec"]["releaseName"], "kcp");
        assert_eq!(merged["spec"]["suspend"], false);
        assert_eq!(merged["metadata"]["resourceVersion"], "42");
        assert!(merged.get("status").is_none());
    }

    #[test]
    fn reconcile_prunes_source_ref() {
        let desired = json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1beta2",
            "kind": "OCIRepository",
            "metadata": {"name": "charts"},
            "spec": {"ref": {"tag": "1.2.0"}}
        });
        let live = json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1beta2",
            "kind": "OCIRepository",
            "metadata": {"name": "charts", "resourceVersion": "7"},
            "spec": {"ref": {"tag": "1.1.0", "semver": "1.x"}, "url": "oci://x"}
        });
        let merged = reconcile(&desired, Some(&live));
        assert_eq!(merged["spec"], json!({"ref": {"tag": "1.1.0"}, "url": "oci://x"}));
    }

    #[test]
    fn reconcile_prune_type_mismatch_uses_desired() {
        let desired = json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1",
            "kind": "GitRepository",
            "metadata": {"name": "repo"},
            "spec": {"ref": {"branch": "main"}}
        });
        let live = json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1",
            "kind": "GitRepository",
            "metadata": {"name": "repo"},
            "spec": {"ref": "main"}
        });
        let merged = reconcile(&desired, Some(&live));
        assert_eq!(merged["spec"]["ref"], json!({"branch": "main"}));
    }

    #[test]
    fn reconcile_overlays_labels_and_data() {
        let desired = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "s", "namespace": "ns", "labels": {"a": "1"}},
            "data": {"kubeconfig": "bmV3"}
        });
        let live = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {"name": "s", "namespace": "ns", "resourceVersion": "3", "labels": {"b": "2"}},
            "data": {"kubeconfig": "b2xk"},
            "type": "Opaque"
        });
        let merged = reconcile(&desired, Some(&live));
        assert_eq!(merged["data"]["kubeconfig"], "bmV3");
        assert_eq!(merged["metadata"]["labels"], json!({"a": "1", "b": "2"}));
        assert_eq!(merged["metadata"]["resourceVersion"], "3");
        assert_eq!(merged["type"], "Opaque");
    }

    #[test]
    fn merge_field_prune_without_desired_removes_field() {
        let live = json!({"tag": "1"});
        assert_eq!(
            merge_field("ref", FieldPolicy::PruneToDesired, None, Some(&live)),
            Ok(None)
        );
    }
}
