//! Field ownership policies
//!
//! Each top-level `spec` field of a managed kind is merged by one of a closed
//! set of policies. Adding a managed kind is a new row in [`POLICY_TABLE`].

use serde_json::Value;

/// How a live object's spec field is reconciled against the desired one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Live wins on conflict and live-only keys are kept
    PreferLive,
    /// Result has exactly desired's keys (recursively); shared keys take live
    PruneToDesired,
    /// Desired overlays live
    DesiredWins,
    /// Owned by another controller; live value is carried through untouched
    Unmanaged,
}

impl std::fmt::Display for FieldPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreferLive => write!(f, "prefer-live"),
            Self::PruneToDesired => write!(f, "prune-to-desired"),
            Self::DesiredWins => write!(f, "desired-wins"),
            Self::Unmanaged => write!(f, "unmanaged"),
        }
    }
}

/// One (kind, spec field) policy assignment
#[derive(Clone, Copy, Debug)]
pub struct PolicyEntry {
    /// Object kind
    pub kind: &'static str,
    /// Top-level spec field
    pub field: &'static str,
    /// Policy
    pub policy: FieldPolicy,
}

const fn entry(kind: &'static str, field: &'static str, policy: FieldPolicy) -> PolicyEntry {
    PolicyEntry {
        kind,
        field,
        policy,
    }
}

/// Policies for kinds whose fields are shared with other writers.
/// Anything not listed is [`FieldPolicy::DesiredWins`].
pub const POLICY_TABLE: &[PolicyEntry] = &[
    // Users edit chart versions and values on live releases
    entry("HelmRelease", "chart", FieldPolicy::PreferLive),
    entry("HelmRelease", "values", FieldPolicy::PreferLive),
    // Reconciliation cadence belongs to the Flux controllers
    entry("HelmRelease", "interval", FieldPolicy::Unmanaged),
    // Source refs are an allow-list: a dropped tag/semver/branch must go away
    entry("OCIRepository", "ref", FieldPolicy::PruneToDesired),
    entry("GitRepository", "ref", FieldPolicy::PruneToDesired),
];

/// Policy for a kind's top-level spec field
pub fn policy_for(kind: &str, field: &str) -> FieldPolicy {
    POLICY_TABLE
        .iter()
        .find(|e| e.kind == kind && e.field == field)
        .map(|e| e.policy)
        .unwrap_or(FieldPolicy::DesiredWins)
}

/// Remove [`FieldPolicy::Unmanaged`] fields from a document's `spec`
///
/// Another controller owns these fields, so they never appear in a body the
/// engine sends for server-side apply or create.
pub fn strip_unmanaged(obj: &mut Value) {
    let Some(kind) = obj.get("kind").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    let Some(spec) = obj.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    for e in POLICY_TABLE
        .iter()
        .filter(|e| e.kind == kind && e.policy == FieldPolicy::Unmanaged)
    {
        spec.remove(e.field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("HelmRelease", "values", FieldPolicy::PreferLive)]
    #[case("HelmRelease", "chart", FieldPolicy::PreferLive)]
    #[case("HelmRelease", "interval", FieldPolicy::Unmanaged)]
    #[case("HelmRelease", "releaseName", FieldPolicy::DesiredWins)]
    #[case("OCIRepository", "ref", FieldPolicy::PruneToDesired)]
    #[case("GitRepository", "ref", FieldPolicy::PruneToDesired)]
    #[case("Workspace", "type", FieldPolicy::DesiredWins)]
    fn test_policy_lookup(#[case] kind: &str, #[case] field: &str, #[case] expected: FieldPolicy) {
        assert_eq!(policy_for(kind, field), expected);
    }

    #[test]
    fn test_table_has_no_duplicate_rows() {
        for (i, a) in POLICY_TABLE.iter().enumerate() {
            for b in &POLICY_TABLE[i + 1..] {
                assert!(
                    !(a.kind == b.kind && a.field == b.field),
                    "duplicate policy for {}.{}",
                    a.kind,
                    a.field
                );
            }
        }
    }

    #[test]
    fn test_strip_unmanaged_drops_only_owned_fields() {
        let mut release = json!({
            "kind": "HelmRelease",
            "spec": {"interval": "5m", "chart": {"spec": {"chart": "kcp"}}, "values": {}}
        });
        strip_unmanaged(&mut release);
        assert_eq!(
            release["spec"],
            json!({"chart": {"spec": {"chart": "kcp"}}, "values": {}})
        );
    }

    #[test]
    fn test_strip_unmanaged_leaves_other_kinds_alone() {
        let mut repo = json!({"kind": "OCIRepository", "spec": {"interval": "1m"}});
        let before = repo.clone();
        strip_unmanaged(&mut repo);
        assert_eq!(repo, before);

        let mut no_spec = json!({"kind": "HelmRelease", "metadata": {"name": "kcp"}});
        strip_unmanaged(&mut no_spec);
        assert_eq!(no_spec, json!({"kind": "HelmRelease", "metadata": {"name": "kcp"}}));
    }
}
