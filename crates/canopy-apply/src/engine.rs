//! Apply engine: server-side apply with a single get → merge → write fallback

use canopy_common::error::is_transient_kube_error;
use canopy_common::kube_utils::{ResourceClient, ResourceKey};
use canopy_common::{Error, FIELD_MANAGER};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{classify, ApplyErrorClass};
use crate::merge::reconcile;
use crate::policy::strip_unmanaged;

/// How an object was persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Server-side apply succeeded
    Applied,
    /// Server-side apply was rejected for a recognized reason and the
    /// object was written by get → merge → create/replace instead
    AppliedViaFallback,
}

/// Writes desired objects through a [`ResourceClient`]
///
/// One write on the happy path; at most one read plus one write on fallback.
/// There is no retry loop: the controller's requeue is the retry.
#[derive(Clone, Debug)]
pub struct ApplyEngine {
    field_manager: String,
    cancel: CancellationToken,
}

impl Default for ApplyEngine {
    fn default() -> Self {
        Self::new(FIELD_MANAGER)
    }
}

impl ApplyEngine {
    /// Create an engine writing under the given field manager
    pub fn new(field_manager: impl Into<String>) -> Self {
        Self {
            field_manager: field_manager.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Refuse to start writes once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Field manager used for server-side apply
    pub fn field_manager(&self) -> &str {
        &self.field_manager
    }

    /// `Err(Error::Cancelled)` once the cancellation token has fired
    ///
    /// Callers writing outside [`ApplyEngine::apply`] check this before each
    /// write so the whole write path stops together.
    pub fn ensure_not_cancelled(&self) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Persist `desired`
    ///
    /// Unmanaged fields are stripped from every body sent to the server.
    pub async fn apply(
        &self,
        client: &dyn ResourceClient,
        desired: &Value,
    ) -> Result<ApplyOutcome, Error> {
        let key = ResourceKey::from_object(desired)?;
        let mut body = desired.clone();
        strip_unmanaged(&mut body);

        self.ensure_not_cancelled()?;
        let err = match client.apply(&key, &body, &self.field_manager).await {
            Ok(_) => {
                debug!(resource = %key, "applied");
                return Ok(ApplyOutcome::Applied);
            }
            Err(e) => e,
        };

        let class = classify(&err);
        if !class.allows_fallback() {
            return Err(wrap(&key, "server-side apply failed", err));
        }

        warn!(resource = %key, reason = %class, error = %err, "server-side apply rejected, falling back to update");
        self.fallback(client, &key, &body, class).await?;
        info!(resource = %key, "applied via fallback");
        Ok(ApplyOutcome::AppliedViaFallback)
    }

    async fn fallback(
        &self,
        client: &dyn ResourceClient,
        key: &ResourceKey,
        desired: &Value,
        class: ApplyErrorClass,
    ) -> Result<(), Error> {
        let live = client
            .get(key)
            .await
            .map_err(|e| wrap(key, &format!("read after {class}"), e))?;

        let merged = reconcile(desired, live.as_ref());

        self.ensure_not_cancelled()?;
        let result = match live {
            Some(_) => client.replace(key, &merged).await,
            None => client.create(key, &merged).await,
        };
        result
            .map(|_| ())
            .map_err(|e| wrap(key, &format!("update after {class}"), e))
    }
}

fn wrap(key: &ResourceKey, step: &str, err: kube::Error) -> Error {
    Error::apply(
        &key.kind,
        &key.name,
        format!("{step}: {err}"),
        is_transient_kube_error(&err),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_common::testing::{api_error, FakeApiServer, Verb};
    use serde_json::json;

    fn helm_release(interval: &str, values: Value) -> Value {
        json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {"name": "kcp", "namespace": "canopy-system"},
            "spec": {"interval": interval, "values": values}
        })
    }

    fn key() -> ResourceKey {
        ResourceKey::namespaced(
            "helm.toolkit.fluxcd.io/v2",
            "HelmRelease",
            "canopy-system",
            "kcp",
        )
    }

    fn ownership_conflict() -> kube::error::ErrorResponse {
        api_error(
            409,
            "Conflict",
            "Apply failed with 1 conflict: conflict with \"helm-controller\": .spec.interval",
        )
    }

    #[tokio::test]
    async fn happy_path_is_a_single_write() {
        let fake = FakeApiServer::new();
        let engine = ApplyEngine::default();

        let outcome = engine
            .apply(&fake, &helm_release("5m", json!({})))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(fake.verbs_for(&key()), vec![Verb::Apply]);
    }

    /// Story: the Flux controller owns `interval`; a conflicting apply falls
    /// back to a merged update that keeps the live interval and user values.
    #[tokio::test]
    async fn story_ownership_conflict_falls_back_to_merged_replace() {
        let fake = FakeApiServer::new().with_object(helm_release(
            "10m",
            json!({"replicas": 3, "tuned": true}),
        ));
        fake.fail_once(Verb::Apply, Some("HelmRelease"), ownership_conflict());
        let engine = ApplyEngine::default();

        let outcome = engine
            .apply(&fake, &helm_release("5m", json!({"replicas": 1, "image": "kcp:1"})))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::AppliedViaFallback);
        assert_eq!(
            fake.verbs_for(&key()),
            vec![Verb::Apply, Verb::Get, Verb::Replace]
        );
        let stored = fake.object(&key()).unwrap();
        assert_eq!(stored["spec"]["interval"], "10m");
        assert_eq!(
            stored["spec"]["values"],
            json!({"replicas": 3, "tuned": true, "image": "kcp:1"})
        );
    }

    #[tokio::test]
    async fn fallback_creates_when_object_is_absent() {
        let fake = FakeApiServer::new();
        fake.fail_once(
            Verb::Apply,
            None,
            api_error(500, "InternalError", "failed to create typed patch object: boom"),
        );
        let desired = helm_release("5m", json!({"a": 1}));

        let outcome = ApplyEngine::default().apply(&fake, &desired).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::AppliedViaFallback);
        assert_eq!(
            fake.verbs_for(&key()),
            vec![Verb::Apply, Verb::Get, Verb::Create]
        );
        let stored = fake.object(&key()).unwrap();
        assert_eq!(stored["spec"]["values"], json!({"a": 1}));
        assert!(stored["spec"].get("interval").is_none());
    }

    /// Story: Flux owns `interval`. A fresh release is applied without it and
    /// a later apply leaves the controller's live value in place.
    #[tokio::test]
    async fn story_unmanaged_interval_is_never_written() {
        let fake = FakeApiServer::new();
        let engine = ApplyEngine::default();

        engine
            .apply(&fake, &helm_release("5m", json!({"replicas": 1})))
            .await
            .unwrap();
        let created = fake.object(&key()).unwrap();
        assert!(created["spec"].get("interval").is_none());
        assert_eq!(created["spec"]["values"], json!({"replicas": 1}));

        fake.insert(helm_release("10m", json!({"replicas": 1})));
        engine
            .apply(&fake, &helm_release("5m", json!({"replicas": 2})))
            .await
            .unwrap();
        let updated = fake.object(&key()).unwrap();
        assert_eq!(updated["spec"]["interval"], "10m");
        assert_eq!(updated["spec"]["values"], json!({"replicas": 2}));
    }

    #[tokio::test]
    async fn terminal_errors_do_not_fall_back() {
        let fake = FakeApiServer::new();
        fake.fail(Verb::Apply, None, api_error(403, "Forbidden", "denied"));

        let err = ApplyEngine::default()
            .apply(&fake, &helm_release("5m", json!({})))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(err.to_string().contains("HelmRelease/kcp"));
        assert_eq!(fake.verbs_for(&key()), vec![Verb::Apply]);
    }

    #[tokio::test]
    async fn fallback_is_attempted_at_most_once() {
        let fake = FakeApiServer::new().with_object(helm_release("10m", json!({})));
        fake.fail(Verb::Apply, None, ownership_conflict());
        fake.fail(
            Verb::Replace,
            None,
            api_error(409, "Conflict", "the object has been modified"),
        );

        let err = ApplyEngine::default()
            .apply(&fake, &helm_release("5m", json!({})))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(
            fake.verbs_for(&key()),
            vec![Verb::Apply, Verb::Get, Verb::Replace]
        );
    }

    #[tokio::test]
    async fn transport_failures_are_retryable() {
        let fake = FakeApiServer::new();
        fake.fail(
            Verb::Apply,
            None,
            api_error(503, "ServiceUnavailable", "etcd leader changed"),
        );

        let err = ApplyEngine::default()
            .apply(&fake, &helm_release("5m", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cancelled_engine_issues_no_writes() {
        let fake = FakeApiServer::new();
        let token = CancellationToken::new();
        token.cancel();
        let engine = ApplyEngine::default().with_cancellation(token);

        let err = engine
            .apply(&fake, &helm_release("5m", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn objects_without_identity_are_rejected() {
        let fake = FakeApiServer::new();
        let err = ApplyEngine::default()
            .apply(&fake, &json!({"kind": "ConfigMap", "metadata": {"name": "x"}}))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(fake.calls().is_empty());
    }
}
