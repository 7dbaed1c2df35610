//! In-memory API server for tests
//!
//! `FakeApiServer` implements [`ResourceClient`] over a map of documents,
//! records every call, and can be told to fail specific verbs with a
//! structured API error. It approximates server behavior closely enough for
//! the apply fallback paths: create conflicts on existing objects, replace
//! enforces `resourceVersion`, and server-side apply overlays onto the
//! stored object.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::error::ErrorResponse;
use serde_json::{Map, Value};

use crate::kube_utils::{ResourceClient, ResourceKey};

/// API verb observed by the fake
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// Read
    Get,
    /// Server-side apply
    Apply,
    /// Create
    Create,
    /// Replace (update)
    Replace,
    /// TokenRequest on a ServiceAccount
    RequestToken,
}

impl Verb {
    /// Whether this verb mutates server state
    pub fn is_write(self) -> bool {
        !matches!(self, Verb::Get)
    }
}

/// One call the fake received
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    /// Verb
    pub verb: Verb,
    /// Target object
    pub key: ResourceKey,
}

struct FailureRule {
    verb: Verb,
    kind: Option<String>,
    error: ErrorResponse,
    remaining: Option<usize>,
}

/// Build a structured API error like the server would return
pub fn api_error(code: u16, reason: &str, message: &str) -> ErrorResponse {
    ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    }
}

/// In-memory `ResourceClient`
#[derive(Default)]
pub struct FakeApiServer {
    objects: Mutex<BTreeMap<ResourceKey, Value>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<Vec<FailureRule>>,
    revision: AtomicU64,
}

impl FakeApiServer {
    /// Create an empty fake
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object (builder form)
    pub fn with_object(self, obj: Value) -> Self {
        self.insert(obj);
        self
    }

    /// Seed or overwrite an object without recording a call
    pub fn insert(&self, mut obj: Value) {
        let key = ResourceKey::from_object(&obj).expect("seeded object must have a key");
        self.stamp(&mut obj);
        self.objects.lock().unwrap().insert(key, obj);
    }

    /// Current stored object
    pub fn object(&self, key: &ResourceKey) -> Option<Value> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// All stored objects of a kind
    pub fn objects_of_kind(&self, kind: &str) -> Vec<Value> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Every call received, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that mutate state, in order
    pub fn write_calls(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.verb.is_write())
            .collect()
    }

    /// Verbs received for one object, in order
    pub fn verbs_for(&self, key: &ResourceKey) -> Vec<Verb> {
        self.calls()
            .into_iter()
            .filter(|c| &c.key == key)
            .map(|c| c.verb)
            .collect()
    }

    /// Fail every matching call; `kind: None` matches all kinds
    pub fn fail(&self, verb: Verb, kind: Option<&str>, error: ErrorResponse) {
        self.push_rule(verb, kind, error, None);
    }

    /// Fail the next matching call only
    pub fn fail_once(&self, verb: Verb, kind: Option<&str>, error: ErrorResponse) {
        self.push_rule(verb, kind, error, Some(1));
    }

    fn push_rule(
        &self,
        verb: Verb,
        kind: Option<&str>,
        error: ErrorResponse,
        remaining: Option<usize>,
    ) {
        self.failures.lock().unwrap().push(FailureRule {
            verb,
            kind: kind.map(str::to_string),
            error,
            remaining,
        });
    }

    fn record(&self, verb: Verb, key: &ResourceKey) -> Result<(), kube::Error> {
        self.calls.lock().unwrap().push(RecordedCall {
            verb,
            key: key.clone(),
        });

        let mut failures = self.failures.lock().unwrap();
        let hit = failures.iter_mut().find(|rule| {
            rule.verb == verb
                && rule.kind.as_deref().map_or(true, |k| k == key.kind)
                && rule.remaining != Some(0)
        });
        match hit {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                Err(kube::Error::Api(rule.error.clone()))
            }
            None => Ok(()),
        }
    }

    fn stamp(&self, obj: &mut Value) {
        let rv = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
        }
    }
}

fn overlay(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (k, v) in patch {
                overlay(base.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

fn resource_version(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

#[async_trait]
impl ResourceClient for FakeApiServer {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Value>, kube::Error> {
        self.record(Verb::Get, key)?;
        Ok(self.object(key))
    }

    async fn apply(
        &self,
        key: &ResourceKey,
        obj: &Value,
        _field_manager: &str,
    ) -> Result<Value, kube::Error> {
        self.record(Verb::Apply, key)?;
        let mut merged = self
            .object(key)
            .unwrap_or_else(|| Value::Object(Map::new()));
        overlay(&mut merged, obj);
        self.stamp(&mut merged);
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), merged.clone());
        Ok(merged)
    }

    async fn create(&self, key: &ResourceKey, obj: &Value) -> Result<Value, kube::Error> {
        self.record(Verb::Create, key)?;
        if self.object(key).is_some() {
            return Err(kube::Error::Api(api_error(
                409,
                "AlreadyExists",
                &format!("{key} already exists"),
            )));
        }
        let mut created = obj.clone();
        self.stamp(&mut created);
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), created.clone());
        Ok(created)
    }

    async fn replace(&self, key: &ResourceKey, obj: &Value) -> Result<Value, kube::Error> {
        self.record(Verb::Replace, key)?;
        let Some(current) = self.object(key) else {
            return Err(kube::Error::Api(api_error(
                404,
                "NotFound",
                &format!("{key} not found"),
            )));
        };
        if let Some(rv) = resource_version(obj) {
            if Some(rv) != resource_version(&current) {
                return Err(kube::Error::Api(api_error(
                    409,
                    "Conflict",
                    "the object has been modified; please apply your changes to the latest version and try again",
                )));
            }
        }
        let mut replaced = obj.clone();
        self.stamp(&mut replaced);
        self.objects
            .lock()
            .unwrap()
            .insert(key.clone(), replaced.clone());
        Ok(replaced)
    }

    async fn request_token(
        &self,
        namespace: &str,
        service_account: &str,
        _expiration_seconds: i64,
    ) -> Result<String, kube::Error> {
        let key = ResourceKey::namespaced("v1", "ServiceAccount", namespace, service_account);
        self.record(Verb::RequestToken, &key)?;
        if self.object(&key).is_none() {
            return Err(kube::Error::Api(api_error(
                404,
                "NotFound",
                &format!("serviceaccounts \"{service_account}\" not found"),
            )));
        }
        Ok(format!("token-{namespace}-{service_account}"))
    }
}
