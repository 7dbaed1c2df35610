//! Error types for the Canopy operator
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant maps onto one retry class: not-ready and transient API errors are
//! retried by the controller, malformed input is terminal until the
//! operator's inputs change.

use thiserror::Error;

use crate::template::TemplateError;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Canopy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed input: missing identifiers, invalid URLs, bad documents
    #[error("validation error{}: {message}", field_suffix(.field))]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "capabilityName")
        field: Option<String>,
    },

    /// A dependency is not in the required state yet
    #[error("{resource} not ready: {message}")]
    NotReady {
        /// The resource being waited on (e.g., "workspace root:orgs")
        resource: String,
        /// Observed state
        message: String,
    },

    /// Manifest template could not be rendered or parsed
    #[error("template error in {source_name}: {message}")]
    Template {
        /// File or template name
        source_name: String,
        /// Description of what failed
        message: String,
    },

    /// Writing an object failed after all apply strategies were tried
    #[error("apply of {kind}/{name} failed: {message}")]
    Apply {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Description of what failed
        message: String,
        /// Whether the controller should retry
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// The caller cancelled the operation before a write was issued
    #[error("operation cancelled")]
    Cancelled,

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "bootstrap", "synthesizer")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-ready error for a resource
    pub fn not_ready(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NotReady {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a template error for a named template source
    pub fn template(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create an apply error
    pub fn apply(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::Apply {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
            retryable,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, template, and serialization errors need an input change
    /// and are not retried. Kubernetes errors are retried unless the API
    /// rejected the request itself (4xx other than conflicts and throttling).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => is_transient_kube_error(source),
            Error::Validation { .. } => false,
            Error::NotReady { .. } => true,
            Error::Template { .. } => false,
            Error::Apply { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Cancelled => true,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error only signals an unsatisfied dependency
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Error::NotReady { .. })
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Template { source_name, .. } => Some(source_name),
            _ => None,
        }
    }
}

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_deref()
        .map(|f| format!(" [{f}]"))
        .unwrap_or_default()
}

/// Whether a kube error is worth retrying without operator intervention
pub fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => !(400..500).contains(&ae.code) || matches!(ae.code, 409 | 429),
        _ => true,
    }
}

/// Whether a kube error is an HTTP 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a kube error is an "AlreadyExists" conflict on create
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

impl From<TemplateError> for Error {
    fn from(err: TemplateError) -> Self {
        Error::Template {
            source_name: UNKNOWN_CONTEXT.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(err.to_string())
    }
}
