//! Classification of server-side apply failures
//!
//! The structured API status (HTTP code and reason) decides first. Only when
//! it is ambiguous (400, 422, and 500 all carry several unrelated failures)
//! does the message text get inspected, and that heuristic lives entirely in
//! [`classify_message`] so it can be replaced without touching callers.

use kube::error::ErrorResponse;

/// Why a server-side apply was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyErrorClass {
    /// The API rejected an unknown or undeclared field
    SchemaRejection,
    /// The server could not build a typed patch from the object
    TypedPatchFailure,
    /// Another field manager owns a field this write sets
    OwnershipConflict,
    /// Anything else; no alternate strategy will help
    Terminal,
}

impl ApplyErrorClass {
    /// Whether a get → merge → update fallback may succeed
    pub fn allows_fallback(self) -> bool {
        !matches!(self, ApplyErrorClass::Terminal)
    }
}

impl std::fmt::Display for ApplyErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaRejection => write!(f, "schema rejection"),
            Self::TypedPatchFailure => write!(f, "typed patch failure"),
            Self::OwnershipConflict => write!(f, "ownership conflict"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Classify an error returned by a server-side apply
pub fn classify(err: &kube::Error) -> ApplyErrorClass {
    match err {
        kube::Error::Api(status) => {
            classify_status(status).unwrap_or_else(|| classify_message(&status.message))
        }
        _ => ApplyErrorClass::Terminal,
    }
}

/// Structured classification; `None` when the status alone is ambiguous
fn classify_status(status: &ErrorResponse) -> Option<ApplyErrorClass> {
    match (status.code, status.reason.as_str()) {
        // A patch never creates, so a 409 on apply is a field manager conflict
        (409, "Conflict") => Some(ApplyErrorClass::OwnershipConflict),
        (400 | 422 | 500, _) => None,
        _ => Some(ApplyErrorClass::Terminal),
    }
}

/// Last-resort classification on the server's message text
pub fn classify_message(message: &str) -> ApplyErrorClass {
    let message = message.to_ascii_lowercase();
    if message.contains("failed to create typed patch object") {
        ApplyErrorClass::TypedPatchFailure
    } else if message.contains("field not declared in schema")
        || message.contains("unknown field")
        || message.contains("strict decoding error")
    {
        ApplyErrorClass::SchemaRejection
    } else if message.contains("apply failed with") && message.contains("conflict") {
        ApplyErrorClass::OwnershipConflict
    } else {
        ApplyErrorClass::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn api(code: u16, reason: &str, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[rstest]
    #[case(
        409,
        "Conflict",
        "Apply failed with 1 conflict: conflict with \"flux\": .spec.interval",
        ApplyErrorClass::OwnershipConflict
    )]
    #[case(
        500,
        "InternalError",
        "failed to create typed patch object (/v1, Kind=Secret): .data.x: expected string",
        ApplyErrorClass::TypedPatchFailure
    )]
    #[case(
        400,
        "BadRequest",
        ".spec.foo: field not declared in schema",
        ApplyErrorClass::SchemaRejection
    )]
    #[case(
        422,
        "Invalid",
        "strict decoding error: unknown field \"spec.bar\"",
        ApplyErrorClass::SchemaRejection
    )]
    #[case(422, "Invalid", "spec.name: Required value", ApplyErrorClass::Terminal)]
    #[case(403, "Forbidden", "unknown field access denied", ApplyErrorClass::Terminal)]
    #[case(404, "NotFound", "the server could not find the requested resource", ApplyErrorClass::Terminal)]
    #[case(503, "ServiceUnavailable", "apply failed with conflict", ApplyErrorClass::Terminal)]
    fn test_classify(
        #[case] code: u16,
        #[case] reason: &str,
        #[case] message: &str,
        #[case] expected: ApplyErrorClass,
    ) {
        assert_eq!(classify(&api(code, reason, message)), expected);
    }

    #[test]
    fn test_status_takes_precedence_over_message() {
        // Forbidden with schema-like text stays terminal
        let err = api(403, "Forbidden", ".spec.foo: field not declared in schema");
        assert_eq!(classify(&err), ApplyErrorClass::Terminal);
    }

    #[test]
    fn test_only_terminal_blocks_fallback() {
        assert!(ApplyErrorClass::SchemaRejection.allows_fallback());
        assert!(ApplyErrorClass::TypedPatchFailure.allows_fallback());
        assert!(ApplyErrorClass::OwnershipConflict.allows_fallback());
        assert!(!ApplyErrorClass::Terminal.allows_fallback());
    }
}
