//! Helm-style filters and functions for manifest templates
//!
//! - `default`: fallback for undefined or none values
//! - `to_yaml` / `toYaml`: re-serialize a value as YAML
//! - `indent` / `nindent`: indent every line, optionally after a newline
//! - `quote`: emit a double-quoted string
//! - `required`: fail rendering if the value is undefined
//! - `b64enc`: base64-encode a string
//! - `all` / `any`: variadic boolean combinators

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::value::Rest;
use minijinja::{Error, ErrorKind, Value};

/// Default filter - returns fallback if value is undefined or none
///
/// Usage: `{{ spec.logLevel | default("info") }}`
pub fn default_filter(value: Value, fallback: Option<Value>) -> Value {
    if value.is_undefined() || value.is_none() {
        fallback.unwrap_or_else(|| Value::from(""))
    } else {
        value
    }
}

/// YAML filter - serializes a value as YAML without the trailing newline
///
/// Usage: `{{ values.helm | to_yaml | nindent(4) }}`
pub fn to_yaml(value: Value) -> Result<String, Error> {
    if value.is_undefined() || value.is_none() {
        return Ok(String::new());
    }
    let out = serde_yaml::to_string(&value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot serialize value as YAML: {}", e),
        )
    })?;
    Ok(out.trim_end_matches('\n').to_string())
}

/// Indent filter - prefixes every non-empty line with `width` spaces
///
/// Usage: `{{ block | indent(2) }}`
pub fn indent(value: String, width: usize) -> String {
    let pad = " ".repeat(width);
    value
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Newline-indent filter - like `indent` but starts with a newline
///
/// Usage: `values: {{ values | to_yaml | nindent(2) }}`
pub fn nindent(value: String, width: usize) -> String {
    format!("\n{}", indent(value, width))
}

/// Quote filter - emits the value as a double-quoted, escaped string
///
/// Usage: `{{ spec.domain | quote }}`
pub fn quote(value: Value) -> String {
    let raw = if value.is_undefined() || value.is_none() {
        String::new()
    } else {
        value.to_string()
    };
    serde_json::to_string(&raw).unwrap_or_else(|_| format!("\"{raw}\""))
}

/// Required filter - fails if value is undefined
///
/// Usage: `{{ identities["tenancy.kcp.io"] | required("tenancy identity missing") }}`
pub fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    if value.is_undefined() || value.is_none() {
        Err(Error::new(
            ErrorKind::UndefinedError,
            message.unwrap_or_else(|| "required value is undefined".to_string()),
        ))
    } else {
        Ok(value)
    }
}

/// Base64 encode filter
///
/// Usage: `{{ values.token | b64enc }}`
pub fn b64enc(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// True if every argument is truthy
///
/// Usage: `{% if all(spec.kcp.enabled, values.bootstrap) %}`
pub fn all(args: Rest<Value>) -> bool {
    args.iter().all(Value::is_true)
}

/// True if any argument is truthy
///
/// Usage: `{% if any(spec.external, values.forceExternal) %}`
pub fn any(args: Rest<Value>) -> bool {
    args.iter().any(Value::is_true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_with_value() {
        let result = default_filter(Value::from("hello"), Some(Value::from("world")));
        assert_eq!(result.to_string(), "hello");
    }

    #[test]
    fn test_default_filter_with_undefined() {
        let result = default_filter(Value::UNDEFINED, Some(Value::from("fallback")));
        assert_eq!(result.to_string(), "fallback");
    }

    #[test]
    fn test_default_filter_keeps_false() {
        let result = default_filter(Value::from(false), Some(Value::from(true)));
        assert!(!result.is_true());
    }

    #[test]
    fn test_to_yaml_mapping() {
        let value = Value::from_serialize(serde_json::json!({"replicas": 2}));
        assert_eq!(to_yaml(value).unwrap(), "replicas: 2");
    }

    #[test]
    fn test_to_yaml_undefined_is_empty() {
        assert_eq!(to_yaml(Value::UNDEFINED).unwrap(), "");
    }

    #[test]
    fn test_indent_skips_empty_lines() {
        assert_eq!(indent("a: 1\n\nb: 2".to_string(), 2), "  a: 1\n\n  b: 2");
    }

    #[test]
    fn test_nindent() {
        assert_eq!(nindent("a: 1".to_string(), 4), "\n    a: 1");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(Value::from("say \"hi\"")), r#""say \"hi\"""#);
        assert_eq!(quote(Value::UNDEFINED), r#""""#);
    }

    #[test]
    fn test_required() {
        assert!(required(Value::from("present"), None).is_ok());
        let err = required(Value::UNDEFINED, Some("identity missing".to_string())).unwrap_err();
        assert!(err.to_string().contains("identity missing"));
    }

    #[test]
    fn test_b64enc() {
        assert_eq!(b64enc("hello"), "aGVsbG8=");
        assert_eq!(b64enc(""), "");
    }
}
