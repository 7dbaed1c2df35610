//! YAML parsing and emission for manifests and kubeconfigs
//!
//! Parsing goes through yaml-rust2 into `serde_json::Value` so every manifest
//! is handled as the same schema-less document the merge engine works on.
//! Emission goes through serde_yaml.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing and emission
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct YamlError(String);

/// Parse a YAML string into a single document.
///
/// Multi-document input yields the first document; empty input yields
/// `Value::Null`.
pub fn parse_yaml(input: &str) -> Result<Value, YamlError> {
    Ok(parse_yaml_multi(input)?
        .into_iter()
        .next()
        .unwrap_or(Value::Null))
}

/// Parse a multi-document YAML string, one `Value` per `---` document.
///
/// Documents that are empty (only comments, whitespace, or `null`) are
/// dropped, so a template that renders to nothing yields an empty list.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    docs.into_iter()
        .map(yaml_to_json)
        .filter(|doc| !matches!(doc, Ok(Value::Null)))
        .collect()
}

/// Serialize any value to a YAML string
pub fn to_yaml_string<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, YamlError> {
    serde_yaml::to_string(value).map_err(|e| YamlError(e.to_string()))
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, YamlError> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| YamlError(e.to_string()))?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| YamlError(format!("float '{s}' is out of range")))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(items) => items
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| Ok((yaml_key(k)?, yaml_to_json(v)?)))
            .collect::<Result<Map<String, Value>, _>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(YamlError("YAML aliases not supported".to_string())),
        Yaml::BadValue => Err(YamlError("bad YAML value".to_string())),
    }
}

fn yaml_key(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(YamlError("unsupported YAML key type".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_workspace_manifest() {
        let doc = parse_yaml(
            r#"
apiVersion: tenancy.kcp.io/v1alpha1
kind: Workspace
metadata:
  name: orgs
spec:
  type:
    name: orgs
    path: root
"#,
        )
        .unwrap();
        assert_eq!(doc["kind"], "Workspace");
        assert_eq!(doc["spec"]["type"]["path"], "root");
    }

    #[test]
    fn empty_input_is_null() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
        assert_eq!(parse_yaml("# only a comment\n").unwrap(), Value::Null);
    }

    #[test]
    fn multi_document_drops_empty_documents() {
        let docs = parse_yaml_multi("a: 1\n---\n# nothing here\n---\nb: true\n").unwrap();
        assert_eq!(docs, vec![json!({"a": 1}), json!({"b": true})]);
    }

    #[test]
    fn scalars_convert_to_json_types() {
        let doc = parse_yaml("int: 3\nfloat: 1.5\nflag: false\nnone: ~\nlist: [x, y]\n").unwrap();
        assert_eq!(
            doc,
            json!({"int": 3, "float": 1.5, "flag": false, "none": null, "list": ["x", "y"]})
        );
    }

    #[test]
    fn out_of_range_float_is_an_error() {
        let err = parse_yaml("replicas: 1\nratio: 1e400\n").unwrap_err();
        assert!(err.to_string().contains("1e400"));
    }

    #[test]
    fn emits_yaml() {
        let out = to_yaml_string(&json!({"kcp": {"enabled": true}})).unwrap();
        assert_eq!(out, "kcp:\n  enabled: true\n");
    }
}
