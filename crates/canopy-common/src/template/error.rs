//! Template error types

use std::fmt;

/// Errors that can occur while rendering a manifest template
#[derive(Debug)]
pub enum TemplateError {
    /// Template rendering failed
    Render(minijinja::Error),
    /// Rendered output is not a valid YAML document stream
    Parse(String),
    /// A rendered document is not an object
    NotAnObject(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Render(e) => write!(f, "template render error: {}", e),
            Self::Parse(msg) => write!(f, "rendered output is not valid YAML: {}", msg),
            Self::NotAnObject(found) => {
                write!(f, "rendered document must be a mapping, found {}", found)
            }
        }
    }
}

impl std::error::Error for TemplateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        Self::Render(err)
    }
}

impl From<crate::yaml::YamlError> for TemplateError {
    fn from(err: crate::yaml::YamlError) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = TemplateError::Parse("mapping values are not allowed".to_string());
        assert!(err.to_string().contains("not valid YAML"));
        assert!(err.to_string().contains("mapping values"));
    }

    #[test]
    fn test_not_an_object_display() {
        let err = TemplateError::NotAnObject("a list".to_string());
        assert_eq!(
            err.to_string(),
            "rendered document must be a mapping, found a list"
        );
    }
}
