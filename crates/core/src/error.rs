/// Failure to turn DSL text (or a stored payload) into a [`RuleDocument`].
///
/// `Parse` means the text is not well-formed YAML at all; `Validation`
/// means it decoded but does not follow the rule schema. Callers reject
/// the edit in both cases and show `message` to the author.
///
/// [`RuleDocument`]: crate::document::RuleDocument
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DslError {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl DslError {
    pub fn parse(message: impl Into<String>) -> Self {
        DslError::Parse {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DslError::Validation {
            message: message.into(),
        }
    }

    /// The bare message, without the `parse error:` / `validation error:` prefix.
    pub fn message(&self) -> &str {
        match self {
            DslError::Parse { message } | DslError::Validation { message } => message,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DslError::Validation { .. })
    }

    /// Serialize to a JSON object for machine-readable error output.
    pub fn to_json_value(&self) -> serde_json::Value {
        let kind = match self {
            DslError::Parse { .. } => "parse",
            DslError::Validation { .. } => "validation",
        };
        serde_json::json!({
            "kind": kind,
            "message": self.message(),
        })
    }
}

/// Failure to render a document as YAML text.
#[derive(Debug, thiserror::Error)]
#[error("could not render YAML: {0}")]
pub struct SerializeError(#[from] serde_yaml::Error);

/// Errors from the built-in rule pack registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("rule pack '{slug}' not found")]
    NotFound { slug: String },

    /// A bundled pack failed to parse. This is a packaging defect, not a
    /// tenant error.
    #[error("bundled rule pack '{slug}' is invalid: {source}")]
    Invalid {
        slug: String,
        #[source]
        source: DslError,
    },
}
