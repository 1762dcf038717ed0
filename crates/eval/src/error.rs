use std::fmt;

/// Failure while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Malformed expression text. `offset` is the byte offset of the
    /// offending token.
    Syntax { message: String, offset: usize },
    /// A name that is neither bound in the context nor a built-in.
    UnknownName { name: String },
    /// A name or attribute starting with `_`.
    PrivateName { name: String },
    /// Attribute lookup on a value that does not expose it.
    UnknownAttribute { target: String, attribute: String },
    /// Operator not defined for the operand types.
    UnsupportedOperator {
        op: String,
        left: String,
        right: String,
    },
    /// Runtime type mismatch (ordering unrelated types, bad conversion, ...).
    TypeError { message: String },
    /// Sequence index out of range or invalid slice step.
    IndexError { message: String },
    /// Missing mapping key.
    KeyError { key: String },
    DivisionByZero,
    /// Checked arithmetic overflowed.
    Overflow { message: String },
    /// Call on a value that is not a function.
    NotCallable { type_name: String },
    /// Wrong number or kind of arguments to a built-in.
    ArgumentError { function: String, message: String },
}

impl EvalError {
    pub(crate) fn syntax(offset: usize, message: impl Into<String>) -> Self {
        EvalError::Syntax {
            message: message.into(),
            offset,
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        EvalError::TypeError {
            message: message.into(),
        }
    }

    pub(crate) fn overflow(message: impl Into<String>) -> Self {
        EvalError::Overflow {
            message: message.into(),
        }
    }

    pub(crate) fn argument(function: &str, message: impl Into<String>) -> Self {
        EvalError::ArgumentError {
            function: function.to_owned(),
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Syntax { message, offset } => {
                write!(f, "syntax error at offset {}: {}", offset, message)
            }
            EvalError::UnknownName { name } => write!(f, "name '{}' is not defined", name),
            EvalError::PrivateName { name } => {
                write!(f, "access to private name '{}' is not allowed", name)
            }
            EvalError::UnknownAttribute { target, attribute } => {
                write!(f, "{} has no attribute '{}'", target, attribute)
            }
            EvalError::UnsupportedOperator { op, left, right } => {
                write!(
                    f,
                    "unsupported operand types for {}: {} and {}",
                    op, left, right
                )
            }
            EvalError::TypeError { message } => write!(f, "type error: {}", message),
            EvalError::IndexError { message } => write!(f, "index error: {}", message),
            EvalError::KeyError { key } => write!(f, "key not found: '{}'", key),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::Overflow { message } => write!(f, "numeric overflow: {}", message),
            EvalError::NotCallable { type_name } => {
                write!(f, "value of type {} is not callable", type_name)
            }
            EvalError::ArgumentError { function, message } => {
                write!(f, "{}(): {}", function, message)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// An expression failure attributed to the rule that contains it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("rule '{rule_id}'{}: failed to evaluate `{expression}`: {source}", item_label(.item_index))]
pub struct RuleError {
    pub rule_id: String,
    pub expression: String,
    /// Zero-based item position for item-scoped rules.
    pub item_index: Option<usize>,
    #[source]
    pub source: EvalError,
}

fn item_label(index: &Option<usize>) -> String {
    match index {
        Some(i) => format!(" (item {})", i),
        None => String::new(),
    }
}
