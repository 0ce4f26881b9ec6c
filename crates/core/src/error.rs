//! The error taxonomy shared by the compiler, the VM, and the host.
//!
//! Compile-stage errors abort before execution; runtime errors unwind the
//! VM immediately and are caught at its boundary. The host renders them as
//! a one-line diagnostic.

use crate::value::ValueKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Ill-formed token.
    Lex {
        message: String,
        line: usize,
        column: usize,
    },
    /// Grammar violation.
    Parse {
        expected: String,
        found: String,
        line: usize,
    },
    /// Undeclared identifier, assignment to a non-l-value, and friends.
    Compile { message: String },
    /// A value of the wrong kind reached an operation or builtin.
    TypeMismatch {
        expected: Vec<ValueKind>,
        found: ValueKind,
    },
    /// Method not defined for the target kind.
    NoSuchMethod { target: ValueKind, name: String },
    /// A constant-shaped pattern did not match the scrutinized value.
    PatternMismatch,
    /// Generic builtin failure.
    Builtin { message: String },
    /// Deadline reached or cancelled by the host.
    Interrupted,
    /// Instance cap or similar host resource limit.
    Resource { message: String },
    /// Memory image encode/decode failure.
    Image { message: String },
    /// Broken interpreter invariant; always a bug.
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn compile(message: impl Into<String>) -> Error {
        Error::Compile {
            message: message.into(),
        }
    }

    pub fn type_mismatch(expected: &[ValueKind], found: ValueKind) -> Error {
        Error::TypeMismatch {
            expected: expected.to_vec(),
            found,
        }
    }

    pub fn no_such_method(target: ValueKind, name: impl Into<String>) -> Error {
        Error::NoSuchMethod {
            target,
            name: name.into(),
        }
    }

    pub fn builtin(message: impl Into<String>) -> Error {
        Error::Builtin {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Error {
        Error::Resource {
            message: message.into(),
        }
    }

    pub fn image(message: impl Into<String>) -> Error {
        Error::Image {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Error {
        Error::Internal {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Lex {
                message,
                line,
                column,
            } => write!(f, "lex error at {}:{}: {}", line + 1, column + 1, message),
            Error::Parse {
                expected,
                found,
                line,
            } => write!(
                f,
                "parse error at line {}: expected {}, found {}",
                line + 1,
                expected,
                found
            ),
            Error::Compile { message } => write!(f, "compile error: {}", message),
            Error::TypeMismatch { expected, found } => {
                let expected = expected
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(" or ");
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Error::NoSuchMethod { target, name } => {
                write!(f, "no method '{}' on {}", name, target)
            }
            Error::PatternMismatch => write!(f, "constant pattern did not match"),
            Error::Builtin { message } => write!(f, "{}", message),
            Error::Interrupted => write!(f, "interrupted: execution budget exhausted"),
            Error::Resource { message } => write!(f, "resource limit: {}", message),
            Error::Image { message } => write!(f, "memory image error: {}", message),
            Error::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Image {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_lists_alternatives() {
        let e = Error::type_mismatch(
            &[ValueKind::Integer, ValueKind::Float],
            ValueKind::String,
        );
        assert_eq!(
            e.to_string(),
            "type mismatch: expected integer or float, found string"
        );
    }

    #[test]
    fn test_lex_positions_are_one_based_in_display() {
        let e = Error::Lex {
            message: "unterminated string".to_string(),
            line: 0,
            column: 4,
        };
        assert!(e.to_string().contains("1:5"));
    }
}
