use thiserror::Error;

/// Errors raised while constructing or querying atoms and systems.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SystemError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Atom index {index} is out of range for {len} atom(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Shape mismatch: expected {expected} entries, found {found}")]
    ShapeMismatch { expected: usize, found: usize },
}
