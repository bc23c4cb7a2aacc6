use crate::core::models::error::SystemError;
use thiserror::Error;

/// A failure reported by an external energy backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend call failed: {0}")]
    Failed(String),

    #[error("Backend returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("Backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The error taxonomy of the coupling library.
///
/// Setup-time variants (`InvalidArgument`, `IndexOutOfRange`, `Configuration`,
/// `InvalidConfiguration`, `DuplicateEngine`) are raised before any backend is
/// invoked. `Engine` wraps a runtime backend failure together with the name of the
/// engine that produced it.
#[derive(Debug, Error)]
pub enum QmmmError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Atom index {index} is out of range for {len} atom(s)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid QM configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("An engine named '{0}' is already registered")]
    DuplicateEngine(String),

    #[error("Engine '{name}' failed: {source}")]
    Engine {
        name: String,
        #[source]
        source: BackendError,
    },
}

impl QmmmError {
    pub(crate) fn shape(context: impl Into<String>, expected: usize, found: usize) -> Self {
        QmmmError::ShapeMismatch {
            context: context.into(),
            expected,
            found,
        }
    }
}

impl From<SystemError> for QmmmError {
    fn from(err: SystemError) -> Self {
        match err {
            SystemError::InvalidArgument(msg) => QmmmError::InvalidArgument(msg),
            SystemError::IndexOutOfRange { index, len } => {
                QmmmError::IndexOutOfRange { index, len }
            }
            SystemError::Configuration(msg) => QmmmError::Configuration(msg),
            SystemError::ShapeMismatch { expected, found } => {
                QmmmError::shape("system", expected, found)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_errors_map_onto_the_same_taxonomy() {
        let err: QmmmError = SystemError::Configuration("no cell".to_string()).into();
        assert!(matches!(err, QmmmError::Configuration(msg) if msg == "no cell"));

        let err: QmmmError = SystemError::IndexOutOfRange { index: 4, len: 2 }.into();
        assert!(matches!(err, QmmmError::IndexOutOfRange { index: 4, len: 2 }));

        let err: QmmmError = SystemError::ShapeMismatch {
            expected: 3,
            found: 1,
        }
        .into();
        assert!(matches!(
            err,
            QmmmError::ShapeMismatch {
                expected: 3,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn engine_error_message_names_the_engine() {
        let err = QmmmError::Engine {
            name: "qm".to_string(),
            source: BackendError::Failed("SCF did not converge".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("'qm'"));
        assert!(message.contains("SCF did not converge"));
    }
}
