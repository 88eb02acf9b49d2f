//! Error taxonomy shared across FleetMind crates.
//!
//! Components never swallow unknown failures silently: anything that is
//! not one of the named kinds bubbles up as [`CoreError::Internal`] and
//! moves the owning state machine to its error state. User-visible
//! messages name the failed operation and never carry backtraces.

use crate::validation::ValidationFinding;

/// Errors surfaced by the FleetMind core components.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No model-runtime binary answered a version probe.
    #[error("Could not find the model runtime binary")]
    BinaryNotFound,

    /// The runtime process failed to spawn.
    #[error("Could not start the model server: {stderr}")]
    SpawnError {
        /// Captured stderr snapshot from the failed spawn.
        stderr: String,
    },

    /// The running server stopped answering health probes.
    #[error("Could not reach model server")]
    HealthLost,

    /// A model pull did not complete.
    #[error("Model download failed: {0}")]
    ModelPullFailed(String),

    /// An LLM request exceeded its deadline.
    #[error("Model request timed out after {seconds}s")]
    LlmTimeout {
        /// Deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// Model output never yielded a valid reasoning envelope.
    #[error("Could not parse model output")]
    ParseFailed {
        /// Raw accumulated text, kept for diagnostics.
        raw: String,
    },

    /// A named template does not exist in the store.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// A request cannot proceed until error-severity findings are fixed.
    #[error("Request did not pass validation: {} errors", findings.len())]
    ValidationBlocked {
        /// Per-field findings that block the request.
        findings: Vec<ValidationFinding>,
    },

    /// Clean termination path, not a failure.
    #[error("Operation cancelled")]
    Cancelled,

    /// Transport-level failure talking to the runtime or the fleet API.
    #[error("Network error: {0}")]
    Network(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything without a more specific kind.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Coarse kind tag, used for metrics and recovery decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::BinaryNotFound => ErrorKind::BinaryNotFound,
            CoreError::SpawnError { .. } => ErrorKind::SpawnError,
            CoreError::HealthLost => ErrorKind::HealthLost,
            CoreError::ModelPullFailed(_) => ErrorKind::ModelPullFailed,
            CoreError::LlmTimeout { .. } => ErrorKind::LlmTimeout,
            CoreError::ParseFailed { .. } => ErrorKind::ParseFailed,
            CoreError::TemplateNotFound(_) => ErrorKind::TemplateNotFound,
            CoreError::ValidationBlocked { .. } => ErrorKind::ValidationBlocked,
            CoreError::Cancelled => ErrorKind::Cancelled,
            CoreError::Network(_) | CoreError::Io(_) | CoreError::Serialization(_) => {
                ErrorKind::Internal
            }
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may usefully retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SpawnError | ErrorKind::ModelPullFailed | ErrorKind::LlmTimeout
        )
    }

    /// Wrap an unexpected failure.
    pub fn internal(detail: impl Into<String>) -> Self {
        CoreError::Internal(detail.into())
    }
}

/// Coarse error classification matching the surfaced error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BinaryNotFound,
    SpawnError,
    HealthLost,
    ModelPullFailed,
    ChunkQueueOverflow,
    ParseFailed,
    LlmTimeout,
    TemplateNotFound,
    ValidationBlocked,
    Cancelled,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CoreError::BinaryNotFound.kind(), ErrorKind::BinaryNotFound);
        assert_eq!(CoreError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            CoreError::Network("refused".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_retryable() {
        assert!(CoreError::SpawnError {
            stderr: "boom".into()
        }
        .is_retryable());
        assert!(!CoreError::BinaryNotFound.is_retryable());
        assert!(!CoreError::Cancelled.is_retryable());
    }

    #[test]
    fn test_user_facing_text_names_operation() {
        let err = CoreError::ValidationBlocked {
            findings: vec![ValidationFinding::error("end_time", "end before start")],
        };
        assert_eq!(err.to_string(), "Request did not pass validation: 1 errors");
    }
}
