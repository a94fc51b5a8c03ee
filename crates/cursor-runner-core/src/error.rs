use thiserror::Error;

/// Top-level error taxonomy for the supervisor (spec §7).
///
/// Each variant carries enough context to be surfaced to a caller (HTTP
/// status, async callback `error` field) without further wrapping.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("failed to spawn agent process: {0}")]
    SpawnFailed(String),

    #[error("hard timeout of {limit_secs}s exceeded")]
    HardTimeout { limit_secs: u64 },

    #[error("idle timeout of {limit_secs}s exceeded")]
    IdleTimeout { limit_secs: u64 },

    #[error("Output size exceeded: accumulated output exceeded the {limit_bytes} byte limit")]
    OutputOverflow { limit_bytes: usize },

    #[error("execution cancelled")]
    Cancelled,

    #[error("review pass failed: {0}")]
    ReviewParseFailed(String),

    #[error("review pass requested early stop: {justification}")]
    ReviewBreak { justification: String },

    #[error("maximum iterations ({max_iterations}) reached without completion")]
    MaxIterationsReached { max_iterations: u32 },

    #[error("callback delivery failed: {0}")]
    CallbackFailed(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The `kind` tag from spec §7, used by callers building structured
    /// error payloads without matching on the full variant.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument(_) => "InvalidArgument",
            CoreError::NotFound(_) => "NotFound",
            CoreError::StoreUnavailable(_) => "StoreUnavailable",
            CoreError::SpawnFailed(_) => "SpawnFailed",
            CoreError::HardTimeout { .. } => "HardTimeout",
            CoreError::IdleTimeout { .. } => "IdleTimeout",
            CoreError::OutputOverflow { .. } => "OutputOverflow",
            CoreError::Cancelled => "Cancelled",
            CoreError::ReviewParseFailed(_) => "ReviewParseFailed",
            CoreError::ReviewBreak { .. } => "ReviewBreak",
            CoreError::MaxIterationsReached { .. } => "MaxIterationsReached",
            CoreError::CallbackFailed(_) => "CallbackFailed",
            CoreError::Process(_) => "Internal",
            CoreError::Internal(_) => "Internal",
            CoreError::Io(_) => "Internal",
        }
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_taxonomy() {
        assert_eq!(CoreError::InvalidArgument("x".into()).kind(), "InvalidArgument");
        assert_eq!(
            CoreError::OutputOverflow { limit_bytes: 10 }.kind(),
            "OutputOverflow"
        );
    }

    #[test]
    fn output_overflow_message_contains_bytes() {
        let err = CoreError::OutputOverflow { limit_bytes: 1024 };
        let msg = err.to_string();
        assert!(msg.contains("Output size exceeded"));
        assert!(msg.contains("bytes"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::Io(_)));
    }
}
