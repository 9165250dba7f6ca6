use thiserror::Error;

/// Error types for the nlderiv-rs library.
#[derive(Error, Debug)]
pub enum NlDerivError {
    /// Error indicating a mismatch between buffer sizes and problem dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error for an inconsistent or out-of-bounds sparsity pattern.
    #[error("Invalid sparsity pattern: {0}")]
    InvalidPattern(String),

    /// Error for a differentiation method that cannot serve the requested role.
    #[error("Unsupported differentiation method: {0}")]
    UnsupportedMethod(String),

    /// Error during user residual function evaluation.
    #[error("Function evaluation error: {0}")]
    FunctionEvaluation(String),

    /// Error for a backend producing a non-finite derivative value.
    #[error("Non-finite derivative: {0}")]
    NonFiniteDerivative(String),

    /// Error while recording the reverse-mode tape.
    #[error("Tape recording error: {0}")]
    TapeRecording(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for nlderiv-rs operations.
pub type Result<T> = std::result::Result<T, NlDerivError>;

/// Extensions for converting from other error types.
impl From<String> for NlDerivError {
    fn from(s: String) -> Self {
        NlDerivError::Other(s)
    }
}

impl From<&str> for NlDerivError {
    fn from(s: &str) -> Self {
        NlDerivError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NlDerivError::DimensionMismatch("expected 3 constraints, got 2".to_string());
        assert!(format!("{}", err).contains("expected 3 constraints, got 2"));

        let err = NlDerivError::UnsupportedMethod("ReverseAD in Jacobian role".to_string());
        assert!(format!("{}", err).contains("ReverseAD in Jacobian role"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: NlDerivError = io_err.into();

        match err {
            NlDerivError::IoError(_) => (),
            _ => panic!("Expected IoError variant"),
        }

        let str_err: NlDerivError = "test error".into();
        match str_err {
            NlDerivError::Other(s) => assert_eq!(s, "test error"),
            _ => panic!("Expected Other variant"),
        }
    }
}
