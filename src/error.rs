//! Error types for external-memory operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Precondition check for tensor shapes. Malformed shapes are programming
    /// errors and fail immediately rather than being silently broadcast.
    pub fn check_shape(
        context: &'static str,
        expected: &[usize],
        got: &[usize],
    ) -> Result<(), MemoryError> {
        if expected != got {
            return Err(MemoryError::ShapeMismatch {
                context,
                expected: expected.to_vec(),
                got: got.to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape_accepts_equal() {
        assert!(MemoryError::check_shape("test", &[2, 3], &[2, 3]).is_ok());
    }

    #[test]
    fn test_check_shape_rejects_mismatch() {
        let err = MemoryError::check_shape("test", &[2, 3], &[3, 2]).unwrap_err();
        match err {
            MemoryError::ShapeMismatch { context, .. } => assert_eq!(context, "test"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
