use thiserror::Error;

#[derive(Error, Debug)]
pub enum InversionError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        got: usize,
    },

    #[error("`{name}` was removed in version {removed_in}, please use `{replacement}`")]
    RemovedApi {
        name: String,
        replacement: String,
        removed_in: String,
    },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Forward simulation failed: {0}")]
    Simulation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InversionError {
    /// Configuration-class failures must abort the run before any iteration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            InversionError::ConfigError(_)
                | InversionError::DimensionMismatch { .. }
                | InversionError::RemovedApi { .. }
        )
    }
}

pub type InversionResult<T> = Result<T, InversionError>;

/// Fail with `DimensionMismatch` unless `got == expected`.
pub fn ensure_len(context: &str, expected: usize, got: usize) -> InversionResult<()> {
    if expected != got {
        return Err(InversionError::DimensionMismatch {
            context: context.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}
