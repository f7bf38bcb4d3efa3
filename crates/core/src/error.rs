#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not calibrated: no baseline available")]
    NotCalibrated,

    #[error("Insufficient samples: captured {captured}, need at least {required}")]
    InsufficientSamples { captured: usize, required: usize },

    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: &'static str, to: &'static str },
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CoreError::Validation(errors.to_string())
    }
}
