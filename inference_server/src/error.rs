use crate::orchestrator::CallState;
use thiserror::Error;
use tonic::Code;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("failed to prepare model input: {0}")]
    Input(String),
    #[error("model inference failed: {0}")]
    Inference(String),
}

/// Application-level failure of a single `Infer` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("prediction failed: {0}")]
    Prediction(#[from] ModelError),
    #[error("call cancelled after {0}")]
    Cancelled(CallState),
}

impl InferenceError {
    pub fn code(&self) -> Code {
        match self {
            InferenceError::MissingField(_) | InferenceError::InvalidImage(_) => {
                Code::InvalidArgument
            }
            InferenceError::Prediction(_) => Code::Internal,
            InferenceError::Cancelled(_) => Code::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(
            InferenceError::MissingField("image_bytes").to_string(),
            "missing required field: image_bytes"
        );
        assert_eq!(
            InferenceError::InvalidImage("bad header".to_string()).to_string(),
            "invalid image: bad header"
        );
        assert_eq!(
            InferenceError::Prediction(ModelError::Inference("oom".to_string())).to_string(),
            "prediction failed: model inference failed: oom"
        );
        assert_eq!(
            InferenceError::Cancelled(CallState::Predicting).to_string(),
            "call cancelled after predicting"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            InferenceError::MissingField("image_bytes").code(),
            Code::InvalidArgument
        );
        assert_eq!(
            InferenceError::InvalidImage(String::new()).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            InferenceError::from(ModelError::Inference(String::new())).code(),
            Code::Internal
        );
        assert_eq!(
            InferenceError::Cancelled(CallState::Decoding).code(),
            Code::Cancelled
        );
    }
}
