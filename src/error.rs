use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Class label table not found: {0:?}")]
    LabelTableMissing(PathBuf),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

impl ServiceError {
    /// Short, stable name used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::ModelUnavailable(_) => "model_unavailable",
            ServiceError::LabelTableMissing(_) => "label_table_missing",
            ServiceError::InvalidImage(_) => "invalid_image",
            ServiceError::InferenceFailed(_) => "inference_failed",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
