// Custom error types for the detection pipeline
//
// Using thiserror for ergonomic error definitions with:
// - Type-safe error matching
// - Automatic Display/Error trait implementations
// - Source error chaining

use thiserror::Error;

/// Image fetch errors (download + decode)
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("image download failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("image decode failed: {0}")]
    DecodeFailed(#[from] image::ImageError),

    #[error("image task failed: {0}")]
    TaskJoinFailed(String),
}

/// Detection service errors
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("prompt tokenization failed: {0}")]
    TokenizationFailed(String),

    #[error("unexpected model output: {0}")]
    InvalidModelOutput(String),

    #[error("inference task failed: {0}")]
    TaskJoinFailed(String),
}

/// Annotation errors (drawing + JPEG encode)
#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("image encoding failed: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("annotation task failed: {0}")]
    TaskJoinFailed(String),
}

/// Per-request pipeline errors
///
/// Every failure in the request pipeline collapses into one of these;
/// the endpoint reports `Display` of the variant as the error message.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),
}

// Convenience type aliases for Results
pub type FetchResult<T> = Result<T, FetchError>;
pub type DetectionResult<T> = Result<T, DetectionError>;
pub type AnnotationResult<T> = Result<T, AnnotationError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err = PipelineError::from(DetectionError::InvalidModelOutput(
            "logits tensor has rank 2, expected 3".to_string(),
        ));
        assert_eq!(
            err.to_string(),
            "unexpected model output: logits tensor has rank 2, expected 3"
        );
    }
}
