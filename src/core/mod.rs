pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    AnnotationError, ConfigError, DetectionError, FetchError, PipelineError,
};
pub use types::{
    Detection, DetectionOutcome, DetectionRequest, DetectionResponse, RawDetection,
};
