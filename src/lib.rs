// Library exports for the open-vocabulary detection service

// Core modules
pub mod core;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{AnnotationError, ConfigError, DetectionError, FetchError, PipelineError},
    types::{Detection, DetectionOutcome, DetectionRequest, DetectionResponse, RawDetection},
};

pub use orchestration::DetectionPipeline;

pub use services::{DetectionService, ImageFetcher};

pub use utils::Metrics;
