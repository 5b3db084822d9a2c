pub mod pipeline;

pub use pipeline::DetectionPipeline;
