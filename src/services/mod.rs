pub mod annotation;
pub mod detection;
pub mod fetcher;
pub mod onnx; // Shared ONNX session builder + session pool

// Re-export commonly used services
pub use detection::DetectionService;
pub use fetcher::ImageFetcher;
