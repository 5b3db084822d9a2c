// Per-request detection pipeline: fetch → detect → annotate

use crate::core::config::Config;
use crate::core::errors::PipelineResult;
use crate::core::types::{Detection, DetectionOutcome, DetectionRequest};
use crate::services::annotation;
use crate::services::detection::DetectionService;
use crate::services::fetcher::ImageFetcher;
use crate::utils::Metrics;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Ties the fetcher, detector, and annotator into the one operation the
/// endpoint exposes. Every internal failure surfaces as a
/// `PipelineError` so the handler can answer with an in-band error
/// payload instead of an HTTP error.
pub struct DetectionPipeline {
    config: Arc<Config>,
    fetcher: ImageFetcher,
    detector: Arc<DetectionService>,
    metrics: Metrics,
}

impl DetectionPipeline {
    pub async fn new(config: Arc<Config>, metrics: Metrics) -> Result<Self> {
        let fetcher = ImageFetcher::new(&config)?;
        let detector = Arc::new(DetectionService::new(Arc::clone(&config)).await?);

        Ok(Self {
            config,
            fetcher,
            detector,
            metrics,
        })
    }

    pub fn device_type(&self) -> &str {
        self.detector.device_type()
    }

    pub async fn process(&self, request: &DetectionRequest) -> PipelineResult<DetectionOutcome> {
        let prompt_list = split_prompts(&request.prompts);
        debug!("Prompts: {:?}", prompt_list);

        let fetch_start = Instant::now();
        let image = self.fetcher.fetch(&request.image_url).await?;
        self.metrics.record_fetch(fetch_start.elapsed());
        debug!("✓ Image ready: {}x{}", image.width(), image.height());

        let inference_start = Instant::now();
        let raw_detections = self.detector.detect(&image, &prompt_list).await?;
        self.metrics.record_inference(inference_start.elapsed());

        let detections: Vec<Detection> = raw_detections
            .into_iter()
            .map(|raw| Detection {
                label: label_for(&prompt_list, raw.label_index),
                confidence: round_confidence(raw.confidence),
                bbox: raw.bbox,
            })
            .collect();

        let annotation_start = Instant::now();
        let annotated_image = annotation::annotate_to_data_uri_async(&image, &detections).await?;
        self.metrics.record_annotation(annotation_start.elapsed());
        self.metrics.record_detections(detections.len());

        info!(
            "✓ {} detections above threshold {:.2}",
            detections.len(),
            self.config.confidence_threshold()
        );

        Ok(DetectionOutcome {
            detections,
            annotated_image,
        })
    }
}

/// Split the comma-separated prompt string, trimming each piece.
/// Order is load-bearing: model label indices map back by position.
/// Empty pieces are kept so indices stay aligned with the raw input.
pub fn split_prompts(raw: &str) -> Vec<String> {
    raw.split(',').map(|p| p.trim().to_string()).collect()
}

/// Resolve a model label index against the prompt list; out-of-range
/// indices fall back to the index rendered as a string.
fn label_for(prompts: &[String], index: usize) -> String {
    prompts
        .get(index)
        .cloned()
        .unwrap_or_else(|| index.to_string())
}

fn round_confidence(confidence: f32) -> f32 {
    (confidence * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_prompts_trims_whitespace() {
        assert_eq!(
            split_prompts("acne, dark spot,  wrinkle"),
            vec!["acne", "dark spot", "wrinkle"]
        );
    }

    #[test]
    fn test_split_prompts_keeps_order() {
        assert_eq!(split_prompts("cat, dog"), vec!["cat", "dog"]);
    }

    #[test]
    fn test_split_prompts_keeps_empty_pieces() {
        assert_eq!(split_prompts("cat,, dog"), vec!["cat", "", "dog"]);
        assert_eq!(split_prompts(""), vec![""]);
    }

    #[test]
    fn test_label_for_in_range() {
        let prompts = vec!["cat".to_string(), "dog".to_string()];
        assert_eq!(label_for(&prompts, 1), "dog");
    }

    #[test]
    fn test_label_for_out_of_range_falls_back_to_index() {
        let prompts = vec!["cat".to_string()];
        assert_eq!(label_for(&prompts, 3), "3");
    }

    #[test]
    fn test_round_confidence_to_three_decimals() {
        assert_eq!(round_confidence(0.880_797), 0.881);
        assert_eq!(round_confidence(0.3), 0.3);
        assert_eq!(round_confidence(1.0), 1.0);
    }
}
