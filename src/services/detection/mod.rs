use crate::core::config::Config;
use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::RawDetection;
use crate::services::onnx::{build_session, OnnxSessionPool};
use anyhow::{anyhow, Result};
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::value::Value;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{debug, info, trace};

// CLIP normalization constants, shared by the OWL-ViT family of models
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

// The preprocessor pads the source to a square with mid-gray before
// resizing, so box coordinates decode relative to max(width, height)
const PAD_FILL: u8 = 128;

/// Open-vocabulary detection service.
///
/// Holds the ONNX session pool and the CLIP tokenizer, both loaded once
/// at startup and shared read-only across requests. A forward pass is
/// conditioned on the request's prompt list; detections carry the index
/// of the prompt they matched.
pub struct DetectionService {
    session_pool: Arc<OnnxSessionPool>,
    tokenizer: Arc<Tokenizer>,
    config: Arc<Config>,
    device_type: String,
}

impl DetectionService {
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let tokenizer_path = config.detection.tokenizer_path.clone();
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path, e))?;
        info!("✓ Tokenizer: {} entries", tokenizer.get_vocab_size(true));

        let pool_size = config.pool_size();
        debug!("Creating detection session pool with {} sessions", pool_size);

        let model_path = config.detection.model_path.clone();
        let backend = config.detection.inference_backend.clone();

        // First session determines the device type
        let (device_type, first_session) = build_session(&model_path, backend.as_deref())?;

        let session_pool = Arc::new(OnnxSessionPool::new(pool_size));
        session_pool
            .sender()
            .send(first_session)
            .map_err(|_| anyhow!("Failed to initialize session pool"))?;

        // Create remaining sessions in parallel for faster startup
        if pool_size > 1 {
            let mut tasks = Vec::new();

            for i in 1..pool_size {
                let model_path = model_path.clone();
                let backend = backend.clone();
                let task = tokio::task::spawn_blocking(move || {
                    debug!("Creating session {} of {}", i + 1, pool_size);
                    build_session(&model_path, backend.as_deref())
                });
                tasks.push(task);
            }

            for task in tasks {
                let (_, session) = task
                    .await
                    .map_err(|e| anyhow!("Failed to spawn session creation: {}", e))??;
                session_pool
                    .sender()
                    .send(session)
                    .map_err(|_| anyhow!("Failed to add session to pool"))?;
            }
        }

        info!("✓ Detection: {} ({} sessions)", device_type, pool_size);

        Ok(Self {
            session_pool,
            tokenizer: Arc::new(tokenizer),
            config,
            device_type,
        })
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Run one detection pass over `img` conditioned on `prompts`.
    ///
    /// Returns detections at or above the configured confidence
    /// threshold, in model output order, with boxes in pixel
    /// coordinates of the source image.
    pub async fn detect(
        &self,
        img: &DynamicImage,
        prompts: &[String],
    ) -> DetectionResult<Vec<RawDetection>> {
        debug!(
            "🔍 Detecting {} prompts on {}x{} image",
            prompts.len(),
            img.width(),
            img.height()
        );
        let detection_start = std::time::Instant::now();

        let (input_ids, attention_mask) = self.encode_prompts(prompts)?;
        let pixel_values = preprocess_image(img, self.config.target_size());

        let (src_w, src_h) = (img.width(), img.height());
        let threshold = self.config.confidence_threshold();
        let pool = Arc::clone(&self.session_pool);

        debug!("Running ONNX inference on {}...", self.device_type);
        let detections = tokio::task::spawn_blocking(move || -> DetectionResult<Vec<RawDetection>> {
            let ids_value = Value::from_array(input_ids)?;
            let mask_value = Value::from_array(attention_mask)?;
            let pixels_value = Value::from_array(pixel_values)?;

            let mut session = pool.acquire();
            // Extract everything into owned buffers before the session
            // goes back to the pool, even on failure
            let extracted = (|| -> DetectionResult<(Vec<i64>, Vec<f32>, Vec<f32>)> {
                let outputs = session.run(ort::inputs![
                    "input_ids" => ids_value,
                    "pixel_values" => pixels_value,
                    "attention_mask" => mask_value
                ])?;

                let (logits_shape, logits_data) = outputs["logits"].try_extract_tensor::<f32>()?;
                let logits_shape_owned = logits_shape.to_vec();
                let logits_owned = logits_data.to_vec();

                let (_boxes_shape, boxes_data) =
                    outputs["pred_boxes"].try_extract_tensor::<f32>()?;
                let boxes_owned = boxes_data.to_vec();

                Ok((logits_shape_owned, logits_owned, boxes_owned))
            })();
            pool.release(session);

            let (logits_shape, logits, boxes) = extracted?;
            decode_outputs(&logits_shape, &logits, &boxes, src_w, src_h, threshold)
        })
        .await
        .map_err(|e| DetectionError::TaskJoinFailed(e.to_string()))??;

        debug!(
            "✓ Detection completed in {:.2}ms: {} detections above threshold {:.2}",
            detection_start.elapsed().as_secs_f64() * 1000.0,
            detections.len(),
            threshold
        );

        Ok(detections)
    }

    /// Tokenize every prompt to fixed-length CLIP input ids.
    ///
    /// Shorter prompts are zero-padded, longer ones truncated; the
    /// attention mask marks real tokens.
    fn encode_prompts(&self, prompts: &[String]) -> DetectionResult<(Array2<i64>, Array2<i64>)> {
        let max_len = self.config.max_text_tokens();
        let mut input_ids = Array2::<i64>::zeros((prompts.len(), max_len));
        let mut attention_mask = Array2::<i64>::zeros((prompts.len(), max_len));

        for (i, prompt) in prompts.iter().enumerate() {
            let encoding = self
                .tokenizer
                .encode(prompt.as_str(), true)
                .map_err(|e| DetectionError::TokenizationFailed(e.to_string()))?;

            for (j, &id) in encoding.get_ids().iter().take(max_len).enumerate() {
                input_ids[[i, j]] = id as i64;
                attention_mask[[i, j]] = 1;
            }
        }

        Ok((input_ids, attention_mask))
    }
}

/// Preprocess an image OWLv2-style: pad bottom/right to a square,
/// resize to the model input size, rescale to [0,1], normalize with
/// the CLIP mean/std. Returns a [1, 3, target, target] tensor.
fn preprocess_image(img: &DynamicImage, target_size: u32) -> Array4<f32> {
    trace!(
        "Preprocessing image: {}x{} → {}x{}",
        img.width(),
        img.height(),
        target_size,
        target_size
    );

    let rgb = img.to_rgb8();
    let side = rgb.width().max(rgb.height()).max(1);
    let mut canvas = RgbImage::from_pixel(side, side, Rgb([PAD_FILL, PAD_FILL, PAD_FILL]));
    image::imageops::overlay(&mut canvas, &rgb, 0, 0);

    let resized = image::imageops::resize(
        &canvas,
        target_size,
        target_size,
        image::imageops::FilterType::Triangle,
    );

    let target = target_size as usize;
    let mut array = Array4::<f32>::zeros((1, 3, target, target));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] =
                (pixel[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
        }
    }

    array
}

/// Decode raw model outputs into pixel-space detections.
///
/// `logits` is [1, Q, P] (query × prompt scores), `boxes` is [1, Q, 4]
/// center-form coordinates normalized to the padded square. Per query,
/// the best prompt wins; sigmoid of its logit is the confidence. Boxes
/// scale by max(src_w, src_h) and clamp to the source bounds.
fn decode_outputs(
    logits_shape: &[i64],
    logits: &[f32],
    boxes: &[f32],
    src_w: u32,
    src_h: u32,
    confidence_threshold: f32,
) -> DetectionResult<Vec<RawDetection>> {
    if logits_shape.len() != 3 {
        return Err(DetectionError::InvalidModelOutput(format!(
            "logits tensor has rank {}, expected 3",
            logits_shape.len()
        )));
    }

    let num_queries = logits_shape[1] as usize;
    let num_prompts = logits_shape[2] as usize;

    if logits.len() < num_queries * num_prompts || boxes.len() < num_queries * 4 {
        return Err(DetectionError::InvalidModelOutput(
            "output tensors are shorter than their declared shape".to_string(),
        ));
    }

    let side = src_w.max(src_h) as f32;
    let mut detections = Vec::new();

    for q in 0..num_queries {
        let row = &logits[q * num_prompts..(q + 1) * num_prompts];
        let (label_index, max_logit) = row
            .iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |acc, (idx, &val)| {
                if val > acc.1 {
                    (idx, val)
                } else {
                    acc
                }
            });

        let confidence = sigmoid(max_logit);
        if confidence < confidence_threshold {
            continue;
        }

        let cx = boxes[q * 4] * side;
        let cy = boxes[q * 4 + 1] * side;
        let w = boxes[q * 4 + 2] * side;
        let h = boxes[q * 4 + 3] * side;

        let bbox = [
            clamp_coord(cx - w / 2.0, src_w),
            clamp_coord(cy - h / 2.0, src_h),
            clamp_coord(cx + w / 2.0, src_w),
            clamp_coord(cy + h / 2.0, src_h),
        ];

        trace!(
            "Detection {}: bbox=[{}, {}, {}, {}], label={}, conf={:.3}",
            q,
            bbox[0],
            bbox[1],
            bbox[2],
            bbox[3],
            label_index,
            confidence
        );

        detections.push(RawDetection {
            label_index,
            confidence,
            bbox,
        });
    }

    Ok(detections)
}

fn clamp_coord(value: f32, max: u32) -> i32 {
    (value.round() as i32).clamp(0, max as i32)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, Rgb([255, 255, 255])));
        let array = preprocess_image(&img, 96);
        assert_eq!(array.shape(), &[1, 3, 96, 96]);
    }

    #[test]
    fn test_preprocess_pads_bottom_with_gray() {
        // 100x50 source pads to a 100x100 square; the bottom half of
        // the resized tensor is pure pad fill
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, Rgb([255, 255, 255])));
        let array = preprocess_image(&img, 96);

        let expected_pad = (PAD_FILL as f32 / 255.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        let expected_white = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];

        assert!((array[[0, 0, 95, 0]] - expected_pad).abs() < 1e-3);
        assert!((array[[0, 0, 0, 0]] - expected_white).abs() < 1e-3);
    }

    #[test]
    fn test_decode_outputs_picks_best_prompt() {
        // Two queries, two prompts. Query 0 matches prompt 1 with
        // sigmoid(2.0) ≈ 0.881; query 1 stays below threshold.
        let shape = [1i64, 2, 2];
        let logits = [0.0, 2.0, -4.0, -5.0];
        let boxes = [
            0.5, 0.5, 0.5, 0.5, // query 0
            0.1, 0.1, 0.05, 0.05, // query 1
        ];

        let detections = decode_outputs(&shape, &logits, &boxes, 100, 100, 0.3).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label_index, 1);
        assert!((detections[0].confidence - 0.8808).abs() < 1e-3);
        assert_eq!(detections[0].bbox, [25, 25, 75, 75]);
    }

    #[test]
    fn test_decode_outputs_zero_threshold_keeps_all() {
        let shape = [1i64, 2, 2];
        let logits = [0.0, 2.0, -4.0, -5.0];
        let boxes = [0.5, 0.5, 0.5, 0.5, 0.1, 0.1, 0.05, 0.05];

        let detections = decode_outputs(&shape, &logits, &boxes, 100, 100, 0.0).unwrap();
        assert_eq!(detections.len(), 2);
        // Model output order is preserved, not sorted by confidence
        assert_eq!(detections[0].label_index, 1);
        assert_eq!(detections[1].label_index, 0);
    }

    #[test]
    fn test_decode_outputs_scales_by_padded_side_and_clamps() {
        // 200x100 source: boxes are normalized to the 200px padded
        // square, and y coordinates clamp to the 100px source height
        let shape = [1i64, 1, 1];
        let logits = [4.0];
        let boxes = [0.9, 0.9, 0.6, 0.6];

        let detections = decode_outputs(&shape, &logits, &boxes, 200, 100, 0.3).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox, [120, 100, 200, 100]);
    }

    #[test]
    fn test_decode_outputs_boxes_stay_in_bounds() {
        let shape = [1i64, 1, 1];
        let logits = [1.0];
        let boxes = [0.0, 0.0, 0.4, 0.4];

        let detections = decode_outputs(&shape, &logits, &boxes, 64, 48, 0.0).unwrap();
        let [x1, y1, x2, y2] = detections[0].bbox;
        assert!(x1 >= 0 && y1 >= 0);
        assert!(x2 <= 64 && y2 <= 48);
        assert!(x1 <= x2 && y1 <= y2);
    }

    #[test]
    fn test_decode_outputs_rejects_bad_rank() {
        let shape = [1i64, 2];
        let result = decode_outputs(&shape, &[0.0; 4], &[0.0; 8], 100, 100, 0.3);
        assert!(matches!(
            result,
            Err(DetectionError::InvalidModelOutput(_))
        ));
    }

    #[test]
    fn test_decode_outputs_rejects_truncated_tensors() {
        let shape = [1i64, 2, 2];
        let result = decode_outputs(&shape, &[0.0; 2], &[0.0; 8], 100, 100, 0.3);
        assert!(matches!(
            result,
            Err(DetectionError::InvalidModelOutput(_))
        ));
    }
}
