// Request/response schema for the detection endpoint

use serde::{Deserialize, Serialize};

/// Request body for `POST /detect`
///
/// `prompts` is a comma-separated list of free-text labels,
/// e.g. "acne, dark spot, wrinkle".
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionRequest {
    pub image_url: String,
    pub prompts: String,
}

/// A single detection, in pixel coordinates of the source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Rounded to 3 decimal places
    pub confidence: f32,
    /// [x1, y1, x2, y2]
    #[serde(rename = "box")]
    pub bbox: [i32; 4],
}

/// Raw detection as decoded from model outputs, before the label index
/// is resolved against the prompt list
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub label_index: usize,
    pub confidence: f32,
    pub bbox: [i32; 4],
}

/// Successful pipeline output, prior to wrapping in a response
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub detections: Vec<Detection>,
    /// `data:image/jpeg;base64,...`
    pub annotated_image: String,
}

/// Response body for `POST /detect`
///
/// Always delivered with HTTP 200; failures are carried in-band.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DetectionResponse {
    Success {
        detections: Vec<Detection>,
        annotated_image: String,
    },
    Error {
        message: String,
    },
}

impl DetectionResponse {
    pub fn success(outcome: DetectionOutcome) -> Self {
        Self::Success {
            detections: outcome.detections,
            annotated_image: outcome.annotated_image,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response_shape() {
        let response = DetectionResponse::success(DetectionOutcome {
            detections: vec![Detection {
                label: "cat".to_string(),
                confidence: 0.875,
                bbox: [10, 20, 110, 220],
            }],
            annotated_image: "data:image/jpeg;base64,AAAA".to_string(),
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["detections"][0]["label"], "cat");
        assert_eq!(json["detections"][0]["box"][2], 110);
        assert_eq!(json["annotated_image"], "data:image/jpeg;base64,AAAA");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_error_response_shape() {
        let response = DetectionResponse::error("image download failed: timed out");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "image download failed: timed out");
        assert!(json.get("detections").is_none());
        assert!(json.get("annotated_image").is_none());
    }

    #[test]
    fn test_request_deserialization() {
        let request: DetectionRequest = serde_json::from_str(
            r#"{"image_url": "https://example.com/a.jpg", "prompts": "cat, dog"}"#,
        )
        .unwrap();
        assert_eq!(request.image_url, "https://example.com/a.jpg");
        assert_eq!(request.prompts, "cat, dog");
    }
}
