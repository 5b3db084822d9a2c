// Image download + decode

use crate::core::config::Config;
use crate::core::errors::{FetchError, FetchResult};
use anyhow::{Context, Result};
use image::DynamicImage;
use std::time::Duration;
use tracing::debug;

/// Fetches the request's source image over plain unauthenticated GET.
///
/// One shared client with connection pooling; no retries, no size
/// limit. The request timeout is off unless FETCH_TIMEOUT_SECONDS is
/// set, so a hanging host can block its request indefinitely.
pub struct ImageFetcher {
    client: reqwest::Client,
}

impl ImageFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        let timeout = config.fetch_timeout_seconds();
        if timeout > 0 {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Download and decode the image at `url`, coerced to 3-channel RGB.
    pub async fn fetch(&self, url: &str) -> FetchResult<DynamicImage> {
        debug!("Fetching image from {}", url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!("✓ Downloaded {} bytes", bytes.len());

        // Decoding is CPU-bound, especially for large images
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes)?;
            Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
        })
        .await
        .map_err(|e| FetchError::TaskJoinFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, DetectionConfig, FetchConfig, ServerConfig};
    use tracing::Level;

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                log_level: Level::INFO,
            },
            detection: DetectionConfig {
                confidence_threshold: 0.3,
                target_size: 960,
                max_text_tokens: 16,
                inference_backend: None,
                model_path: "models/owlv2.onnx".to_string(),
                tokenizer_path: "models/tokenizer.json".to_string(),
                pool_size: 1,
            },
            fetch: FetchConfig { timeout_seconds: 0 },
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported_as_request_failure() {
        let fetcher = ImageFetcher::new(&test_config()).unwrap();
        let result = fetcher.fetch("this is not a url").await;
        assert!(matches!(result, Err(FetchError::RequestFailed(_))));
    }
}
