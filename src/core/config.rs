use crate::core::errors::ConfigError;
use std::env;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub target_size: u32,
    pub max_text_tokens: usize,
    pub inference_backend: Option<String>,
    pub model_path: String,
    pub tokenizer_path: String,
    /// Number of ONNX sessions (controls inference parallelism)
    pub pool_size: usize,
}

/// Image fetch configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// 0 disables the request timeout (matching the upstream contract
    /// of an unbounded GET); anything else is seconds.
    pub timeout_seconds: u64,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub fetch: FetchConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        // Parse log level
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        Ok(Self {
            server: ServerConfig {
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(8000),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            detection: DetectionConfig {
                confidence_threshold: env::var("CONFIDENCE_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0.3),
                target_size: env::var("TARGET_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(960),
                max_text_tokens: env::var("MAX_TEXT_TOKENS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(16),
                inference_backend: env::var("INFERENCE_BACKEND")
                    .ok()
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty()),
                model_path: env::var("MODEL_PATH")
                    .unwrap_or_else(|_| "models/owlv2.onnx".to_string()),
                tokenizer_path: env::var("TOKENIZER_PATH")
                    .unwrap_or_else(|_| "models/tokenizer.json".to_string()),
                pool_size: env::var("ONNX_POOL_SIZE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| std::cmp::min(num_cpus::get(), 4).max(1)),
            },
            fetch: FetchConfig {
                timeout_seconds: env::var("FETCH_TIMEOUT_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(224..=2048).contains(&self.detection.target_size) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "target_size must be between 224 and 2048, got {}",
                self.detection.target_size
            )));
        }

        // CLIP text towers cap out at a 77-token context
        if !(1..=77).contains(&self.detection.max_text_tokens) {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "max_text_tokens must be between 1 and 77, got {}",
                self.detection.max_text_tokens
            )));
        }

        if self.detection.pool_size == 0 {
            return Err(ConfigError::InvalidDetectionConfig(
                "pool_size must be > 0".to_string(),
            ));
        }

        if self.detection.model_path.is_empty() {
            return Err(ConfigError::InvalidDetectionConfig(
                "model_path must not be empty".to_string(),
            ));
        }

        if self.detection.tokenizer_path.is_empty() {
            return Err(ConfigError::InvalidDetectionConfig(
                "tokenizer_path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.detection.confidence_threshold
    }

    pub fn target_size(&self) -> u32 {
        self.detection.target_size
    }

    pub fn max_text_tokens(&self) -> usize {
        self.detection.max_text_tokens
    }

    pub fn pool_size(&self) -> usize {
        self.detection.pool_size
    }

    pub fn fetch_timeout_seconds(&self) -> u64 {
        self.fetch.timeout_seconds
    }
}

// Note: No Default implementation because Config::new() can fail
// Users should explicitly call Config::new()? and handle errors
