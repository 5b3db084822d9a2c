// ONNX Runtime session construction with automatic hardware acceleration
// detection, plus a bounded session pool for concurrent inference.

use anyhow::{Context, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use tracing::{debug, info};

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

#[cfg(all(target_os = "windows", feature = "directml"))]
use ort::execution_providers::DirectMLExecutionProvider;

#[cfg(feature = "openvino")]
use ort::execution_providers::OpenVINOExecutionProvider;

/// Calculate optimal thread count for ONNX Runtime CPU inference.
///
/// Windows shows synchronization overhead past ~6 intra-op threads,
/// Linux/macOS scale with physical cores.
fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!(
        "CPU threads: {} total cores, using {} for inference",
        total_cores, optimal
    );
    optimal
}

fn base_builder() -> Result<SessionBuilder> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(optimal_intra_op_threads())?)
}

/// Build a session for the model at `model_path`.
///
/// `forced_backend` comes from the INFERENCE_BACKEND env var; `None` or
/// "AUTO" tries compiled-in accelerators in order of preference and
/// falls back to plain CPU. Returns the device label alongside the
/// session so startup logs can report what was picked.
pub fn build_session(model_path: &str, forced_backend: Option<&str>) -> Result<(String, Session)> {
    match forced_backend {
        None | Some("AUTO") => build_auto(model_path),
        Some(backend) => build_forced(model_path, backend),
    }
}

fn build_forced(model_path: &str, backend: &str) -> Result<(String, Session)> {
    match backend {
        #[cfg(feature = "tensorrt")]
        "TENSORRT" => {
            info!("Forcing TensorRT backend...");
            let session = base_builder()?
                .with_execution_providers([TensorRTExecutionProvider::default().build()])?
                .commit_from_file(model_path)?;
            Ok(("TensorRT (forced)".to_string(), session))
        }
        #[cfg(not(feature = "tensorrt"))]
        "TENSORRT" => {
            anyhow::bail!(
                "TensorRT backend not available. Rebuild with: cargo build --features tensorrt"
            )
        }

        #[cfg(feature = "cuda")]
        "CUDA" => {
            info!("Forcing CUDA backend...");
            let session = base_builder()?
                .with_execution_providers([CUDAExecutionProvider::default().build()])?
                .commit_from_file(model_path)?;
            Ok(("CUDA (forced)".to_string(), session))
        }
        #[cfg(not(feature = "cuda"))]
        "CUDA" => {
            anyhow::bail!("CUDA backend not available. Rebuild with: cargo build --features cuda")
        }

        #[cfg(feature = "openvino")]
        "OPENVINO" => {
            info!("Forcing OpenVINO backend...");
            let session = base_builder()?
                .with_execution_providers([OpenVINOExecutionProvider::default()
                    .with_device_type("CPU")
                    .build()])?
                .commit_from_file(model_path)?;
            Ok(("OpenVINO-CPU (forced)".to_string(), session))
        }
        #[cfg(not(feature = "openvino"))]
        "OPENVINO" => {
            anyhow::bail!(
                "OpenVINO backend not available. Rebuild with: cargo build --features openvino"
            )
        }

        #[cfg(all(target_os = "windows", feature = "directml"))]
        "DIRECTML" => {
            info!("Forcing DirectML backend...");
            let session = base_builder()?
                .with_execution_providers([DirectMLExecutionProvider::default().build()])?
                .commit_from_file(model_path)?;
            Ok(("DirectML (forced)".to_string(), session))
        }
        #[cfg(not(all(target_os = "windows", feature = "directml")))]
        "DIRECTML" => {
            anyhow::bail!(
                "DirectML backend not available. Rebuild with: cargo build --features directml (Windows only)"
            )
        }

        #[cfg(all(target_os = "macos", feature = "coreml"))]
        "COREML" => {
            info!("Forcing CoreML backend...");
            let session = base_builder()?
                .with_execution_providers([CoreMLExecutionProvider::default().build()])?
                .commit_from_file(model_path)?;
            Ok(("CoreML (forced)".to_string(), session))
        }
        #[cfg(not(all(target_os = "macos", feature = "coreml")))]
        "COREML" => {
            anyhow::bail!(
                "CoreML backend not available. Rebuild with: cargo build --features coreml (macOS only)"
            )
        }

        "CPU" => {
            info!("Forcing CPU backend...");
            let session = base_builder()?
                .with_execution_providers([CPUExecutionProvider::default().build()])?
                .commit_from_file(model_path)?;
            Ok(("CPU (forced)".to_string(), session))
        }
        _ => {
            anyhow::bail!(
                "Unknown inference backend '{}'. \
                Valid options: TENSORRT, CUDA, OPENVINO, DIRECTML, COREML, CPU, AUTO",
                backend
            )
        }
    }
}

fn build_auto(model_path: &str) -> Result<(String, Session)> {
    // Try hardware acceleration in order of preference.
    // Only providers compiled in via Cargo features are attempted.

    #[cfg(feature = "tensorrt")]
    {
        if let Ok(session) = base_builder().and_then(|b| -> Result<Session> {
            Ok(b.with_execution_providers([TensorRTExecutionProvider::default().build()])?
                .commit_from_file(model_path)?)
        }) {
            info!("✓ Using TensorRT acceleration");
            return Ok(("TensorRT".to_string(), session));
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(session) = base_builder().and_then(|b| -> Result<Session> {
            Ok(b.with_execution_providers([CUDAExecutionProvider::default().build()])?
                .commit_from_file(model_path)?)
        }) {
            info!("✓ Using CUDA acceleration");
            return Ok(("CUDA".to_string(), session));
        }
    }

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    {
        if let Ok(session) = base_builder().and_then(|b| -> Result<Session> {
            Ok(b.with_execution_providers([CoreMLExecutionProvider::default().build()])?
                .commit_from_file(model_path)?)
        }) {
            info!("✓ Using CoreML acceleration (Apple Neural Engine)");
            return Ok(("CoreML".to_string(), session));
        }
    }

    #[cfg(all(target_os = "windows", feature = "directml"))]
    {
        if let Ok(session) = base_builder().and_then(|b| -> Result<Session> {
            Ok(b.with_execution_providers([DirectMLExecutionProvider::default().build()])?
                .commit_from_file(model_path)?)
        }) {
            info!("✓ Using DirectML acceleration");
            return Ok(("DirectML".to_string(), session));
        }
    }

    #[cfg(feature = "openvino")]
    {
        if let Ok(session) = base_builder().and_then(|b| -> Result<Session> {
            Ok(b.with_execution_providers([OpenVINOExecutionProvider::default()
                .with_device_type("CPU")
                .build()])?
                .commit_from_file(model_path)?)
        }) {
            info!("✓ Using OpenVINO acceleration (Intel CPU optimizations)");
            return Ok(("OpenVINO-CPU".to_string(), session));
        }
    }

    // Final fallback: pure CPU
    let session = base_builder()?
        .with_execution_providers([CPUExecutionProvider::default().build()])?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model from {}", model_path))?;

    info!("✓ Using CPU (no hardware acceleration)");
    Ok(("CPU".to_string(), session))
}

/// Bounded pool of ONNX Runtime sessions.
///
/// crossbeam recv() blocks when the pool is empty, which is the only
/// backpressure the service applies to in-flight inference.
pub struct OnnxSessionPool {
    sender: Sender<Session>,
    receiver: Receiver<Session>,
}

impl OnnxSessionPool {
    /// Create a new session pool with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self { sender, receiver }
    }

    /// Get sender for adding sessions to the pool
    pub fn sender(&self) -> &Sender<Session> {
        &self.sender
    }

    /// Acquire a session from the pool (blocks if pool is empty)
    pub fn acquire(&self) -> Session {
        self.receiver.recv().expect("Session pool exhausted")
    }

    /// Release a session back to the pool
    pub fn release(&self, session: Session) {
        self.sender
            .send(session)
            .expect("Failed to return session to pool");
    }
}
