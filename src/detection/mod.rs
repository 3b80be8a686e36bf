// src/detection/mod.rs

mod adapter;
mod engine;
#[cfg(feature = "onnx")]
mod onnx;
mod replay;
mod timed;

// Re-export public APIs
pub use adapter::{confidence_order, decode_frame, AdapterConfig, PersonDetector};
pub use engine::{DetectorEngine, EngineError, InferenceRequest, RawDetection};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;
pub use replay::ReplayEngine;
pub use timed::TimedEngine;
