// src/detection/engine.rs
//
// Seam to the external inference engine. The engine only sees pixels and
// returns loosely validated boxes; the adapter does the filtering.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// One inference call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub image: Arc<RgbImage>,
}

/// Engine output before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// [x1, y1, x2, y2] in frame pixels
    pub bbox: [f32; 4],
    pub score: f32,
    pub class_id: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine call exceeded {0:?}")]
    Timeout(Duration),

    #[error("inference failed: {0}")]
    Failed(String),
}

pub trait DetectorEngine: Send {
    fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError>;

    fn name(&self) -> &str;
}

impl<E: DetectorEngine + ?Sized> DetectorEngine for Box<E> {
    fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
        (**self).infer(request)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
