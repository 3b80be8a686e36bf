// src/error.rs
//
// Failure taxonomy. Per-frame problems are absorbed by the driver;
// only detector escalation and source failures end a run.

use crate::types::TrackId;
use std::time::Duration;
use thiserror::Error;

/// A single frame could not be turned into pixels.
#[derive(Error, Debug)]
pub enum FrameDecodeError {
    #[error("frame payload is empty")]
    Empty,

    #[error("raw frame buffer has {got} bytes, expected {expected}")]
    Malformed { expected: usize, got: usize },

    #[error("frame could not be decoded: {0}")]
    Undecodable(#[from] image::ImageError),
}

/// Outcome of one detector call that produced no detections.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Decode(#[from] FrameDecodeError),

    /// The inference engine or its accelerator is not responding.
    #[error("detector unavailable: {0}")]
    Unavailable(String),

    #[error("detector timed out after {0:?}")]
    Timeout(Duration),

    /// One inference failed but the engine is otherwise healthy.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectorError {
    /// Transient errors cost one frame; the pipeline keeps going.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}

/// Signals a broken contract between tracker, evaluator and count state.
/// Never expected at runtime; offending decisions are dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingInvariantViolation {
    #[error("crossing decision references unknown track {track_id}")]
    UnknownTrack { track_id: TrackId },

    #[error("track {track_id} already counted on line {line}")]
    DuplicateDecision { track_id: TrackId, line: usize },

    #[error("crossing decision references unknown line {line}")]
    UnknownLine { line: usize },
}

/// Failures surfaced to whoever runs the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector unavailable after {attempts} attempt(s): {reason}")]
    DetectorUnavailable { attempts: u32, reason: String },

    #[error("frame source failed: {0}")]
    Source(String),
}
