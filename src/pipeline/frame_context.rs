// src/pipeline/frame_context.rs
//
// Everything one cycle produced for a single frame. Built up by the driver
// stage by stage and handed back to the caller as the frame outcome.

use crate::analysis::TrackEvent;
use crate::error::TrackingInvariantViolation;
use crate::types::{CrossingDecision, Detection, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Detector ran and tracks were updated.
    Processed,
    /// Bad frame; tracks aged by one miss.
    DecodeFailed,
    /// Detector exceeded its deadline; tracks aged by one miss.
    DetectorTimeout,
    /// One inference failed; tracks aged by one miss.
    InferenceFailed,
    /// Detector unavailable after retries, running degraded.
    DetectorUnavailable,
    /// Not sent to the detector while degraded; tracks untouched.
    SkippedDegraded,
    /// Detector retries cut short by a stop request; tracks untouched.
    Interrupted,
}

impl FrameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::DecodeFailed => "decode_failed",
            Self::DetectorTimeout => "detector_timeout",
            Self::InferenceFailed => "inference_failed",
            Self::DetectorUnavailable => "detector_unavailable",
            Self::SkippedDegraded => "skipped_degraded",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether the tracker saw this frame (with or without detections).
    pub fn aged_tracks(&self) -> bool {
        !matches!(self, Self::SkippedDegraded | Self::Interrupted)
    }
}

#[derive(Debug, Clone)]
pub struct FrameContext {
    pub seq: u64,
    pub timestamp_ms: f64,
    pub status: FrameStatus,
    pub detections: Vec<Detection>,
    pub track_events: Vec<TrackEvent>,
    pub decisions: Vec<CrossingDecision>,
    pub violations: Vec<TrackingInvariantViolation>,
}

impl FrameContext {
    pub fn new(frame: &Frame) -> Self {
        Self {
            seq: frame.seq,
            timestamp_ms: frame.timestamp_ms,
            status: FrameStatus::Processed,
            detections: Vec::new(),
            track_events: Vec::new(),
            decisions: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn into_outcome(self) -> FrameOutcome {
        FrameOutcome {
            seq: self.seq,
            status: self.status,
            detections: self.detections.len(),
            track_events: self.track_events,
            decisions: self.decisions,
            violations: self.violations,
        }
    }
}

/// Result of one `process_frame` call.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub seq: u64,
    pub status: FrameStatus,
    /// Person detections fed to the tracker.
    pub detections: usize,
    pub track_events: Vec<TrackEvent>,
    /// Decisions applied to Count State, in application order.
    pub decisions: Vec<CrossingDecision>,
    /// Decisions dropped because they broke a tracking invariant.
    pub violations: Vec<TrackingInvariantViolation>,
}
