// src/analysis/mod.rs
//
// Per-frame analysis stages.
//
// Signal flow:
//   Person detections → person_tracker → TrackEvents
//   Confirmed tracks  → line_crossing  → CrossingDecision

pub mod line_crossing;
pub mod person_tracker;

pub use line_crossing::LineCrossingEvaluator;
pub use person_tracker::{
    HistoryPoint, PersonTracker, Track, TrackEvent, TrackEventKind, TrackState,
};
