// src/pipeline/metrics.rs
//
// Runtime counters and timings for the counting pipeline. Cheap to clone;
// every clone shares the same counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_processed: Arc<AtomicU64>,
    pub frames_skipped_degraded: Arc<AtomicU64>,
    pub decode_errors: Arc<AtomicU64>,
    pub detector_timeouts: Arc<AtomicU64>,
    pub inference_errors: Arc<AtomicU64>,
    pub detector_unavailable: Arc<AtomicU64>,
    pub detections: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_retired: Arc<AtomicU64>,
    pub crossings: Arc<AtomicU64>,
    pub invariant_violations: Arc<AtomicU64>,
    pub detect_time_us: Arc<AtomicU64>,
    pub cycle_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            frames_skipped_degraded: Arc::new(AtomicU64::new(0)),
            decode_errors: Arc::new(AtomicU64::new(0)),
            detector_timeouts: Arc::new(AtomicU64::new(0)),
            inference_errors: Arc::new(AtomicU64::new(0)),
            detector_unavailable: Arc::new(AtomicU64::new(0)),
            detections: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_retired: Arc::new(AtomicU64::new(0)),
            crossings: Arc::new(AtomicU64::new(0)),
            invariant_violations: Arc::new(AtomicU64::new(0)),
            detect_time_us: Arc::new(AtomicU64::new(0)),
            cycle_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Latest value wins.
    pub fn set_timing(&self, counter: &AtomicU64, duration: Duration) {
        counter.store(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSummary {
            frames_processed: load(&self.frames_processed),
            frames_skipped_degraded: load(&self.frames_skipped_degraded),
            fps: self.fps(),
            decode_errors: load(&self.decode_errors),
            detector_timeouts: load(&self.detector_timeouts),
            inference_errors: load(&self.inference_errors),
            detector_unavailable: load(&self.detector_unavailable),
            detections: load(&self.detections),
            tracks_created: load(&self.tracks_created),
            tracks_retired: load(&self.tracks_retired),
            crossings: load(&self.crossings),
            invariant_violations: load(&self.invariant_violations),
            last_detect_us: load(&self.detect_time_us),
            last_cycle_us: load(&self.cycle_time_us),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub frames_skipped_degraded: u64,
    pub fps: f64,
    pub decode_errors: u64,
    pub detector_timeouts: u64,
    pub inference_errors: u64,
    pub detector_unavailable: u64,
    pub detections: u64,
    pub tracks_created: u64,
    pub tracks_retired: u64,
    pub crossings: u64,
    pub invariant_violations: u64,
    pub last_detect_us: u64,
    pub last_cycle_us: u64,
    pub elapsed_secs: f64,
}
