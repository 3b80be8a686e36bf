// src/pipeline/driver.rs
//
// Sequential frame → detect → track → evaluate → count → publish loop.
//
// Exactly one frame is in flight at a time. Per-frame failures are absorbed
// (the frame counts as a miss); only detector escalation ends a run early,
// and it does so before the tracker has been touched for that frame.

use crate::analysis::{LineCrossingEvaluator, PersonTracker, TrackEventKind};
use crate::config::{Config, DetectorConfig, UnavailablePolicy};
use crate::counting::{CountSnapshot, CountState};
use crate::detection::{AdapterConfig, DetectorEngine, PersonDetector};
use crate::error::{DetectorError, PipelineError, TrackingInvariantViolation};
use crate::pipeline::event_bus::{EventBus, PipelineEvent, ReportHandle};
use crate::pipeline::event_log::EventLog;
use crate::pipeline::frame_buffer::{BufferPoll, CaptureWorker};
use crate::pipeline::frame_context::{FrameContext, FrameOutcome, FrameStatus};
use crate::pipeline::metrics::{MetricsSummary, PipelineMetrics};
use crate::types::{CrossingDecision, Detection, Frame};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const MAX_PENDING_EVENTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StopRequested,
    EndOfStream,
    DetectorUnavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub stop_reason: StopReason,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub counts: CountSnapshot,
    pub metrics: MetricsSummary,
}

/// Why `detect_with_retry` produced no detections.
#[derive(Debug)]
enum DetectFailure {
    /// Final error and the number of attempts made.
    Failed(DetectorError, u32),
    /// Stop requested while retrying an unavailable detector.
    Interrupted { attempts: u32, reason: String },
}

/// Frames since the detector was declared unavailable.
#[derive(Debug, Clone, Copy)]
struct DegradedState {
    since_seq: u64,
    frames: u64,
}

pub struct PipelineDriver<E: DetectorEngine> {
    detector: PersonDetector<E>,
    tracker: PersonTracker,
    evaluator: LineCrossingEvaluator,
    counts: CountState,
    report: ReportHandle,
    bus: EventBus,
    event_log: Option<EventLog>,
    metrics: PipelineMetrics,
    policy: DetectorConfig,
    summary_interval_frames: u64,
    stop: Arc<AtomicBool>,
    degraded: Option<DegradedState>,
    consecutive_unavailable: u32,
}

impl<E: DetectorEngine> PipelineDriver<E> {
    pub fn new(config: &Config, engine: E, report: ReportHandle) -> Self {
        let detector = PersonDetector::new(
            engine,
            AdapterConfig {
                confidence_threshold: config.detector.confidence_threshold,
                person_class_id: config.detector.person_class_id,
            },
        );
        let lines = config.boundary_lines();
        let counts = CountState::new(
            lines.iter().map(|l| l.name.clone()),
            config.counting.clamp_occupancy_at_zero,
        );
        report.publish_snapshot(counts.snapshot());

        info!(
            "Pipeline ready: detector={} lines={} confirm_hits={} max_dist={:.0}px",
            detector.engine_name(),
            lines.len(),
            config.tracker.confirm_hits,
            config.tracker.max_association_distance
        );

        Self {
            detector,
            tracker: PersonTracker::new(config.tracker.clone()),
            evaluator: LineCrossingEvaluator::new(lines),
            counts,
            report,
            bus: EventBus::new(MAX_PENDING_EVENTS),
            event_log: None,
            metrics: PipelineMetrics::new(),
            policy: config.detector.clone(),
            summary_interval_frames: config.reporting.summary_interval_frames,
            stop: Arc::new(AtomicBool::new(false)),
            degraded: None,
            consecutive_unavailable: 0,
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Flag checked between detector retries; the run loop also checks the
    /// capture worker's flag once per frame.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn counts(&self) -> &CountState {
        &self.counts
    }

    pub fn tracker(&self) -> &PersonTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn report(&self) -> &ReportHandle {
        &self.report
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    // ========================================================================
    // ONE CYCLE
    // ========================================================================

    /// Run one full cycle. Either the frame completes (counts published) or
    /// the call fails before any state has changed.
    pub fn process_frame(&mut self, frame: Frame) -> Result<FrameOutcome, PipelineError> {
        let cycle_start = Instant::now();
        let mut ctx = FrameContext::new(&frame);

        if let Some(state) = self.degraded.as_mut() {
            state.frames += 1;
            if state.frames % self.policy.degraded_stride != 0 {
                ctx.status = FrameStatus::SkippedDegraded;
                self.metrics.inc(&self.metrics.frames_skipped_degraded);
                return Ok(ctx.into_outcome());
            }
        }

        let detect_start = Instant::now();
        let detections = match self.detect_with_retry(&frame) {
            Ok(detections) => {
                self.on_detector_success(frame.seq);
                detections
            }
            Err(DetectFailure::Interrupted { attempts, reason }) => {
                // Nothing has changed yet; leave the frame for the run loop to drop.
                info!(
                    "Stop requested while retrying frame {} after {} attempt(s): {}",
                    frame.seq, attempts, reason
                );
                ctx.status = FrameStatus::Interrupted;
                return Ok(ctx.into_outcome());
            }
            Err(DetectFailure::Failed(DetectorError::Unavailable(reason), attempts)) => {
                self.on_detector_unavailable(frame.seq, reason, attempts)?;
                ctx.status = FrameStatus::DetectorUnavailable;
                Vec::new()
            }
            Err(DetectFailure::Failed(e, _)) => {
                ctx.status = self.on_transient_error(frame.seq, &e);
                Vec::new()
            }
        };
        self.metrics
            .set_timing(&self.metrics.detect_time_us, detect_start.elapsed());
        self.metrics
            .add(&self.metrics.detections, detections.len() as u64);

        // Tracking: a failed detection is an empty frame, so tracks age by one miss.
        let events = self
            .tracker
            .update(&detections, frame.timestamp_ms, frame.seq);
        for event in &events {
            match event.kind {
                TrackEventKind::Created => self.metrics.inc(&self.metrics.tracks_created),
                TrackEventKind::Retired => self.metrics.inc(&self.metrics.tracks_retired),
                TrackEventKind::Confirmed | TrackEventKind::Updated => {}
            }
        }
        ctx.detections = detections;
        ctx.track_events = events;

        // Crossings, including a final look at tracks retired this frame.
        let decisions = self
            .evaluator
            .evaluate(self.tracker.tracks_for_evaluation());
        self.apply_decisions(decisions, &mut ctx);

        self.counts.record_frame();
        self.metrics.inc(&self.metrics.frames_processed);
        self.publish();
        self.tracker.take_retired();

        self.metrics
            .set_timing(&self.metrics.cycle_time_us, cycle_start.elapsed());
        self.log_periodic_summary();
        Ok(ctx.into_outcome())
    }

    fn detect_with_retry(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectFailure> {
        // Already degraded: one probe per attempted frame, no back-off.
        let max_attempts = if self.degraded.is_some() {
            1
        } else {
            self.policy.retry.max_attempts.max(1)
        };

        let mut attempt = 1;
        loop {
            match self.detector.detect(frame) {
                Ok(detections) => return Ok(detections),
                Err(DetectorError::Unavailable(reason)) if attempt < max_attempts => {
                    if self.stop.load(Ordering::Relaxed) {
                        return Err(DetectFailure::Interrupted {
                            attempts: attempt,
                            reason,
                        });
                    }
                    let backoff = self.policy.retry.backoff_ms(attempt);
                    warn!(
                        "Detector unavailable on frame {} (attempt {}/{}): {} - retrying in {}ms",
                        frame.seq, attempt, max_attempts, reason, backoff
                    );
                    thread::sleep(Duration::from_millis(backoff));
                    attempt += 1;
                }
                Err(e) => return Err(DetectFailure::Failed(e, attempt)),
            }
        }
    }

    fn on_detector_success(&mut self, seq: u64) {
        if let Some(state) = self.degraded.take() {
            info!(
                "✓ Detector recovered on frame {} (degraded since frame {})",
                seq, state.since_seq
            );
            self.bus.publish(PipelineEvent::DetectorRecovered {
                frame_seq: seq,
                unavailable_frames: self.consecutive_unavailable,
            });
        }
        self.consecutive_unavailable = 0;
    }

    fn on_detector_unavailable(
        &mut self,
        seq: u64,
        reason: String,
        attempts: u32,
    ) -> Result<(), PipelineError> {
        self.consecutive_unavailable += 1;
        self.metrics.inc(&self.metrics.detector_unavailable);

        match self.policy.on_unavailable {
            UnavailablePolicy::Halt => {
                error!(
                    "Detector unavailable on frame {} after {} attempt(s): {} - halting",
                    seq, attempts, reason
                );
                Err(PipelineError::DetectorUnavailable { attempts, reason })
            }
            UnavailablePolicy::Degrade => {
                if self.consecutive_unavailable >= self.policy.max_consecutive_unavailable {
                    error!(
                        "Detector unavailable for {} consecutive attempted frames: {} - giving up",
                        self.consecutive_unavailable, reason
                    );
                    return Err(PipelineError::DetectorUnavailable {
                        attempts: self.consecutive_unavailable,
                        reason,
                    });
                }
                if self.degraded.is_none() {
                    warn!(
                        "Detector unavailable on frame {}: {} - degrading to every {} frame(s)",
                        seq, reason, self.policy.degraded_stride
                    );
                    self.degraded = Some(DegradedState {
                        since_seq: seq,
                        frames: 0,
                    });
                    self.bus.publish(PipelineEvent::DetectorDegraded {
                        frame_seq: seq,
                        reason,
                    });
                }
                Ok(())
            }
        }
    }

    fn on_transient_error(&mut self, seq: u64, e: &DetectorError) -> FrameStatus {
        warn!("Frame {} skipped: {}", seq, e);
        match e {
            DetectorError::Decode(_) => {
                self.metrics.inc(&self.metrics.decode_errors);
                FrameStatus::DecodeFailed
            }
            DetectorError::Timeout(_) => {
                self.metrics.inc(&self.metrics.detector_timeouts);
                FrameStatus::DetectorTimeout
            }
            DetectorError::Inference(_) | DetectorError::Unavailable(_) => {
                self.metrics.inc(&self.metrics.inference_errors);
                FrameStatus::InferenceFailed
            }
        }
    }

    /// Validate and apply decisions. Offenders are logged and dropped.
    fn apply_decisions(&mut self, decisions: Vec<CrossingDecision>, ctx: &mut FrameContext) {
        for decision in decisions {
            let applied = if self.tracker.get_track(decision.track_id).is_none() {
                Err(TrackingInvariantViolation::UnknownTrack {
                    track_id: decision.track_id,
                })
            } else {
                self.counts.apply(&decision)
            };

            match applied {
                Ok(()) => {
                    self.metrics.inc(&self.metrics.crossings);
                    self.bus.publish(PipelineEvent::Crossing(decision.clone()));
                    ctx.decisions.push(decision);
                }
                Err(violation) => {
                    error!(
                        "Dropping crossing decision on frame {}: {}",
                        ctx.seq, violation
                    );
                    self.metrics.inc(&self.metrics.invariant_violations);
                    self.bus.publish(PipelineEvent::InvariantViolation {
                        frame_seq: ctx.seq,
                        violation: violation.clone(),
                    });
                    ctx.violations.push(violation);
                }
            }
        }
    }

    fn publish(&mut self) {
        let snapshot = self.counts.snapshot();
        self.report.publish_snapshot(snapshot.clone());

        for event in self.bus.drain() {
            match event {
                PipelineEvent::Crossing(decision) => {
                    self.report.publish_decision(&decision);
                    if let Some(log) = self.event_log.as_mut() {
                        if let Err(e) = log.write_crossing(&decision, &snapshot) {
                            warn!("Event log write failed: {:#}", e);
                        }
                    }
                }
                other => debug!("Pipeline event: {:?}", other),
            }
        }
    }

    fn log_periodic_summary(&self) {
        let interval = self.summary_interval_frames;
        let frames = self.counts.snapshot().frames_processed;
        if interval == 0 || frames % interval != 0 {
            return;
        }
        info!(
            "📊 {} frames | in={} out={} net={} | live tracks={} | {:.1} fps",
            frames,
            self.counts.entries(),
            self.counts.exits(),
            self.counts.net(),
            self.tracker.live_count(),
            self.metrics.fps()
        );
    }

    // ========================================================================
    // RUN LOOP
    // ========================================================================

    /// Drive frames from `capture` until stop, end of stream or a fatal
    /// detector failure. The capture worker is stopped and the event log
    /// flushed in every case.
    pub fn run(
        &mut self,
        capture: CaptureWorker,
        pull_timeout: Duration,
    ) -> Result<RunSummary, PipelineError> {
        info!("▶ Pipeline running");

        let result = loop {
            if capture.stop_requested() || self.stop.load(Ordering::Relaxed) {
                info!("Stop requested");
                break Ok(StopReason::StopRequested);
            }
            match capture.pop(pull_timeout) {
                BufferPoll::Frame(frame) => {
                    if let Err(e) = self.process_frame(frame) {
                        break Err(e);
                    }
                }
                BufferPoll::Empty => debug!("No frame within {:?}", pull_timeout),
                BufferPoll::Closed => break Ok(StopReason::EndOfStream),
            }
        };

        let frames_dropped = capture.buffer().dropped();
        let (frames_captured, capture_failure) = match capture.stop() {
            Ok(n) => (n, None),
            Err(e) => {
                error!("{:#}", e);
                (0, Some(format!("{:#}", e)))
            }
        };

        let stop_reason = match &result {
            Ok(reason) => *reason,
            Err(_) => StopReason::DetectorUnavailable,
        };
        let summary = self.finish(stop_reason, frames_captured, frames_dropped);
        match (result, capture_failure) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(reason)) => Err(PipelineError::Source(reason)),
            (Ok(_), None) => Ok(summary),
        }
    }

    fn finish(&mut self, stop_reason: StopReason, frames_captured: u64, frames_dropped: u64) -> RunSummary {
        let counts = self.counts.snapshot();
        self.report.publish_snapshot(counts.clone());
        let metrics = self.metrics.summary();

        if let Some(log) = self.event_log.as_mut() {
            if let Err(e) = log.write_summary(&counts, &metrics) {
                warn!("Event log summary failed: {:#}", e);
            }
        }

        let malformed = self.detector.malformed_dropped();
        if malformed > 0 {
            warn!("{} malformed detection(s) dropped by the adapter", malformed);
        }

        info!(
            "■ Pipeline stopped ({:?}): {} frames processed, {} dropped | in={} out={} net={}",
            stop_reason,
            metrics.frames_processed,
            frames_dropped,
            counts.entries,
            counts.exits,
            counts.net
        );

        RunSummary {
            stop_reason,
            frames_captured,
            frames_dropped,
            counts,
            metrics,
        }
    }
}
