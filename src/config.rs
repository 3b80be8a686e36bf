// src/config.rs
//
// YAML configuration, loaded once at startup and consumed as constants.

use crate::types::{AnchorPoint, BoundaryLine, Point, Side};
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    pub lines: Vec<LineConfig>,
    #[serde(default)]
    pub counting: CountingConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory of still frames, played back in file-name order.
    pub path: String,
    pub fps: f64,
    /// Sleep between frames to mimic a live camera.
    pub realtime: bool,
    /// Frames held between capture and processing (1 or 2).
    pub buffer_depth: usize,
    pub pull_timeout_ms: u64,
    /// Back-off after the source reports itself unavailable.
    pub retry_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "frames".to_string(),
            fps: 15.0,
            realtime: false,
            buffer_depth: 2,
            pull_timeout_ms: 2000,
            retry_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    Replay,
    Onnx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    Halt,
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: DetectorBackend,
    pub replay_path: String,
    pub model_path: String,
    pub input_size: usize,
    pub confidence_threshold: f32,
    /// COCO class 0 is "person".
    pub person_class_id: u32,
    pub timeout_ms: u64,
    pub retry: RetryConfig,
    pub on_unavailable: UnavailablePolicy,
    /// While degraded, only every Nth frame is sent to the detector.
    pub degraded_stride: u64,
    pub max_consecutive_unavailable: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Replay,
            replay_path: "detections.jsonl".to_string(),
            model_path: "models/yolov8n.onnx".to_string(),
            input_size: 640,
            confidence_threshold: 0.5,
            person_class_id: 0,
            timeout_ms: 500,
            retry: RetryConfig::default(),
            on_unavailable: UnavailablePolicy::Halt,
            degraded_stride: 5,
            max_consecutive_unavailable: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryConfig {
    /// Back-off before retry number `attempt` (1-based), doubling up to the ceiling.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Max pixel distance between a predicted track position and a detection
    pub max_association_distance: f32,
    /// Consecutive matches required to promote Tentative → Confirmed
    pub confirm_hits: u32,
    /// Missed frames a track survives before retirement
    pub max_missed_frames: u32,
    /// Optional wall-clock retirement, in frame-timestamp milliseconds
    pub max_unseen_ms: Option<f64>,
    /// Tentative tracks older than this (frames) are dropped
    pub max_tentative_age: u32,
    pub history_length: usize,
    pub anchor: AnchorPoint,
    /// Weight of the previous position when smoothing (0 = off)
    pub smoothing_alpha: f32,
    /// Minimum score for an unmatched detection to start a track
    pub spawn_confidence: Option<f32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_association_distance: 80.0,
            confirm_hits: 3,
            max_missed_frames: 20,
            max_unseen_ms: None,
            max_tentative_age: 30,
            history_length: 32,
            anchor: AnchorPoint::Centroid,
            smoothing_alpha: 0.0,
            spawn_confidence: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    pub name: String,
    pub start: [f32; 2],
    pub end: [f32; 2],
    pub positive_side: Side,
}

impl LineConfig {
    pub fn to_line(&self) -> BoundaryLine {
        BoundaryLine::new(
            self.name.clone(),
            Point::from(self.start),
            Point::from(self.end),
            self.positive_side,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingConfig {
    pub clamp_occupancy_at_zero: bool,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            clamp_occupancy_at_zero: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    pub event_log_path: Option<String>,
    pub subscriber_capacity: usize,
    pub summary_interval_frames: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            event_log_path: None,
            subscriber_capacity: 64,
            summary_interval_frames: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "people_counter=info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn boundary_lines(&self) -> Vec<BoundaryLine> {
        self.lines.iter().map(LineConfig::to_line).collect()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.lines.is_empty(), "at least one boundary line is required");
        let mut names = HashSet::new();
        for line in &self.lines {
            ensure!(
                names.insert(line.name.as_str()),
                "duplicate line name '{}'",
                line.name
            );
            ensure!(
                line.to_line().length() > 0.0,
                "line '{}' has zero length",
                line.name
            );
        }

        let d = &self.detector;
        ensure!(
            (0.0..=1.0).contains(&d.confidence_threshold),
            "detector.confidence_threshold must be within [0, 1]"
        );
        ensure!(d.retry.max_attempts >= 1, "detector.retry.max_attempts must be >= 1");
        ensure!(d.degraded_stride >= 1, "detector.degraded_stride must be >= 1");
        ensure!(d.timeout_ms > 0, "detector.timeout_ms must be > 0");
        ensure!(
            d.max_consecutive_unavailable >= 1,
            "detector.max_consecutive_unavailable must be >= 1"
        );

        let t = &self.tracker;
        ensure!(
            t.max_association_distance > 0.0,
            "tracker.max_association_distance must be > 0"
        );
        ensure!(t.confirm_hits >= 1, "tracker.confirm_hits must be >= 1");
        ensure!(t.history_length >= 2, "tracker.history_length must be >= 2");
        ensure!(
            (0.0..1.0).contains(&t.smoothing_alpha),
            "tracker.smoothing_alpha must be within [0, 1)"
        );
        if let Some(spawn) = t.spawn_confidence {
            ensure!(
                (0.0..=1.0).contains(&spawn),
                "tracker.spawn_confidence must be within [0, 1]"
            );
        }

        let s = &self.source;
        ensure!(
            (1..=2).contains(&s.buffer_depth),
            "source.buffer_depth must be 1 or 2"
        );
        ensure!(s.fps > 0.0, "source.fps must be > 0");
        ensure!(
            self.reporting.subscriber_capacity >= 1,
            "reporting.subscriber_capacity must be >= 1"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
lines:
  - name: door
    start: [320, 0]
    end: [320, 480]
    positive_side: right
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.lines.len(), 1);
        assert_eq!(config.tracker.confirm_hits, 3);
        assert_eq!(config.source.buffer_depth, 2);
        assert_eq!(config.detector.backend, DetectorBackend::Replay);
        assert!(config.counting.clamp_occupancy_at_zero);
        let line = &config.boundary_lines()[0];
        assert_eq!(line.positive_side, Side::Right);
        assert_eq!(line.end, Point::new(320.0, 480.0));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
source:
  path: /tmp/frames
  fps: 10
  realtime: true
  buffer_depth: 1
detector:
  backend: onnx
  confidence_threshold: 0.4
  on_unavailable: degrade
  retry:
    max_attempts: 5
tracker:
  max_association_distance: 60
  anchor: bottom_center
  max_unseen_ms: 1500
lines:
  - name: a
    start: [0, 100]
    end: [640, 100]
    positive_side: left
  - name: b
    start: [0, 300]
    end: [640, 300]
    positive_side: right
reporting:
  event_log_path: out/events.jsonl
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.detector.on_unavailable, UnavailablePolicy::Degrade);
        assert_eq!(config.detector.retry.max_attempts, 5);
        assert_eq!(config.detector.retry.initial_backoff_ms, 100);
        assert_eq!(config.tracker.anchor, AnchorPoint::BottomCenter);
        assert_eq!(config.tracker.max_unseen_ms, Some(1500.0));
        assert_eq!(config.lines.len(), 2);
        assert_eq!(
            config.reporting.event_log_path.as_deref(),
            Some("out/events.jsonl")
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_yaml("lines: []").is_err());

        let zero_len = r#"
lines:
  - name: door
    start: [5, 5]
    end: [5, 5]
    positive_side: right
"#;
        assert!(Config::from_yaml(zero_len).is_err());

        let deep_buffer = format!("{}source:\n  buffer_depth: 8\n", MINIMAL);
        assert!(Config::from_yaml(&deep_buffer).is_err());

        let bad_threshold = format!("{}detector:\n  confidence_threshold: 1.5\n", MINIMAL);
        assert!(Config::from_yaml(&bad_threshold).is_err());

        let dup = r#"
lines:
  - name: door
    start: [0, 0]
    end: [0, 10]
    positive_side: right
  - name: door
    start: [5, 0]
    end: [5, 10]
    positive_side: left
"#;
        assert!(Config::from_yaml(dup).is_err());
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let retry = RetryConfig {
            max_attempts: 6,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
        };
        assert_eq!(retry.backoff_ms(1), 100);
        assert_eq!(retry.backoff_ms(2), 200);
        assert_eq!(retry.backoff_ms(3), 400);
        assert_eq!(retry.backoff_ms(4), 500);
        assert_eq!(retry.backoff_ms(40), 500);
    }
}
