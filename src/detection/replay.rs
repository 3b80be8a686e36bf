// src/detection/replay.rs
//
// Replays detections recorded offline (one JSON object per frame) so the
// counting pipeline can run without an accelerator.

use super::engine::{DetectorEngine, EngineError, InferenceRequest, RawDetection};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ReplayLine {
    seq: u64,
    #[serde(default)]
    detections: Vec<RawDetection>,
    /// Recorded accelerator outage for this frame.
    #[serde(default)]
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct ReplayEngine {
    frames: HashMap<u64, Vec<RawDetection>>,
    unavailable_seqs: HashSet<u64>,
}

impl ReplayEngine {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open replay file {}", path.display()))?;
        let engine = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse replay file {}", path.display()))?;

        info!(
            "✓ Replay engine loaded {} frame(s) from {}",
            engine.frames.len(),
            path.display()
        );
        Ok(engine)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut engine = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let record: ReplayLine = serde_json::from_str(trimmed)
                .with_context(|| format!("line {}", idx + 1))?;
            if record.unavailable {
                engine.unavailable_seqs.insert(record.seq);
            }
            engine
                .frames
                .entry(record.seq)
                .or_default()
                .extend(record.detections);
        }
        Ok(engine)
    }

    pub fn from_frames(frames: impl IntoIterator<Item = (u64, Vec<RawDetection>)>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            unavailable_seqs: HashSet::new(),
        }
    }

    /// Frames for which the engine reports itself unavailable.
    pub fn with_unavailable_seqs(mut self, seqs: impl IntoIterator<Item = u64>) -> Self {
        self.unavailable_seqs.extend(seqs);
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl DetectorEngine for ReplayEngine {
    fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
        if self.unavailable_seqs.contains(&request.seq) {
            return Err(EngineError::Unavailable(format!(
                "replayed outage at frame {}",
                request.seq
            )));
        }
        Ok(self.frames.get(&request.seq).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "replay"
    }
}
