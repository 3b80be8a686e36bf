// src/counting.rs
//
// Count State: the only owner of the running totals and the event log.
// `apply` is the sole mutator; `net` is always derived from the two
// counters so it can never drift.

use crate::error::TrackingInvariantViolation;
use crate::types::{CrossingDecision, Direction, TrackId};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineCounts {
    pub name: String,
    pub entries: u64,
    pub exits: u64,
}

/// One applied crossing, in application order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountEvent {
    pub index: u64,
    pub track_id: TrackId,
    pub line: usize,
    pub line_name: String,
    pub direction: Direction,
    pub timestamp_ms: f64,
    pub frame_seq: u64,
}

/// Consistent copy of the counters, safe to hand to other threads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountSnapshot {
    pub entries: u64,
    pub exits: u64,
    pub net: i64,
    /// `net`, clamped at zero when so configured.
    pub occupancy: i64,
    pub per_line: Vec<LineCounts>,
    pub last_updated_ms: Option<f64>,
    pub frames_processed: u64,
}

#[derive(Debug, Clone)]
pub struct CountState {
    entries: u64,
    exits: u64,
    per_line: Vec<LineCounts>,
    counted: HashSet<(TrackId, usize)>,
    events: Vec<CountEvent>,
    last_updated_ms: Option<f64>,
    frames_processed: u64,
    clamp_occupancy: bool,
}

impl CountState {
    pub fn new(line_names: impl IntoIterator<Item = String>, clamp_occupancy: bool) -> Self {
        let per_line = line_names
            .into_iter()
            .map(|name| LineCounts {
                name,
                ..LineCounts::default()
            })
            .collect();
        Self {
            entries: 0,
            exits: 0,
            per_line,
            counted: HashSet::new(),
            events: Vec::new(),
            last_updated_ms: None,
            frames_processed: 0,
            clamp_occupancy,
        }
    }

    /// Count one crossing. A second decision for the same (track, line) pair
    /// is rejected and leaves the state untouched.
    pub fn apply(&mut self, decision: &CrossingDecision) -> Result<(), TrackingInvariantViolation> {
        if decision.line >= self.per_line.len() {
            return Err(TrackingInvariantViolation::UnknownLine {
                line: decision.line,
            });
        }
        if !self.counted.insert((decision.track_id, decision.line)) {
            return Err(TrackingInvariantViolation::DuplicateDecision {
                track_id: decision.track_id,
                line: decision.line,
            });
        }

        let line = &mut self.per_line[decision.line];
        match decision.direction {
            Direction::Entering => {
                self.entries += 1;
                line.entries += 1;
            }
            Direction::Exiting => {
                self.exits += 1;
                line.exits += 1;
            }
        }

        let index = self.events.len() as u64;
        self.events.push(CountEvent {
            index,
            track_id: decision.track_id,
            line: decision.line,
            line_name: decision.line_name.clone(),
            direction: decision.direction,
            timestamp_ms: decision.timestamp_ms,
            frame_seq: decision.frame_seq,
        });
        self.last_updated_ms = Some(
            self.last_updated_ms
                .map_or(decision.timestamp_ms, |t| t.max(decision.timestamp_ms)),
        );

        info!(
            "Count #{}: T{} {} via '{}' → in={} out={} net={}",
            index,
            decision.track_id,
            decision.direction.as_str(),
            decision.line_name,
            self.entries,
            self.exits,
            self.net()
        );
        Ok(())
    }

    pub fn record_frame(&mut self) {
        self.frames_processed += 1;
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn exits(&self) -> u64 {
        self.exits
    }

    pub fn net(&self) -> i64 {
        self.entries as i64 - self.exits as i64
    }

    pub fn events(&self) -> &[CountEvent] {
        &self.events
    }

    pub fn snapshot(&self) -> CountSnapshot {
        let net = self.net();
        CountSnapshot {
            entries: self.entries,
            exits: self.exits,
            net,
            occupancy: if self.clamp_occupancy { net.max(0) } else { net },
            per_line: self.per_line.clone(),
            last_updated_ms: self.last_updated_ms,
            frames_processed: self.frames_processed,
        }
    }
}
