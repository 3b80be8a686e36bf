// src/analysis/line_crossing.rs
//
// Decides, once per track and line, whether a confirmed track's trajectory
// crossed a boundary line and in which direction.
//
// Each track carries a cursor (the newest history sequence already checked)
// and, per line, the last point seen strictly off it. Every movement segment
// is examined exactly once even when the track was confirmed several frames
// after it actually crossed, or lingered on the line past its history.

use super::person_tracker::{HistoryPoint, Track};
use crate::types::{BoundaryLine, CrossingDecision, Direction, Point, Side};
use tracing::{debug, info};

pub struct LineCrossingEvaluator {
    lines: Vec<BoundaryLine>,
}

/// A movement segment that crossed a line.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Crossing {
    toward: Side,
    at: HistoryPoint,
}

impl LineCrossingEvaluator {
    pub fn new(lines: Vec<BoundaryLine>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[BoundaryLine] {
        &self.lines
    }

    /// Evaluate every confirmed track. Decisions come out ordered by
    /// (track id, line index); each sets the track's crossed flag.
    pub fn evaluate<'a>(
        &self,
        tracks: impl IntoIterator<Item = &'a mut Track>,
    ) -> Vec<CrossingDecision> {
        let mut decisions = Vec::new();

        for track in tracks {
            if !track.is_confirmed() {
                continue;
            }
            let newest = match track.history.back() {
                Some(h) => h.seq,
                None => continue,
            };
            if track.evaluated_through() == Some(newest) {
                continue;
            }

            for (idx, line) in self.lines.iter().enumerate() {
                if track.has_crossed(idx) {
                    continue;
                }
                let (found, anchor) = first_crossing(track, idx, line);
                if let Some((position, side)) = anchor {
                    track.set_line_anchor(idx, position, side);
                }
                let Some(crossing) = found else {
                    continue;
                };
                track.mark_crossed(idx);

                let direction = if crossing.toward == line.positive_side {
                    Direction::Entering
                } else {
                    Direction::Exiting
                };
                info!(
                    "T{} crossed '{}' toward {} → {} (frame {})",
                    track.id,
                    line.name,
                    crossing.toward.as_str(),
                    direction.as_str(),
                    crossing.at.seq
                );
                decisions.push(CrossingDecision {
                    track_id: track.id,
                    line: idx,
                    line_name: line.name.clone(),
                    direction,
                    timestamp_ms: crossing.at.timestamp_ms,
                    frame_seq: crossing.at.seq,
                });
            }

            track.set_evaluated_through(newest);
        }

        decisions.sort_by(|a, b| a.track_id.cmp(&b.track_id).then(a.line.cmp(&b.line)));
        decisions
    }
}

/// First crossing of `line` among the history points not yet evaluated,
/// starting from the anchor kept on the track. Also returns the anchor to
/// keep for the next evaluation.
fn first_crossing(
    track: &Track,
    idx: usize,
    line: &BoundaryLine,
) -> (Option<Crossing>, Option<(Point, Side)>) {
    let cursor = track.evaluated_through();
    // Last point strictly off the line: the start of the next segment.
    let mut anchor = track.line_anchor(idx);

    let unevaluated = track
        .history
        .iter()
        .filter(|p| cursor.map_or(true, |c| p.seq > c));
    for point in unevaluated {
        let Some(end_side) = line.side_of(&point.position) else {
            debug!("T{} on line '{}' at frame {}", track.id, line.name, point.seq);
            continue;
        };
        if let Some((start, start_side)) = anchor {
            if start_side != end_side && within_segment(line, &start, &point.position) {
                let crossing = Crossing {
                    toward: end_side,
                    at: *point,
                };
                return (Some(crossing), Some((point.position, end_side)));
            }
        }
        anchor = Some((point.position, end_side));
    }
    (None, anchor)
}

/// Whether the segment `from → to`, whose endpoints lie strictly on opposite
/// sides of the infinite line, meets it within the line's endpoints.
fn within_segment(line: &BoundaryLine, from: &Point, to: &Point) -> bool {
    let s_from = line.side_value(from) as f64;
    let s_to = line.side_value(to) as f64;
    let t = s_from / (s_from - s_to);
    let hit_x = from.x as f64 + t * (to.x - from.x) as f64;
    let hit_y = from.y as f64 + t * (to.y - from.y) as f64;

    let d = line.direction();
    let (dx, dy) = (d.x as f64, d.y as f64);
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return false;
    }
    let u = ((hit_x - line.start.x as f64) * dx + (hit_y - line.start.y as f64) * dy) / len_sq;
    (0.0..=1.0).contains(&u)
}
