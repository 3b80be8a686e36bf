// src/analysis/person_tracker.rs
//
// Nearest-centroid multi-object tracker for people seen by a fixed camera.
//
// Design:
//   - Constant-velocity prediction per track (velocity per frame sequence
//     step, so dropped frames do not skew the extrapolation)
//   - Greedy global nearest-pair association, ties broken by track id and
//     then detection index
//   - Tentative → Confirmed after K consecutive hits; retired tracks are
//     parked until the crossing evaluator has seen them one last time

use crate::config::TrackerConfig;
use crate::types::{Detection, Point, Side, TrackId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Retired,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tentative => "TENTATIVE",
            Self::Confirmed => "CONFIRMED",
            Self::Retired => "RETIRED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryPoint {
    pub position: Point,
    pub timestamp_ms: f64,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackEventKind {
    Created,
    Confirmed,
    Updated,
    Retired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEvent {
    pub track_id: TrackId,
    pub kind: TrackEventKind,
}

impl TrackEvent {
    fn new(track_id: TrackId, kind: TrackEventKind) -> Self {
        Self { track_id, kind }
    }
}

/// Why a track left the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetireReason {
    Missed(u32),
    Unseen,
    TentativeTooLong(u32),
}

/// A single tracked person.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub state: TrackState,
    pub history: VecDeque<HistoryPoint>,
    /// Expected position on the most recent frame.
    pub predicted: Point,
    pub last_seen_ms: f64,
    pub last_seen_seq: u64,
    pub consecutive_hits: u32,
    pub misses: u32,
    pub age: u32,
    pub last_confidence: f32,
    /// Frame on which the track was promoted, if ever.
    pub confirmed_seq: Option<u64>,
    velocity: Point,
    history_length: usize,
    crossed_lines: BTreeSet<usize>,
    evaluated_through: Option<u64>,
    /// Per line: last evaluated position strictly off it, with its side.
    line_anchors: BTreeMap<usize, (Point, Side)>,
}

impl Track {
    fn new(
        id: TrackId,
        position: Point,
        confidence: f32,
        timestamp_ms: f64,
        seq: u64,
        history_length: usize,
    ) -> Self {
        let mut history = VecDeque::with_capacity(history_length);
        history.push_back(HistoryPoint {
            position,
            timestamp_ms,
            seq,
        });
        Self {
            id,
            state: TrackState::Tentative,
            history,
            predicted: position,
            last_seen_ms: timestamp_ms,
            last_seen_seq: seq,
            consecutive_hits: 1,
            misses: 0,
            age: 1,
            last_confidence: confidence,
            confirmed_seq: None,
            velocity: Point::default(),
            history_length,
            crossed_lines: BTreeSet::new(),
            evaluated_through: None,
            line_anchors: BTreeMap::new(),
        }
    }

    /// Last observed (possibly smoothed) position.
    pub fn position(&self) -> Point {
        self.history
            .back()
            .map(|h| h.position)
            .unwrap_or(self.predicted)
    }

    /// Pixels per frame-sequence step.
    pub fn velocity(&self) -> Point {
        self.velocity
    }

    /// Whether the track ever reached Confirmed (true for a retired, once-confirmed track).
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_seq.is_some()
    }

    pub fn has_crossed(&self, line: usize) -> bool {
        self.crossed_lines.contains(&line)
    }

    /// Returns false if the flag was already set.
    pub fn mark_crossed(&mut self, line: usize) -> bool {
        self.crossed_lines.insert(line)
    }

    pub fn crossed_lines(&self) -> impl Iterator<Item = usize> + '_ {
        self.crossed_lines.iter().copied()
    }

    /// Sequence of the newest history point already checked for crossings.
    pub fn evaluated_through(&self) -> Option<u64> {
        self.evaluated_through
    }

    pub fn set_evaluated_through(&mut self, seq: u64) {
        self.evaluated_through = Some(seq);
    }

    /// Start of the next movement segment for `line`. Survives history eviction.
    pub fn line_anchor(&self, line: usize) -> Option<(Point, Side)> {
        self.line_anchors.get(&line).copied()
    }

    pub fn set_line_anchor(&mut self, line: usize, position: Point, side: Side) {
        self.line_anchors.insert(line, (position, side));
    }

    fn predict(&self, seq: u64) -> Point {
        let steps = seq.saturating_sub(self.last_seen_seq) as f32;
        let last = self.position();
        Point::new(
            last.x + self.velocity.x * steps,
            last.y + self.velocity.y * steps,
        )
    }

    fn update_with_detection(
        &mut self,
        anchor: Point,
        confidence: f32,
        smoothing_alpha: f32,
        timestamp_ms: f64,
        seq: u64,
    ) {
        let prev = self.position();
        let position = if smoothing_alpha > 0.0 {
            Point::new(
                smoothing_alpha * prev.x + (1.0 - smoothing_alpha) * anchor.x,
                smoothing_alpha * prev.y + (1.0 - smoothing_alpha) * anchor.y,
            )
        } else {
            anchor
        };

        let steps = seq.saturating_sub(self.last_seen_seq).max(1) as f32;
        self.velocity = Point::new((position.x - prev.x) / steps, (position.y - prev.y) / steps);

        if self.history.len() >= self.history_length {
            self.history.pop_front();
        }
        self.history.push_back(HistoryPoint {
            position,
            timestamp_ms,
            seq,
        });

        self.predicted = position;
        self.last_seen_ms = timestamp_ms;
        self.last_seen_seq = seq;
        self.last_confidence = confidence;
        self.consecutive_hits += 1;
        self.misses = 0;
        self.age += 1;
    }

    fn mark_missed(&mut self) {
        self.misses += 1;
        self.consecutive_hits = 0;
        self.age += 1;
    }
}

// ============================================================================
// MAIN TRACKER
// ============================================================================

pub struct PersonTracker {
    pub config: TrackerConfig,
    tracks: BTreeMap<TrackId, Track>,
    retiring: Vec<Track>,
    next_id: TrackId,
}

impl PersonTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            retiring: Vec::new(),
            next_id: 1,
        }
    }

    /// Process one frame of detections. Events are grouped per phase
    /// (existing tracks, new tracks, retirements), each in track-id order.
    pub fn update(
        &mut self,
        detections: &[Detection],
        timestamp_ms: f64,
        seq: u64,
    ) -> Vec<TrackEvent> {
        let mut events = Vec::new();
        let anchor = self.config.anchor;
        let anchors: Vec<Point> = detections.iter().map(|d| d.anchor(anchor)).collect();

        // ====================================================================
        // PREDICTION + GREEDY ASSOCIATION
        // ====================================================================
        let max_dist = self.config.max_association_distance;
        let mut pairs: Vec<(f32, TrackId, usize)> = Vec::new();
        for (id, track) in self.tracks.iter_mut() {
            track.predicted = track.predict(seq);
            for (di, point) in anchors.iter().enumerate() {
                let dist = track.predicted.distance(point);
                if dist <= max_dist {
                    pairs.push((dist, *id, di));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut matched: BTreeMap<TrackId, usize> = BTreeMap::new();
        let mut det_taken = vec![false; detections.len()];
        for (_, id, di) in &pairs {
            if matched.contains_key(id) || det_taken[*di] {
                continue;
            }
            matched.insert(*id, *di);
            det_taken[*di] = true;
        }

        // ====================================================================
        // MATCHED TRACKS → UPDATE, UNMATCHED → MISS
        // ====================================================================
        let confirm_hits = self.config.confirm_hits;
        let alpha = self.config.smoothing_alpha;
        for (id, track) in self.tracks.iter_mut() {
            match matched.get(id) {
                Some(&di) => {
                    track.update_with_detection(
                        anchors[di],
                        detections[di].confidence,
                        alpha,
                        timestamp_ms,
                        seq,
                    );
                    if track.state == TrackState::Tentative && track.consecutive_hits >= confirm_hits
                    {
                        promote(track, seq);
                        events.push(TrackEvent::new(*id, TrackEventKind::Confirmed));
                    } else {
                        events.push(TrackEvent::new(*id, TrackEventKind::Updated));
                    }
                }
                None => track.mark_missed(),
            }
        }

        // ====================================================================
        // UNMATCHED DETECTIONS → NEW TRACKS
        // ====================================================================
        for (di, det) in detections.iter().enumerate() {
            if det_taken[di] {
                continue;
            }
            if let Some(min) = self.config.spawn_confidence {
                if det.confidence < min {
                    continue;
                }
            }

            let id = self.next_id;
            self.next_id += 1;
            let mut track = Track::new(
                id,
                anchors[di],
                det.confidence,
                timestamp_ms,
                seq,
                self.config.history_length,
            );
            debug!(
                "New track T{} at ({:.0}, {:.0}) conf={:.2}",
                id, anchors[di].x, anchors[di].y, det.confidence
            );
            events.push(TrackEvent::new(id, TrackEventKind::Created));
            if confirm_hits <= 1 {
                promote(&mut track, seq);
                events.push(TrackEvent::new(id, TrackEventKind::Confirmed));
            }
            self.tracks.insert(id, track);
        }

        // ====================================================================
        // RETIREMENT
        // ====================================================================
        let retire: Vec<(TrackId, RetireReason)> = self
            .tracks
            .values()
            .filter_map(|t| self.retire_reason(t, timestamp_ms).map(|r| (t.id, r)))
            .collect();
        for (id, reason) in retire {
            if let Some(mut track) = self.tracks.remove(&id) {
                match reason {
                    RetireReason::Missed(n) => {
                        debug!("Track T{} retired (missed {} frames)", id, n)
                    }
                    RetireReason::Unseen => debug!(
                        "Track T{} retired (unseen {:.0}ms)",
                        id,
                        timestamp_ms - track.last_seen_ms
                    ),
                    RetireReason::TentativeTooLong(age) => {
                        debug!("Track T{} retired (tentative too long: age={})", id, age)
                    }
                }
                track.state = TrackState::Retired;
                events.push(TrackEvent::new(id, TrackEventKind::Retired));
                self.retiring.push(track);
            }
        }

        events
    }

    fn retire_reason(&self, track: &Track, timestamp_ms: f64) -> Option<RetireReason> {
        if track.misses > self.config.max_missed_frames {
            return Some(RetireReason::Missed(track.misses));
        }
        if let Some(max_unseen) = self.config.max_unseen_ms {
            if timestamp_ms - track.last_seen_ms > max_unseen {
                return Some(RetireReason::Unseen);
            }
        }
        if track.state == TrackState::Tentative && track.age > self.config.max_tentative_age {
            return Some(RetireReason::TentativeTooLong(track.age));
        }
        None
    }

    /// Live tracks in id order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks
            .values()
            .filter(|t| t.state == TrackState::Confirmed)
    }

    /// Live tracks plus those retired this frame and not yet drained.
    pub fn tracks_for_evaluation(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut().chain(self.retiring.iter_mut())
    }

    pub fn get_track(&self, id: TrackId) -> Option<&Track> {
        self.tracks
            .get(&id)
            .or_else(|| self.retiring.iter().find(|t| t.id == id))
    }

    pub fn get_track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        match self.tracks.get_mut(&id) {
            Some(track) => Some(track),
            None => self.retiring.iter_mut().find(|t| t.id == id),
        }
    }

    /// Discard retired tracks once they have been evaluated.
    pub fn take_retired(&mut self) -> Vec<Track> {
        std::mem::take(&mut self.retiring)
    }

    pub fn live_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.confirmed_tracks().count()
    }

    /// Drop all tracks. Ids keep increasing so they are never reused.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.retiring.clear();
    }
}

fn promote(track: &mut Track, seq: u64) {
    track.state = TrackState::Confirmed;
    track.confirmed_seq = Some(seq);
    debug!(
        "Track T{} confirmed after {} hits",
        track.id, track.consecutive_hits
    );
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnchorPoint;

    /// 20x40 box centred on (cx, cy).
    fn det(cx: f32, cy: f32) -> Detection {
        Detection::new(cx - 10.0, cy - 20.0, 20.0, 40.0, 0.9)
    }

    fn det_conf(cx: f32, cy: f32, confidence: f32) -> Detection {
        Detection::new(cx - 10.0, cy - 20.0, 20.0, 40.0, confidence)
    }

    fn tracker() -> PersonTracker {
        PersonTracker::new(TrackerConfig::default())
    }

    fn kinds(events: &[TrackEvent]) -> Vec<TrackEventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_track_creation_and_confirmation() {
        let mut t = tracker();
        let events = t.update(&[det(100.0, 100.0)], 0.0, 1);
        assert_eq!(events, vec![TrackEvent::new(1, TrackEventKind::Created)]);
        assert_eq!(t.get_track(1).unwrap().state, TrackState::Tentative);

        let events = t.update(&[det(105.0, 100.0)], 66.0, 2);
        assert_eq!(kinds(&events), vec![TrackEventKind::Updated]);

        let events = t.update(&[det(110.0, 100.0)], 132.0, 3);
        assert_eq!(kinds(&events), vec![TrackEventKind::Confirmed]);
        let track = t.get_track(1).unwrap();
        assert_eq!(track.state, TrackState::Confirmed);
        assert_eq!(track.confirmed_seq, Some(3));
        assert_eq!(track.history.len(), 3);

        let events = t.update(&[det(115.0, 100.0)], 198.0, 4);
        assert_eq!(kinds(&events), vec![TrackEventKind::Updated]);
    }

    #[test]
    fn test_miss_resets_consecutive_hits() {
        let mut t = tracker();
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        t.update(&[det(100.0, 100.0)], 1.0, 2);
        t.update(&[], 2.0, 3);
        t.update(&[det(100.0, 100.0)], 3.0, 4);
        assert_eq!(t.get_track(1).unwrap().state, TrackState::Tentative);
        t.update(&[det(100.0, 100.0)], 4.0, 5);
        assert_eq!(t.get_track(1).unwrap().state, TrackState::Tentative);
        t.update(&[det(100.0, 100.0)], 5.0, 6);
        assert_eq!(t.get_track(1).unwrap().state, TrackState::Confirmed);
    }

    #[test]
    fn test_prediction_bridges_gap() {
        let mut t = tracker();
        for i in 0..4u64 {
            t.update(&[det(100.0 + 30.0 * i as f32, 200.0)], i as f64, i);
        }
        // Two missed frames, then the person reappears 90px further along.
        t.update(&[], 4.0, 4);
        t.update(&[], 5.0, 5);
        let events = t.update(&[det(280.0, 200.0)], 6.0, 6);
        assert_eq!(events, vec![TrackEvent::new(1, TrackEventKind::Updated)]);
        let track = t.get_track(1).unwrap();
        assert_eq!(track.misses, 0);
        assert_eq!(track.velocity(), Point::new(30.0, 0.0));
    }

    #[test]
    fn test_dropped_frames_scale_velocity_by_seq() {
        let mut t = tracker();
        t.update(&[det(100.0, 100.0)], 0.0, 10);
        t.update(&[det(140.0, 100.0)], 0.0, 14);
        assert_eq!(t.get_track(1).unwrap().velocity(), Point::new(10.0, 0.0));
    }

    #[test]
    fn test_association_bound_is_inclusive() {
        let mut cfg = TrackerConfig::default();
        cfg.max_association_distance = 50.0;
        let mut t = PersonTracker::new(cfg);
        t.update(&[det(100.0, 100.0)], 0.0, 1);

        t.update(&[det(150.0, 100.0)], 1.0, 2);
        assert_eq!(t.live_count(), 1);

        // Track now predicts (200, 100); 250.5 is just beyond reach.
        let events = t.update(&[det(250.5, 100.0)], 2.0, 3);
        assert_eq!(t.live_count(), 2);
        assert!(events.contains(&TrackEvent::new(2, TrackEventKind::Created)));
        assert_eq!(t.get_track(1).unwrap().misses, 1);
    }

    #[test]
    fn test_greedy_picks_globally_closest_pair() {
        let mut t = tracker();
        t.update(&[det(100.0, 100.0), det(200.0, 100.0)], 0.0, 1);
        // Detection at 160 is closer to track 2 (40px) than to track 1 (60px).
        t.update(&[det(160.0, 100.0)], 1.0, 2);
        assert_eq!(t.get_track(2).unwrap().position(), Point::new(160.0, 100.0));
        assert_eq!(t.get_track(1).unwrap().misses, 1);
    }

    #[test]
    fn test_equal_distance_tie_goes_to_lowest_track_id() {
        let mut t = tracker();
        t.update(&[det(100.0, 100.0), det(200.0, 100.0)], 0.0, 1);
        t.update(&[det(150.0, 100.0)], 1.0, 2);
        assert_eq!(t.get_track(1).unwrap().position(), Point::new(150.0, 100.0));
        assert_eq!(t.get_track(2).unwrap().misses, 1);
    }

    #[test]
    fn test_retirement_after_max_missed() {
        let mut cfg = TrackerConfig::default();
        cfg.max_missed_frames = 2;
        let mut t = PersonTracker::new(cfg);
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        t.update(&[], 1.0, 2);
        t.update(&[], 2.0, 3);
        assert_eq!(t.live_count(), 1);
        let events = t.update(&[], 3.0, 4);
        assert_eq!(events, vec![TrackEvent::new(1, TrackEventKind::Retired)]);
        assert_eq!(t.live_count(), 0);

        // Still visible to the evaluator until drained.
        assert_eq!(t.get_track(1).unwrap().state, TrackState::Retired);
        assert_eq!(t.tracks_for_evaluation().count(), 1);
        let retired = t.take_retired();
        assert_eq!(retired.len(), 1);
        assert!(t.get_track(1).is_none());
    }

    #[test]
    fn test_retirement_by_unseen_time() {
        let mut cfg = TrackerConfig::default();
        cfg.max_unseen_ms = Some(500.0);
        let mut t = PersonTracker::new(cfg);
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        t.update(&[], 400.0, 2);
        assert_eq!(t.live_count(), 1);
        t.update(&[], 600.0, 3);
        assert_eq!(t.live_count(), 0);
    }

    #[test]
    fn test_tentative_age_cap() {
        let mut cfg = TrackerConfig::default();
        cfg.max_tentative_age = 4;
        cfg.max_missed_frames = 100;
        let mut t = PersonTracker::new(cfg);
        // Hit, miss, hit, miss: never three in a row.
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        t.update(&[], 1.0, 2);
        t.update(&[det(100.0, 100.0)], 2.0, 3);
        t.update(&[], 3.0, 4);
        assert_eq!(t.live_count(), 1);
        let events = t.update(&[], 4.0, 5);
        assert_eq!(events, vec![TrackEvent::new(1, TrackEventKind::Retired)]);
    }

    #[test]
    fn test_spawn_confidence_gates_new_tracks_only() {
        let mut cfg = TrackerConfig::default();
        cfg.spawn_confidence = Some(0.6);
        let mut t = PersonTracker::new(cfg);
        t.update(&[det_conf(100.0, 100.0, 0.55)], 0.0, 1);
        assert_eq!(t.live_count(), 0);

        t.update(&[det_conf(100.0, 100.0, 0.8)], 1.0, 2);
        t.update(&[det_conf(102.0, 100.0, 0.55)], 2.0, 3);
        assert_eq!(t.live_count(), 1);
        assert_eq!(t.get_track(1).unwrap().consecutive_hits, 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut cfg = TrackerConfig::default();
        cfg.history_length = 4;
        let mut t = PersonTracker::new(cfg);
        for i in 0..10u64 {
            t.update(&[det(100.0 + i as f32, 100.0)], i as f64, i);
        }
        let track = t.get_track(1).unwrap();
        assert_eq!(track.history.len(), 4);
        assert_eq!(track.history.front().unwrap().seq, 6);
    }

    #[test]
    fn test_bottom_center_anchor_and_smoothing() {
        let mut cfg = TrackerConfig::default();
        cfg.anchor = AnchorPoint::BottomCenter;
        cfg.smoothing_alpha = 0.5;
        let mut t = PersonTracker::new(cfg);
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        assert_eq!(t.get_track(1).unwrap().position(), Point::new(100.0, 120.0));
        t.update(&[det(110.0, 100.0)], 1.0, 2);
        assert_eq!(t.get_track(1).unwrap().position(), Point::new(105.0, 120.0));
    }

    #[test]
    fn test_confirm_hits_one_confirms_on_creation() {
        let mut cfg = TrackerConfig::default();
        cfg.confirm_hits = 1;
        let mut t = PersonTracker::new(cfg);
        let events = t.update(&[det(100.0, 100.0)], 0.0, 1);
        assert_eq!(
            kinds(&events),
            vec![TrackEventKind::Created, TrackEventKind::Confirmed]
        );
    }

    #[test]
    fn test_reset_never_reuses_ids() {
        let mut t = tracker();
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        t.reset();
        assert_eq!(t.live_count(), 0);
        t.update(&[det(100.0, 100.0)], 1.0, 2);
        assert!(t.get_track(2).is_some());
        assert!(t.get_track(1).is_none());
    }

    #[test]
    fn test_crossed_flags() {
        let mut t = tracker();
        t.update(&[det(100.0, 100.0)], 0.0, 1);
        let track = t.get_track_mut(1).unwrap();
        assert!(track.mark_crossed(0));
        assert!(!track.mark_crossed(0));
        assert!(track.has_crossed(0));
        assert!(!track.has_crossed(1));
    }
}
