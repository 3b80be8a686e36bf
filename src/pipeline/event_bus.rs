// src/pipeline/event_bus.rs
//
// Per-cycle event queue plus the reporting hub external consumers read
// from. Consumers query snapshots and subscribe to crossings; they never
// touch Count State directly.

use crate::counting::CountSnapshot;
use crate::error::TrackingInvariantViolation;
use crate::types::CrossingDecision;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Crossing(CrossingDecision),

    InvariantViolation {
        frame_seq: u64,
        violation: TrackingInvariantViolation,
    },

    DetectorDegraded {
        frame_seq: u64,
        reason: String,
    },

    DetectorRecovered {
        frame_seq: u64,
        unavailable_frames: u32,
    },
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

// ============================================================================
// REPORTING INTERFACE
// ============================================================================

struct ReportInner {
    snapshot: RwLock<CountSnapshot>,
    subscribers: Mutex<Vec<Sender<CrossingDecision>>>,
    capacity: usize,
}

/// Shared, read-mostly view of the counts. Clone freely across threads.
#[derive(Clone)]
pub struct ReportHandle {
    inner: Arc<ReportInner>,
}

impl ReportHandle {
    pub fn new(subscriber_capacity: usize) -> Self {
        Self {
            inner: Arc::new(ReportInner {
                snapshot: RwLock::new(CountSnapshot::default()),
                subscribers: Mutex::new(Vec::new()),
                capacity: subscriber_capacity.max(1),
            }),
        }
    }

    /// Latest published snapshot, copied under a single read lock.
    pub fn snapshot(&self) -> CountSnapshot {
        match self.inner.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Crossings published from now on. A subscriber that falls behind by
    /// more than the configured capacity loses events.
    pub fn subscribe(&self) -> Receiver<CrossingDecision> {
        let (tx, rx) = bounded(self.inner.capacity);
        self.lock_subscribers().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    pub fn publish_snapshot(&self, snapshot: CountSnapshot) {
        match self.inner.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn publish_decision(&self, decision: &CrossingDecision) {
        let mut subscribers = self.lock_subscribers();
        let before = subscribers.len();
        subscribers.retain(|tx| match tx.try_send(decision.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Subscriber queue full, dropping crossing of T{}",
                    decision.track_id
                );
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        let pruned = before - subscribers.len();
        if pruned > 0 {
            info!("Removed {} disconnected subscriber(s)", pruned);
        }
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<CrossingDecision>>> {
        match self.inner.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use std::thread;

    fn decision(track_id: u32) -> CrossingDecision {
        CrossingDecision {
            track_id,
            line: 0,
            line_name: "door".to_string(),
            direction: Direction::Entering,
            timestamp_ms: track_id as f64,
            frame_seq: track_id as u64,
        }
    }

    #[test]
    fn test_bus_drops_oldest_when_full() {
        let mut bus = EventBus::new(2);
        for id in 1..=3 {
            bus.publish(PipelineEvent::Crossing(decision(id)));
        }
        assert_eq!(bus.pending_count(), 2);
        let drained = bus.drain();
        assert!(matches!(&drained[0], PipelineEvent::Crossing(d) if d.track_id == 2));
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_snapshot_visible_across_threads() {
        let handle = ReportHandle::new(4);
        let reader = handle.clone();
        handle.publish_snapshot(CountSnapshot {
            entries: 3,
            exits: 1,
            net: 2,
            occupancy: 2,
            ..CountSnapshot::default()
        });
        let snap = thread::spawn(move || reader.snapshot()).join().unwrap();
        assert_eq!(snap.entries, 3);
        assert_eq!(snap.net, snap.entries as i64 - snap.exits as i64);
    }

    #[test]
    fn test_subscribers_receive_and_overflow() {
        let handle = ReportHandle::new(2);
        let rx = handle.subscribe();
        for id in 1..=3 {
            handle.publish_decision(&decision(id));
        }
        let got: Vec<u32> = rx.try_iter().map(|d| d.track_id).collect();
        assert_eq!(got, vec![1, 2]);
        assert_eq!(handle.subscriber_count(), 1);
    }

    #[test]
    fn test_disconnected_subscribers_pruned() {
        let handle = ReportHandle::new(2);
        let keep = handle.subscribe();
        drop(handle.subscribe());
        assert_eq!(handle.subscriber_count(), 2);
        handle.publish_decision(&decision(1));
        assert_eq!(handle.subscriber_count(), 1);
        assert_eq!(keep.recv().unwrap().track_id, 1);
    }
}
