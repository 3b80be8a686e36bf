// src/pipeline/frame_buffer.rs
//
// Bounded hand-off between capture and processing. Freshness wins over
// completeness: a full buffer evicts its oldest frame instead of blocking
// the capture side.

use crate::source::{FrameSource, SourcePoll};
use crate::types::Frame;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum BufferPoll {
    Frame(Frame),
    /// Nothing arrived within the timeout.
    Empty,
    /// The producer finished and everything has been consumed.
    Closed,
}

#[derive(Clone)]
pub struct FrameBuffer {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameBuffer {
    pub fn new(depth: usize) -> Self {
        let (tx, rx) = bounded(depth.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Never blocks. Returns how many queued frames were evicted to make room.
    pub fn push(&self, frame: Frame) -> u64 {
        let mut frame = frame;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    frame = back;
                    if let Ok(old) = self.rx.try_recv() {
                        debug!("Frame buffer full, dropping frame {}", old.seq);
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        evicted += 1;
                    }
                }
                // Both ends live in `self`, so this cannot happen.
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    pub fn pop(&self, timeout: Duration) -> BufferPoll {
        if let Ok(frame) = self.rx.try_recv() {
            return BufferPoll::Frame(frame);
        }
        if self.is_closed() {
            return self.drain_after_close();
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => BufferPoll::Frame(frame),
            Err(RecvTimeoutError::Timeout) if self.is_closed() => self.drain_after_close(),
            Err(RecvTimeoutError::Timeout) => BufferPoll::Empty,
            Err(RecvTimeoutError::Disconnected) => BufferPoll::Closed,
        }
    }

    // A push racing with close is visible once `closed` has been observed.
    fn drain_after_close(&self) -> BufferPoll {
        match self.rx.try_recv() {
            Ok(frame) => BufferPoll::Frame(frame),
            Err(_) => BufferPoll::Closed,
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

// ============================================================================
// CAPTURE WORKER
// ============================================================================

/// Pulls from a source on its own thread and numbers the frames.
pub struct CaptureWorker {
    buffer: FrameBuffer,
    stop: Arc<AtomicBool>,
    join: JoinHandle<u64>,
}

impl CaptureWorker {
    pub fn spawn<S: FrameSource + 'static>(
        mut source: S,
        buffer: FrameBuffer,
        stop: Arc<AtomicBool>,
        retry: Duration,
    ) -> Self {
        let thread_buffer = buffer.clone();
        let thread_stop = Arc::clone(&stop);

        let join = thread::spawn(move || {
            info!("Capture started ({})", source.name());
            let mut seq = 1u64;
            let mut captured = 0u64;
            while !thread_stop.load(Ordering::Relaxed) {
                match source.pull() {
                    SourcePoll::Frame(frame) => {
                        thread_buffer.push(Frame {
                            seq,
                            timestamp_ms: frame.timestamp_ms,
                            image: frame.image,
                        });
                        seq += 1;
                        captured += 1;
                    }
                    SourcePoll::Unavailable(reason) => {
                        warn!("Frame source unavailable: {} (retry in {:?})", reason, retry);
                        thread::sleep(retry);
                    }
                    SourcePoll::EndOfStream => {
                        info!("Frame source reached end of stream");
                        break;
                    }
                }
            }
            thread_buffer.close();
            info!(
                "Capture stopped after {} frame(s), {} dropped",
                captured,
                thread_buffer.dropped()
            );
            captured
        });

        Self { buffer, stop, join }
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn pop(&self, timeout: Duration) -> BufferPoll {
        self.buffer.pop(timeout)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Signal the thread and wait for it. Returns the number of frames captured.
    pub fn stop(self) -> Result<u64> {
        self.stop.store(true, Ordering::Relaxed);
        self.join
            .join()
            .map_err(|_| anyhow!("Capture thread panicked"))
    }
}
