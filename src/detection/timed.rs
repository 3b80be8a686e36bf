// src/detection/timed.rs
//
// Bounded-latency wrapper. The wrapped engine runs on its own thread so a
// hung accelerator can never stall the processing loop for longer than
// `timeout`. Late answers to earlier requests are discarded by sequence.
//
// One call that misses its deadline is a `Timeout`. A call made while the
// worker is still stuck on an earlier timed-out request is `Unavailable`:
// the engine is not responding, not merely slow on one frame.

use super::engine::{DetectorEngine, EngineError, InferenceRequest, RawDetection};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

type Reply = (u64, Result<Vec<RawDetection>, EngineError>);

pub struct TimedEngine {
    name: String,
    timeout: Duration,
    tx_request: Option<Sender<InferenceRequest>>,
    rx_reply: Receiver<Reply>,
    worker: Option<JoinHandle<()>>,
    /// Request handed to the worker whose reply has not come back yet.
    in_flight: Option<u64>,
}

impl TimedEngine {
    pub fn spawn<E: DetectorEngine + 'static>(mut engine: E, timeout: Duration) -> Self {
        let name = format!("timed({})", engine.name());
        let (tx_request, rx_request) = bounded::<InferenceRequest>(1);
        let (tx_reply, rx_reply) = bounded::<Reply>(1);

        let worker = thread::spawn(move || {
            info!("Inference worker started ({})", engine.name());
            while let Ok(request) = rx_request.recv() {
                let result = engine.infer(&request);
                if tx_reply.send((request.seq, result)).is_err() {
                    break;
                }
            }
            info!("Inference worker exited");
        });

        Self {
            name,
            timeout,
            tx_request: Some(tx_request),
            rx_reply,
            worker: Some(worker),
            in_flight: None,
        }
    }

    /// Whether a timed-out request is still occupying the worker.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn drain_stale(&mut self) {
        while let Ok((seq, _)) = self.rx_reply.try_recv() {
            debug!("Discarding late inference result for frame {}", seq);
            self.in_flight = None;
        }
    }
}

impl DetectorEngine for TimedEngine {
    fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
        self.drain_stale();
        if let Some(stuck) = self.in_flight {
            return Err(EngineError::Unavailable(format!(
                "inference worker still busy with frame {} after {:?}",
                stuck, self.timeout
            )));
        }

        let tx = self
            .tx_request
            .as_ref()
            .ok_or_else(|| EngineError::Unavailable("inference worker stopped".to_string()))?;

        match tx.try_send(request.clone()) {
            Ok(()) => self.in_flight = Some(request.seq),
            Err(TrySendError::Full(queued)) => {
                return Err(EngineError::Unavailable(format!(
                    "inference worker queue full at frame {}",
                    queued.seq
                )))
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(EngineError::Unavailable(
                    "inference worker exited".to_string(),
                ))
            }
        }

        loop {
            match self.rx_reply.recv_timeout(self.timeout) {
                Ok((seq, result)) if seq == request.seq => {
                    self.in_flight = None;
                    return result;
                }
                Ok((seq, _)) => {
                    debug!("Discarding late inference result for frame {}", seq);
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "Inference for frame {} exceeded {:?}",
                        request.seq, self.timeout
                    );
                    return Err(EngineError::Timeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = None;
                    return Err(EngineError::Unavailable(
                        "inference worker exited".to_string(),
                    ))
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TimedEngine {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.tx_request.take();
        self.drain_stale();
        if let Some(worker) = self.worker.take() {
            // A worker stuck inside the engine is left detached.
            if worker.is_finished() {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::Arc;

    struct SlowEngine {
        delay: Duration,
    }

    impl DetectorEngine for SlowEngine {
        fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
            thread::sleep(self.delay);
            Ok(vec![RawDetection {
                bbox: [0.0, 0.0, 1.0, 1.0],
                score: 0.9,
                class_id: request.seq as u32,
            }])
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct DeadEngine;

    impl DetectorEngine for DeadEngine {
        fn infer(&mut self, _request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
            panic!("accelerator fault");
        }

        fn name(&self) -> &str {
            "dead"
        }
    }

    fn request(seq: u64) -> InferenceRequest {
        InferenceRequest {
            seq,
            timestamp_ms: 0.0,
            image: Arc::new(RgbImage::new(2, 2)),
        }
    }

    #[test]
    fn test_fast_engine_passes_through() {
        let mut engine = TimedEngine::spawn(
            SlowEngine {
                delay: Duration::from_millis(1),
            },
            Duration::from_millis(500),
        );
        let out = engine.infer(&request(7)).unwrap();
        assert_eq!(out[0].class_id, 7);
        assert_eq!(engine.name(), "timed(slow)");
    }

    #[test]
    fn test_slow_engine_times_out_and_late_reply_is_discarded() {
        let mut engine = TimedEngine::spawn(
            SlowEngine {
                delay: Duration::from_millis(150),
            },
            Duration::from_millis(20),
        );
        assert!(matches!(
            engine.infer(&request(1)),
            Err(EngineError::Timeout(_))
        ));

        // Wait for the worker to finish frame 1, then frame 2 must get its own answer.
        thread::sleep(Duration::from_millis(250));
        let mut patient = engine;
        patient.timeout = Duration::from_millis(500);
        let out = patient.infer(&request(2)).unwrap();
        assert_eq!(out[0].class_id, 2);
    }

    #[test]
    fn test_stuck_worker_becomes_unavailable() {
        let mut engine = TimedEngine::spawn(
            SlowEngine {
                delay: Duration::from_millis(300),
            },
            Duration::from_millis(10),
        );
        assert!(matches!(
            engine.infer(&request(1)),
            Err(EngineError::Timeout(_))
        ));
        assert!(engine.is_busy());
        assert!(matches!(
            engine.infer(&request(2)),
            Err(EngineError::Unavailable(_))
        ));

        // Once the stuck call returns the engine serves requests again.
        thread::sleep(Duration::from_millis(400));
        engine.timeout = Duration::from_millis(500);
        let out = engine.infer(&request(3)).unwrap();
        assert_eq!(out[0].class_id, 3);
        assert!(!engine.is_busy());
    }

    #[test]
    fn test_dead_worker_is_unavailable() {
        let mut engine = TimedEngine::spawn(DeadEngine, Duration::from_millis(200));
        let first = engine.infer(&request(1));
        assert!(matches!(first, Err(EngineError::Unavailable(_))));
        let second = engine.infer(&request(2));
        assert!(matches!(second, Err(EngineError::Unavailable(_))));
    }
}
