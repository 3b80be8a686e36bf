// src/detection/adapter.rs
//
// Detector adapter: frame → validated person detections.
//
// Everything the engine returns is checked here so the tracker never sees
// NaN coordinates, inverted boxes or out-of-range scores.

use super::engine::{DetectorEngine, EngineError, InferenceRequest, RawDetection};
use crate::error::{DetectorError, FrameDecodeError};
use crate::types::{Detection, Frame, ImagePayload};
use image::RgbImage;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub confidence_threshold: f32,
    pub person_class_id: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            person_class_id: 0,
        }
    }
}

pub struct PersonDetector<E: DetectorEngine> {
    engine: E,
    config: AdapterConfig,
    malformed_dropped: u64,
}

impl<E: DetectorEngine> PersonDetector<E> {
    pub fn new(engine: E, config: AdapterConfig) -> Self {
        Self {
            engine,
            config,
            malformed_dropped: 0,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Raw detections rejected as malformed since start.
    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped
    }

    /// Persons in `frame` with confidence ≥ threshold, most confident first.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let image = decode_frame(&frame.image)?;
        let request = InferenceRequest {
            seq: frame.seq,
            timestamp_ms: frame.timestamp_ms,
            image: Arc::new(image),
        };

        let raw = self.engine.infer(&request).map_err(|e| match e {
            EngineError::Unavailable(reason) => DetectorError::Unavailable(reason),
            EngineError::Timeout(after) => DetectorError::Timeout(after),
            EngineError::Failed(reason) => DetectorError::Inference(reason),
        })?;

        let total = raw.len();
        let mut detections = Vec::with_capacity(total);
        for det in &raw {
            if !is_well_formed(det) {
                self.malformed_dropped += 1;
                debug!("Dropping malformed detection on frame {}: {:?}", frame.seq, det);
                continue;
            }
            if det.class_id != self.config.person_class_id
                || det.score < self.config.confidence_threshold
            {
                continue;
            }
            let [x1, y1, x2, y2] = det.bbox;
            detections.push(Detection::new(x1, y1, x2 - x1, y2 - y1, det.score));
        }

        detections.sort_by(confidence_order);

        debug!(
            "Frame {}: {} raw → {} person detection(s)",
            frame.seq,
            total,
            detections.len()
        );
        Ok(detections)
    }
}

fn is_well_formed(det: &RawDetection) -> bool {
    let [x1, y1, x2, y2] = det.bbox;
    det.bbox.iter().all(|v| v.is_finite())
        && x2 > x1
        && y2 > y1
        && det.score.is_finite()
        && (0.0..=1.0).contains(&det.score)
}

/// Turn a raw image handle into RGB pixels.
pub fn decode_frame(payload: &ImagePayload) -> Result<RgbImage, FrameDecodeError> {
    if payload.is_empty() {
        return Err(FrameDecodeError::Empty);
    }
    match payload {
        ImagePayload::Encoded(bytes) => Ok(image::load_from_memory(bytes)?.to_rgb8()),
        ImagePayload::Rgb {
            data,
            width,
            height,
        } => {
            let expected = *width as usize * *height as usize * 3;
            if data.len() != expected {
                return Err(FrameDecodeError::Malformed {
                    expected,
                    got: data.len(),
                });
            }
            RgbImage::from_raw(*width, *height, data.to_vec()).ok_or(
                FrameDecodeError::Malformed {
                    expected,
                    got: data.len(),
                },
            )
        }
    }
}

/// Adapter output order: confidence descending, ties broken by position.
pub fn confidence_order(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.x.total_cmp(&b.x))
        .then_with(|| a.y.total_cmp(&b.y))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine {
        output: Result<Vec<RawDetection>, EngineError>,
    }

    impl DetectorEngine for FixedEngine {
        fn infer(&mut self, _request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
            self.output.clone()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, class_id: u32) -> RawDetection {
        RawDetection {
            bbox: [x1, y1, x2, y2],
            score,
            class_id,
        }
    }

    fn rgb_frame(seq: u64) -> Frame {
        Frame {
            seq,
            timestamp_ms: seq as f64 * 66.0,
            image: ImagePayload::Rgb {
                data: Arc::new(vec![0; 4 * 4 * 3]),
                width: 4,
                height: 4,
            },
        }
    }

    fn detector(output: Result<Vec<RawDetection>, EngineError>) -> PersonDetector<FixedEngine> {
        PersonDetector::new(FixedEngine { output }, AdapterConfig::default())
    }

    #[test]
    fn test_filters_threshold_and_class() {
        let mut d = detector(Ok(vec![
            raw(0.0, 0.0, 10.0, 20.0, 0.49, 0),
            raw(0.0, 0.0, 10.0, 20.0, 0.50, 0),
            raw(0.0, 0.0, 10.0, 20.0, 0.95, 2),
        ]));
        let dets = d.detect(&rgb_frame(1)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.50);
        assert_eq!(dets[0].width, 10.0);
        assert_eq!(dets[0].height, 20.0);
    }

    #[test]
    fn test_sorted_by_confidence_desc() {
        let mut d = detector(Ok(vec![
            raw(0.0, 0.0, 10.0, 10.0, 0.6, 0),
            raw(50.0, 0.0, 60.0, 10.0, 0.9, 0),
            raw(90.0, 0.0, 99.0, 10.0, 0.7, 0),
        ]));
        let dets = d.detect(&rgb_frame(1)).unwrap();
        let scores: Vec<f32> = dets.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.6]);
    }

    #[test]
    fn test_malformed_dropped() {
        let mut d = detector(Ok(vec![
            raw(10.0, 0.0, 5.0, 10.0, 0.9, 0),
            raw(f32::NAN, 0.0, 5.0, 10.0, 0.9, 0),
            raw(0.0, 0.0, 5.0, 10.0, 1.7, 0),
            raw(0.0, 0.0, 5.0, 10.0, 0.9, 0),
        ]));
        let dets = d.detect(&rgb_frame(1)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(d.malformed_dropped(), 3);
    }

    #[test]
    fn test_bad_frames_are_decode_errors() {
        let mut d = detector(Ok(vec![]));
        let mut frame = rgb_frame(1);
        frame.image = ImagePayload::Encoded(Arc::new(Vec::new()));
        assert!(matches!(
            d.detect(&frame),
            Err(DetectorError::Decode(FrameDecodeError::Empty))
        ));

        frame.image = ImagePayload::Encoded(Arc::new(vec![1, 2, 3, 4]));
        assert!(matches!(
            d.detect(&frame),
            Err(DetectorError::Decode(FrameDecodeError::Undecodable(_)))
        ));

        frame.image = ImagePayload::Rgb {
            data: Arc::new(vec![0; 5]),
            width: 4,
            height: 4,
        };
        assert!(matches!(
            d.detect(&frame),
            Err(DetectorError::Decode(FrameDecodeError::Malformed { expected: 48, got: 5 }))
        ));
    }

    #[test]
    fn test_engine_errors_mapped() {
        let mut d = detector(Err(EngineError::Unavailable("tpu gone".into())));
        assert!(matches!(
            d.detect(&rgb_frame(1)),
            Err(DetectorError::Unavailable(_))
        ));
        let mut d = detector(Err(EngineError::Failed("bad tensor".into())));
        assert!(matches!(
            d.detect(&rgb_frame(1)),
            Err(DetectorError::Inference(_))
        ));
    }

    #[test]
    fn test_encoded_png_decodes() {
        let img = RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_frame(&ImagePayload::Encoded(Arc::new(bytes))).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
    }
}
