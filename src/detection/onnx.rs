// src/detection/onnx.rs
//
// YOLOv8-style person detector on ONNX Runtime. Only compiled with the
// `onnx` feature.

use super::engine::{DetectorEngine, EngineError, InferenceRequest, RawDetection};
use anyhow::Result;
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tracing::{debug, info};

const NMS_IOU_THRESHOLD: f32 = 0.45;
const LETTERBOX_FILL: u8 = 114;
/// Candidates below this never reach NMS; the adapter applies the real threshold.
const CANDIDATE_FLOOR: f32 = 0.05;

pub struct OnnxEngine {
    session: Session,
    input_size: u32,
}

/// Where the source frame landed inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl OnnxEngine {
    pub fn new(model_path: &str, input_size: u32) -> Result<Self> {
        info!("Loading ONNX model: {}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;

        info!("✓ ONNX person detector initialized ({}px input)", input_size);
        Ok(Self {
            session,
            input_size,
        })
    }

    fn run(&mut self, input: Vec<f32>) -> Result<(Vec<i64>, Vec<f32>), EngineError> {
        let side = self.input_size as usize;
        let tensor = Tensor::from_array(([1usize, 3, side, side], input))
            .map_err(|e| EngineError::Failed(format!("input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => tensor])
            .map_err(|e| EngineError::Unavailable(format!("session run: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Failed(format!("output tensor: {}", e)))?;

        Ok((shape.to_vec(), data.to_vec()))
    }
}

impl DetectorEngine for OnnxEngine {
    fn infer(&mut self, request: &InferenceRequest) -> Result<Vec<RawDetection>, EngineError> {
        let (input, letterbox) = preprocess(&request.image, self.input_size);
        let (shape, output) = self.run(input)?;

        let detections = postprocess(&shape, &output, letterbox)?;
        debug!(
            "Frame {}: {} candidate(s) after NMS",
            request.seq,
            detections.len()
        );
        Ok(detections)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Letterbox to a square canvas, normalise to [0, 1] and lay out as CHW.
fn preprocess(image: &RgbImage, target: u32) -> (Vec<f32>, Letterbox) {
    let (src_w, src_h) = image.dimensions();
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale).round() as u32).clamp(1, target);
    let scaled_h = ((src_h as f32 * scale).round() as u32).clamp(1, target);
    let pad_x = (target - scaled_w) / 2;
    let pad_y = (target - scaled_h) / 2;

    let resized = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target, target, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    let side = target as usize;
    let plane = side * side;
    let mut input = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let idx = y as usize * side + x as usize;
        for c in 0..3 {
            input[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }

    (
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Parse `[1, 4 + classes, anchors]` (cx, cy, w, h, class scores...).
fn postprocess(
    shape: &[i64],
    output: &[f32],
    letterbox: Letterbox,
) -> Result<Vec<RawDetection>, EngineError> {
    let [_, rows, anchors] = shape else {
        return Err(EngineError::Failed(format!(
            "unexpected output shape {:?}",
            shape
        )));
    };
    let (rows, anchors) = (*rows as usize, *anchors as usize);
    if rows <= 4 || output.len() < rows * anchors {
        return Err(EngineError::Failed(format!(
            "output of {} values does not match shape {:?}",
            output.len(),
            shape
        )));
    }
    let classes = rows - 4;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[anchors * 2 + i];
        let h = output[anchors * 3 + i];

        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for c in 0..classes {
            let score = output[anchors * (4 + c) + i];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < CANDIDATE_FLOOR {
            continue;
        }

        let unletterbox = |v: f32, pad: f32| (v - pad) / letterbox.scale;
        candidates.push(RawDetection {
            bbox: [
                unletterbox(cx - w / 2.0, letterbox.pad_x),
                unletterbox(cy - h / 2.0, letterbox.pad_y),
                unletterbox(cx + w / 2.0, letterbox.pad_x),
                unletterbox(cy + h / 2.0, letterbox.pad_y),
            ],
            score: best_score.min(1.0),
            class_id: best_class as u32,
        });
    }

    Ok(nms(candidates, NMS_IOU_THRESHOLD))
}

/// Greedy per-class non-maximum suppression.
fn nms(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in detections {
        let suppressed = keep.iter().any(|k| {
            k.class_id == det.class_id && calculate_iou(&k.bbox, &det.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

fn calculate_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bbox: [f32; 4], score: f32, class_id: u32) -> RawDetection {
        RawDetection {
            bbox,
            score,
            class_id,
        }
    }

    #[test]
    fn test_iou() {
        assert_eq!(calculate_iou(&[0.0, 0.0, 10.0, 10.0], &[0.0, 0.0, 10.0, 10.0]), 1.0);
        assert_eq!(calculate_iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let half = calculate_iou(&[0.0, 0.0, 10.0, 10.0], &[5.0, 0.0, 15.0, 10.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_per_overlap() {
        let kept = nms(
            vec![
                raw([0.0, 0.0, 10.0, 10.0], 0.6, 0),
                raw([1.0, 0.0, 11.0, 10.0], 0.9, 0),
                raw([100.0, 0.0, 110.0, 10.0], 0.5, 0),
                raw([1.0, 0.0, 11.0, 10.0], 0.8, 2),
            ],
            NMS_IOU_THRESHOLD,
        );
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert!(kept.iter().any(|d| d.class_id == 2));
    }

    #[test]
    fn test_letterbox_geometry() {
        let image = RgbImage::new(200, 100);
        let (input, lb) = preprocess(&image, 64);
        assert_eq!(input.len(), 3 * 64 * 64);
        assert!((lb.scale - 0.32).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);
        // Padding rows carry the fill colour.
        assert!((input[0] - LETTERBOX_FILL as f32 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_postprocess_maps_back_to_frame() {
        // Two anchors, two classes; anchor 0 is a person at model (32, 32, 16x16).
        let anchors = 2;
        let mut output = vec![0.0f32; 6 * anchors];
        output[0] = 32.0;
        output[anchors] = 32.0;
        output[anchors * 2] = 16.0;
        output[anchors * 3] = 16.0;
        output[anchors * 4] = 0.8;
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 8.0,
        };
        let dets = postprocess(&[1, 6, anchors as i64], &output, lb).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 0);
        assert_eq!(dets[0].bbox, [48.0, 32.0, 80.0, 64.0]);

        assert!(postprocess(&[1, 6], &output, lb).is_err());
    }
}
