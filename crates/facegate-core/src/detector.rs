//! Face location via an UltraFace-style ONNX detector, and the
//! [`DetectorAdapter`] boundary the collection loop polls.
//!
//! The pretrained models are opaque: this module only resizes frames into
//! the detector's input distribution and decodes its per-prior score/box
//! tensors back into frame coordinates.

use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Detection};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DET_INPUT_WIDTH: usize = 320;
const DET_INPUT_HEIGHT: usize = 240;
const DET_MEAN: f32 = 127.0;
const DET_STD: f32 = 128.0;
const DET_NMS_THRESHOLD: f32 = 0.3;

/// File names expected under the model directory.
pub const DETECTOR_MODEL_FILE: &str = "version-RFB-320.onnx";

/// Runtime options for the detection stage.
#[derive(Debug, Clone, Copy)]
pub struct DetectorOptions {
    /// Minimum confidence for a candidate face.
    pub score_threshold: f32,
    /// Cap on candidates kept after suppression.
    pub max_results: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.7,
            max_results: 5,
        }
    }
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Boundary to the pretrained detection/landmark/embedding pipeline.
///
/// One invocation consumes one grayscale frame and yields the single best
/// face (descriptor, landmarks, and bounding box), or `None` when no face
/// clears the score threshold. A tick that yields `None` is not an error.
pub trait DetectorAdapter: Send {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError>;
}

/// Production adapter: UltraFace-style face locator plus the landmark and
/// embedding nets from [`FaceRecognizer`].
pub struct OnnxDetector {
    locator: FaceLocator,
    recognizer: FaceRecognizer,
    options: DetectorOptions,
}

impl OnnxDetector {
    /// Load all three models from the given directory.
    pub fn load(model_dir: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        let locator = FaceLocator::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(model_dir)?;
        Ok(Self {
            locator,
            recognizer,
            options,
        })
    }
}

impl DetectorAdapter for OnnxDetector {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DetectorError> {
        let faces = self.locator.locate(frame, width, height, &self.options)?;
        let Some(best) = faces.into_iter().next() else {
            return Ok(None);
        };

        let (landmarks, descriptor) = self.recognizer.extract(frame, width, height, &best)?;
        Ok(Some(Detection {
            bounding_box: best,
            landmarks,
            descriptor,
        }))
    }
}

/// UltraFace-style single-shot face locator.
///
/// The model takes a 320×240 RGB tensor and emits per-prior confidence
/// pairs and corner-form boxes normalized to [0, 1]; priors are already
/// folded in, so decoding is a threshold filter plus NMS.
struct FaceLocator {
    session: Session,
}

impl FaceLocator {
    fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.to_string_lossy().into_owned(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face detection model"
        );

        Ok(Self { session })
    }

    /// Locate faces in a grayscale frame, best first.
    fn locate(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        options: &DetectorOptions,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let input = preprocess(frame, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            width as f32,
            height as f32,
            options.score_threshold,
        );

        let mut kept = nms(candidates, DET_NMS_THRESHOLD);
        kept.truncate(options.max_results);
        Ok(kept)
    }
}

/// Stretch-resize a grayscale frame to 320×240 and normalize into a NCHW
/// tensor. The model's boxes are normalized to [0, 1], so the stretch
/// maps back to frame coordinates by a plain multiply.
fn preprocess(frame: &[u8], width: usize, height: usize) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_HEIGHT, DET_INPUT_WIDTH));

    let x_ratio = width as f32 / DET_INPUT_WIDTH as f32;
    let y_ratio = height as f32 / DET_INPUT_HEIGHT as f32;

    for y in 0..DET_INPUT_HEIGHT {
        let src_y = ((y as f32 + 0.5) * y_ratio - 0.5).clamp(0.0, height as f32 - 1.0);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = src_y - y0 as f32;

        for x in 0..DET_INPUT_WIDTH {
            let src_x = ((x as f32 + 0.5) * x_ratio - 0.5).clamp(0.0, width as f32 - 1.0);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = src_x - x0 as f32;

            let tl = frame[y0 * width + x0] as f32;
            let tr = frame[y0 * width + x1] as f32;
            let bl = frame[y1 * width + x0] as f32;
            let br = frame[y1 * width + x1] as f32;

            let top = tl * (1.0 - fx) + tr * fx;
            let bot = bl * (1.0 - fx) + br * fx;
            let pixel = top * (1.0 - fy) + bot * fy;

            let normalized = (pixel - DET_MEAN) / DET_STD;
            // Grayscale → 3-channel: replicate Y across R, G, B.
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

/// Decode per-prior tensors into frame-space boxes above the threshold.
///
/// `scores` is [background, face] pairs per prior; `boxes` is normalized
/// [x1, y1, x2, y2] per prior.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    frame_width: f32,
    frame_height: f32,
    threshold: f32,
) -> Vec<BoundingBox> {
    let priors = scores.len() / 2;
    let mut detections = Vec::new();

    for i in 0..priors {
        let confidence = scores[i * 2 + 1];
        if confidence <= threshold {
            continue;
        }
        let off = i * 4;
        if off + 3 >= boxes.len() {
            break;
        }

        let x1 = boxes[off] * frame_width;
        let y1 = boxes[off + 1] * frame_height;
        let x2 = boxes[off + 2] * frame_width;
        let y2 = boxes[off + 3] * frame_height;

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence,
        });
    }

    detections
}

/// Non-maximum suppression; returns survivors sorted by confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
