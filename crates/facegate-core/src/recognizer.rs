//! Landmark and descriptor extraction over a square face crop.
//!
//! Two pretrained nets share one 112×112 crop of the detected face: a
//! 68-point landmark net and a 128-dimensional embedding net.

use crate::types::{BoundingBox, Descriptor, DESCRIPTOR_LEN};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const CROP_SIZE: usize = 112;
const CROP_MEAN: f32 = 127.5;
const CROP_STD: f32 = 127.5;
const LANDMARK_POINTS: usize = 68;

pub const LANDMARK_MODEL_FILE: &str = "landmark-68.onnx";
pub const EMBEDDING_MODEL_FILE: &str = "mobilefacenet-128.onnx";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Landmark + embedding stage of the pipeline.
pub struct FaceRecognizer {
    landmark_session: Session,
    embedding_session: Session,
}

impl FaceRecognizer {
    /// Load the landmark and embedding models from the model directory.
    pub fn load(model_dir: &Path) -> Result<Self, RecognizerError> {
        let landmark_session = load_session(&model_dir.join(LANDMARK_MODEL_FILE))?;
        let embedding_session = load_session(&model_dir.join(EMBEDDING_MODEL_FILE))?;
        Ok(Self {
            landmark_session,
            embedding_session,
        })
    }

    /// Extract landmarks and the descriptor for one detected face.
    ///
    /// The face region is expanded to a square, cropped out of the frame,
    /// and resized to 112×112; both nets run over that crop. Landmark
    /// outputs are normalized crop coordinates and are mapped back into
    /// frame space.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        face: &BoundingBox,
    ) -> Result<(Vec<(f32, f32)>, Descriptor), RecognizerError> {
        let region = square_region(face, width, height);
        let crop = crop_resize(frame, width as usize, &region);
        let input = crop_tensor(&crop);

        let landmarks = {
            let outputs = self
                .landmark_session
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("landmarks: {e}")))?;

            if raw.len() < LANDMARK_POINTS * 2 {
                return Err(RecognizerError::InferenceFailed(format!(
                    "expected {} landmark values, got {}",
                    LANDMARK_POINTS * 2,
                    raw.len()
                )));
            }

            raw[..LANDMARK_POINTS * 2]
                .chunks_exact(2)
                .map(|p| {
                    (
                        region.x + p[0] * region.side,
                        region.y + p[1] * region.side,
                    )
                })
                .collect::<Vec<_>>()
        };

        let descriptor = {
            let outputs = self
                .embedding_session
                .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("embedding: {e}")))?;

            if raw.len() != DESCRIPTOR_LEN {
                return Err(RecognizerError::InferenceFailed(format!(
                    "expected {DESCRIPTOR_LEN}-dim embedding, got {}",
                    raw.len()
                )));
            }

            Descriptor::new(l2_normalize(raw))
        };

        Ok((landmarks, descriptor))
    }
}

fn load_session(model_path: &Path) -> Result<Session, RecognizerError> {
    if !model_path.exists() {
        return Err(RecognizerError::ModelNotFound(
            model_path.to_string_lossy().into_owned(),
        ));
    }

    let session = Session::builder()?
        .with_intra_threads(2)
        .map_err(ort::Error::from)?
        .commit_from_file(model_path)?;

    tracing::info!(
        path = %model_path.display(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded recognizer model"
    );

    Ok(session)
}

/// Square crop region in frame coordinates, clamped to the frame.
struct CropRegion {
    x: f32,
    y: f32,
    side: f32,
}

/// Expand a face box to a square around its center and clamp it so the
/// whole region stays inside the frame.
fn square_region(face: &BoundingBox, width: u32, height: u32) -> CropRegion {
    let side = face
        .width
        .max(face.height)
        .min(width as f32)
        .min(height as f32)
        .max(1.0);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x = (cx - side / 2.0).clamp(0.0, width as f32 - side);
    let y = (cy - side / 2.0).clamp(0.0, height as f32 - side);

    CropRegion { x, y, side }
}

/// Bilinear crop-and-resize of the region to 112×112 grayscale.
fn crop_resize(frame: &[u8], frame_width: usize, region: &CropRegion) -> Vec<u8> {
    let frame_height = frame.len() / frame_width.max(1);
    let step = region.side / CROP_SIZE as f32;
    let mut crop = vec![0u8; CROP_SIZE * CROP_SIZE];

    for y in 0..CROP_SIZE {
        let src_y = (region.y + (y as f32 + 0.5) * step - 0.5)
            .clamp(0.0, frame_height as f32 - 1.0);
        let y0 = src_y.floor() as usize;
        let y1 = (y0 + 1).min(frame_height - 1);
        let fy = src_y - y0 as f32;

        for x in 0..CROP_SIZE {
            let src_x = (region.x + (x as f32 + 0.5) * step - 0.5)
                .clamp(0.0, frame_width as f32 - 1.0);
            let x0 = src_x.floor() as usize;
            let x1 = (x0 + 1).min(frame_width - 1);
            let fx = src_x - x0 as f32;

            let tl = frame[y0 * frame_width + x0] as f32;
            let tr = frame[y0 * frame_width + x1] as f32;
            let bl = frame[y1 * frame_width + x0] as f32;
            let br = frame[y1 * frame_width + x1] as f32;

            let top = tl * (1.0 - fx) + tr * fx;
            let bot = bl * (1.0 - fx) + br * fx;
            crop[y * CROP_SIZE + x] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
    }

    crop
}

/// Normalize a 112×112 grayscale crop into a 3-channel NCHW tensor.
fn crop_tensor(crop: &[u8]) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, CROP_SIZE, CROP_SIZE));
    for y in 0..CROP_SIZE {
        for x in 0..CROP_SIZE {
            let pixel = crop[y * CROP_SIZE + x] as f32;
            let normalized = (pixel - CROP_MEAN) / CROP_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|v| v / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_region_expands_short_side() {
        let face = BoundingBox {
            x: 100.0,
            y: 80.0,
            width: 40.0,
            height: 60.0,
            confidence: 0.9,
        };
        let region = square_region(&face, 640, 480);
        assert_eq!(region.side, 60.0);
        // Centered on the face center (120, 110).
        assert!((region.x - 90.0).abs() < 1e-4);
        assert!((region.y - 80.0).abs() < 1e-4);
    }

    #[test]
    fn square_region_clamps_to_frame() {
        let face = BoundingBox {
            x: 600.0,
            y: 440.0,
            width: 80.0,
            height: 80.0,
            confidence: 0.9,
        };
        let region = square_region(&face, 640, 480);
        assert!(region.x + region.side <= 640.0 + 1e-4);
        assert!(region.y + region.side <= 480.0 + 1e-4);
        assert!(region.x >= 0.0 && region.y >= 0.0);
    }

    #[test]
    fn crop_resize_uniform_stays_uniform() {
        let frame = vec![200u8; 64 * 64];
        let region = CropRegion {
            x: 8.0,
            y: 8.0,
            side: 48.0,
        };
        let crop = crop_resize(&frame, 64, &region);
        assert_eq!(crop.len(), CROP_SIZE * CROP_SIZE);
        assert!(crop.iter().all(|&p| p == 200));
    }

    #[test]
    fn crop_tensor_normalization() {
        let crop = vec![255u8; CROP_SIZE * CROP_SIZE];
        let tensor = crop_tensor(&crop);
        let expected = (255.0 - CROP_MEAN) / CROP_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
        assert_eq!(tensor[[0, 1, 5, 5]], tensor[[0, 2, 5, 5]]);
    }

    #[test]
    fn l2_normalize_unit_norm() {
        let out = l2_normalize(&[3.0, 4.0]);
        let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((out[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_zero_vector_unchanged() {
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}
