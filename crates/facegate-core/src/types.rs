use serde::{Deserialize, Serialize};

/// Descriptor length produced by the embedding model.
pub const DESCRIPTOR_LEN: usize = 128;

/// Fixed-length face embedding vector.
///
/// Produced by the embedding model and immutable afterwards. Serializes
/// transparently as a plain JSON number array, which is also the stored
/// gallery format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance to another descriptor of the same length.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity to another descriptor, in [-1, 1].
    ///
    /// Always processes all dimensions; a zero-norm operand yields 0.
    pub fn cosine_similarity(&self, other: &Descriptor) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Bounding box for a detected face, in frame coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// One detector invocation's result: the best face in the frame.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Landmark points in frame coordinates.
    pub landmarks: Vec<(f32, f32)>,
    pub descriptor: Descriptor,
}
