//! facegate-core — Descriptor math, match policies, and the detector
//! pipeline boundary.
//!
//! Detection, landmarking, and descriptor extraction are delegated to
//! pretrained ONNX models running via ONNX Runtime; this crate owns the
//! orchestration around them: aggregation over a collection window and
//! the gallery match policies.

pub mod aggregate;
pub mod detector;
pub mod matcher;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorAdapter, DetectorError, DetectorOptions, OnnxDetector};
pub use matcher::{DistanceMatcher, MatchOutcome, Matcher, PolicyKind, SimilarityMatcher};
pub use types::{BoundingBox, Descriptor, Detection, DESCRIPTOR_LEN};
