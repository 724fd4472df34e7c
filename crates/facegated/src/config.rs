use facegate_core::{DetectorOptions, PolicyKind};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionOptions;

/// Daemon configuration, loaded from `FACEGATE_*` environment variables.
#[derive(Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite gallery database.
    pub db_path: PathBuf,
    /// Detector polling interval during Collecting.
    pub poll_interval: Duration,
    /// Total length of one collection window.
    pub collection_window: Duration,
    /// Frames discarded after camera open (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Minimum detection confidence.
    pub score_threshold: f32,
    /// Cap on candidate faces kept per frame.
    pub max_results: usize,
    /// Which comparison policy authentication runs with.
    pub match_policy: PolicyKind,
    /// Accept threshold for the distance policy (strictly below).
    pub distance_threshold: f32,
    /// Accept threshold for the similarity policy (at or above).
    pub similarity_threshold: f32,
}

impl Config {
    /// Load configuration from the environment with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/usr/share/facegate/models"));

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        let db_path = std::env::var("FACEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("gallery.db"));

        let match_policy = std::env::var("FACEGATE_MATCH_POLICY")
            .ok()
            .and_then(|v| PolicyKind::parse(&v))
            .unwrap_or(PolicyKind::Distance);

        Self {
            camera_device: std::env::var("FACEGATE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path,
            poll_interval: Duration::from_millis(env_u64("FACEGATE_POLL_INTERVAL_MS", 200)),
            collection_window: Duration::from_millis(env_u64("FACEGATE_WINDOW_MS", 5000)),
            warmup_frames: env_usize("FACEGATE_WARMUP_FRAMES", 4),
            score_threshold: env_f32("FACEGATE_SCORE_THRESHOLD", 0.7),
            max_results: env_usize("FACEGATE_MAX_RESULTS", 5),
            match_policy,
            distance_threshold: env_f32("FACEGATE_DISTANCE_THRESHOLD", 0.6),
            similarity_threshold: env_f32("FACEGATE_SIMILARITY_THRESHOLD", 0.99999),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: self.poll_interval,
            window: self.collection_window,
            warmup_frames: self.warmup_frames,
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            score_threshold: self.score_threshold,
            max_results: self.max_results,
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
