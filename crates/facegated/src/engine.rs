//! Engine thread: owns the detector pipeline and the gallery, and runs
//! one collection window at a time.
//!
//! D-Bus handlers talk to it through an mpsc request channel with
//! oneshot replies. The camera is not held open across requests: each
//! window opens it and the session drops it in Finalizing.

use crate::config::Config;
use crate::session::{self, SessionOptions, TickEvent};
use facegate_core::{
    Descriptor, DetectorAdapter, DetectorError, DistanceMatcher, MatchOutcome, Matcher,
    OnnxDetector, PolicyKind, SimilarityMatcher,
};
use facegate_hw::{Camera, CameraError, FrameSource};
use facegate_store::{FaceRecord, FaceStore, KeyValueStore, SqliteKv, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("no face detected during the collection window")]
    NoFaceDetected,
    #[error("no registered faces; register before authenticating")]
    EmptyGallery,
    #[error("a collection window is already running")]
    Busy,
    #[error("engine thread exited")]
    ChannelClosed,
}

impl From<session::SessionError> for EngineError {
    fn from(e: session::SessionError) -> Self {
        match e {
            session::SessionError::Camera(e) => Self::Camera(e),
            session::SessionError::Detector(e) => Self::Detector(e),
            session::SessionError::NoFace => Self::NoFaceDetected,
        }
    }
}

/// Result of a registration window.
pub struct RegisterOutcome {
    pub gallery_len: usize,
    pub samples: usize,
}

/// Result of an authentication window.
pub struct AuthOutcome {
    pub outcome: MatchOutcome,
    pub samples: usize,
}

/// Daemon status snapshot.
pub struct StatusReport {
    pub gallery_len: usize,
    pub policy: &'static str,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        reply: oneshot::Sender<Result<RegisterOutcome, EngineError>>,
    },
    Authenticate {
        reply: oneshot::Sender<Result<AuthOutcome, EngineError>>,
    },
    ListRecords {
        reply: oneshot::Sender<Result<Vec<FaceRecord>, EngineError>>,
    },
    ClearRecords {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<StatusReport, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    collecting: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Refuse to start a window while one is running.
    fn ensure_idle(&self) -> Result<(), EngineError> {
        if self.collecting.load(Ordering::SeqCst) {
            return Err(EngineError::Busy);
        }
        Ok(())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run a registration window and append the averaged descriptor.
    pub async fn register(&self) -> Result<RegisterOutcome, EngineError> {
        self.ensure_idle()?;
        self.request(|reply| EngineRequest::Register { reply }).await
    }

    /// Run an authentication window against the stored gallery.
    pub async fn authenticate(&self) -> Result<AuthOutcome, EngineError> {
        self.ensure_idle()?;
        self.request(|reply| EngineRequest::Authenticate { reply })
            .await
    }

    pub async fn list_records(&self) -> Result<Vec<FaceRecord>, EngineError> {
        self.request(|reply| EngineRequest::ListRecords { reply })
            .await
    }

    pub async fn clear_records(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::ClearRecords { reply })
            .await
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the ONNX pipeline up front and fails fast if a model file is
/// missing. The camera is opened per window, never at startup.
pub fn spawn_engine(
    config: Config,
    store: FaceStore<SqliteKv>,
    ticks: mpsc::Sender<TickEvent>,
) -> Result<EngineHandle, EngineError> {
    let detector = OnnxDetector::load(&config.model_dir, config.detector_options())?;
    tracing::info!(dir = %config.model_dir.display(), "ONNX pipeline loaded");

    let matcher = build_matcher(&config);
    let policy_name = policy_name(config.match_policy);

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let collecting = Arc::new(AtomicBool::new(false));
    let flag = collecting.clone();

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .expect("failed to build engine runtime");

            let mut detector = detector;
            let mut store = store;
            let opts = config.session_options();

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { reply } => {
                        flag.store(true, Ordering::SeqCst);
                        let result = match Camera::open(&config.camera_device) {
                            Ok(camera) => rt.block_on(run_register(
                                camera,
                                &mut detector,
                                &mut store,
                                opts,
                                &ticks,
                            )),
                            Err(e) => Err(e.into()),
                        };
                        flag.store(false, Ordering::SeqCst);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Authenticate { reply } => {
                        flag.store(true, Ordering::SeqCst);
                        let result = match gallery_for_auth(&store) {
                            Ok(records) => match Camera::open(&config.camera_device) {
                                Ok(camera) => rt.block_on(run_authenticate(
                                    camera,
                                    &mut detector,
                                    &records,
                                    matcher.as_ref(),
                                    opts,
                                    &ticks,
                                )),
                                Err(e) => Err(e.into()),
                            },
                            Err(e) => Err(e),
                        };
                        flag.store(false, Ordering::SeqCst);
                        let _ = reply.send(result);
                    }
                    EngineRequest::ListRecords { reply } => {
                        let _ = reply.send(store.records().map_err(Into::into));
                    }
                    EngineRequest::ClearRecords { reply } => {
                        let _ = reply.send(store.clear().map_err(Into::into));
                    }
                    EngineRequest::Status { reply } => {
                        let result = store.len().map_err(Into::into).map(|gallery_len| {
                            StatusReport {
                                gallery_len,
                                policy: policy_name,
                            }
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx, collecting })
}

fn build_matcher(config: &Config) -> Box<dyn Matcher> {
    match config.match_policy {
        PolicyKind::Distance => Box::new(DistanceMatcher {
            threshold: config.distance_threshold,
        }),
        PolicyKind::Similarity => Box::new(SimilarityMatcher {
            threshold: config.similarity_threshold,
        }),
    }
}

fn policy_name(kind: PolicyKind) -> &'static str {
    match kind {
        PolicyKind::Distance => "distance",
        PolicyKind::Similarity => "similarity",
    }
}

/// Authentication precondition: a non-empty gallery. Checked before the
/// camera is opened, so an empty gallery never touches the device.
fn gallery_for_auth<K: KeyValueStore>(
    store: &FaceStore<K>,
) -> Result<Vec<FaceRecord>, EngineError> {
    let records = store.records()?;
    if records.is_empty() {
        return Err(EngineError::EmptyGallery);
    }
    Ok(records)
}

/// Registration: run one window and append the averaged descriptor.
async fn run_register<S, D, K>(
    source: S,
    detector: &mut D,
    store: &mut FaceStore<K>,
    opts: SessionOptions,
    ticks: &mpsc::Sender<TickEvent>,
) -> Result<RegisterOutcome, EngineError>
where
    S: FrameSource,
    D: DetectorAdapter + ?Sized,
    K: KeyValueStore,
{
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let collected = session::collect(source, detector, opts, cancel_rx, ticks).await?;
    let gallery_len = store.append(FaceRecord::now(collected.descriptor))?;
    tracing::info!(
        gallery = gallery_len,
        samples = collected.samples,
        "face registered"
    );
    Ok(RegisterOutcome {
        gallery_len,
        samples: collected.samples,
    })
}

/// Authentication: run one window and compare the averaged descriptor
/// against the gallery under the configured policy.
async fn run_authenticate<S, D>(
    source: S,
    detector: &mut D,
    records: &[FaceRecord],
    matcher: &dyn Matcher,
    opts: SessionOptions,
    ticks: &mpsc::Sender<TickEvent>,
) -> Result<AuthOutcome, EngineError>
where
    S: FrameSource,
    D: DetectorAdapter + ?Sized,
{
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let collected = session::collect(source, detector, opts, cancel_rx, ticks).await?;

    let gallery: Vec<Descriptor> = records.iter().map(|r| r.descriptor.clone()).collect();
    let outcome = matcher.compare(&collected.descriptor, &gallery);
    tracing::info!(
        accepted = outcome.accepted,
        score = ?outcome.score,
        compared = outcome.compared,
        skipped = outcome.skipped,
        "authentication decided"
    );
    Ok(AuthOutcome {
        outcome,
        samples: collected.samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{BoundingBox, Detection};
    use facegate_hw::Frame;
    use facegate_store::MemoryKv;
    use std::time::Duration;

    struct StaticSource;

    impl FrameSource for StaticSource {
        fn grab(&mut self) -> Result<Frame, CameraError> {
            Ok(Frame {
                data: vec![128; 4],
                width: 2,
                height: 2,
                sequence: 0,
                is_dark: false,
            })
        }

        fn dimensions(&self) -> (u32, u32) {
            (2, 2)
        }
    }

    struct StaticDetector {
        descriptor: Vec<f32>,
    }

    impl DetectorAdapter for StaticDetector {
        fn detect(
            &mut self,
            _frame: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Option<Detection>, DetectorError> {
            Ok(Some(Detection {
                bounding_box: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: width as f32,
                    height: height as f32,
                    confidence: 0.9,
                },
                landmarks: vec![],
                descriptor: Descriptor::new(self.descriptor.clone()),
            }))
        }
    }

    fn short_opts() -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_millis(200),
            window: Duration::from_millis(500),
            warmup_frames: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn register_appends_one_record() {
        let mut store = FaceStore::new(MemoryKv::new());
        let mut detector = StaticDetector {
            descriptor: vec![0.5, 1.5],
        };
        let (ticks, _rx) = mpsc::channel(8);

        let out = run_register(StaticSource, &mut detector, &mut store, short_opts(), &ticks)
            .await
            .unwrap();
        assert_eq!(out.gallery_len, 1);
        assert!(out.samples >= 1);

        let records = store.records().unwrap();
        assert_eq!(records[0].descriptor.values(), &[0.5, 1.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn authenticate_accepts_registered_face() {
        let mut detector = StaticDetector {
            descriptor: vec![0.5, 1.5],
        };
        let records = vec![FaceRecord {
            descriptor: Descriptor::new(vec![0.5, 1.5]),
            timestamp: 0,
        }];
        let matcher = DistanceMatcher { threshold: 0.6 };
        let (ticks, _rx) = mpsc::channel(8);

        let out = run_authenticate(
            StaticSource,
            &mut detector,
            &records,
            &matcher,
            short_opts(),
            &ticks,
        )
        .await
        .unwrap();
        assert!(out.outcome.accepted);
        assert_eq!(out.outcome.best_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn authenticate_rejects_distant_face() {
        let mut detector = StaticDetector {
            descriptor: vec![10.0, 10.0],
        };
        let records = vec![FaceRecord {
            descriptor: Descriptor::new(vec![0.0, 0.0]),
            timestamp: 0,
        }];
        let matcher = DistanceMatcher { threshold: 0.6 };
        let (ticks, _rx) = mpsc::channel(8);

        let out = run_authenticate(
            StaticSource,
            &mut detector,
            &records,
            &matcher,
            short_opts(),
            &ticks,
        )
        .await
        .unwrap();
        assert!(!out.outcome.accepted);
    }

    #[test]
    fn empty_gallery_fails_before_any_comparison() {
        let store: FaceStore<MemoryKv> = FaceStore::new(MemoryKv::new());
        assert!(matches!(
            gallery_for_auth(&store),
            Err(EngineError::EmptyGallery)
        ));
    }

    #[tokio::test]
    async fn busy_handle_refuses_a_second_window() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = EngineHandle {
            tx,
            collecting: Arc::new(AtomicBool::new(true)),
        };
        assert!(matches!(handle.register().await, Err(EngineError::Busy)));
        assert!(matches!(
            handle.authenticate().await,
            Err(EngineError::Busy)
        ));
    }
}
