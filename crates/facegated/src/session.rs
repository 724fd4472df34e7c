//! One collection window: Idle → Capturing → Collecting → Finalizing.
//!
//! The window owns its frame source and drops it in Finalizing on every
//! exit path; the polling loop is a tokio interval bounded by a deadline
//! and a cancellation flag, so all exit conditions run under virtual time
//! in tests.

use facegate_core::{aggregate, BoundingBox, Descriptor, DetectorAdapter};
use facegate_hw::FrameSource;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

/// Phases of one collection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Capturing,
    Collecting,
    Finalizing,
}

/// Timing knobs for a window.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub window: Duration,
    pub warmup_frames: usize,
}

/// Per-tick progress event, forwarded to overlay renderers.
#[derive(Debug, Clone, Serialize)]
pub struct TickEvent {
    pub elapsed_ms: u64,
    /// Descriptors collected so far.
    pub collected: usize,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detection: Option<TickDetection>,
}

/// Overlay payload for a tick that saw a face.
#[derive(Debug, Clone, Serialize)]
pub struct TickDetection {
    pub bounding_box: BoundingBox,
    pub landmarks: Vec<(f32, f32)>,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera: {0}")]
    Camera(#[from] facegate_hw::CameraError),
    #[error("detector: {0}")]
    Detector(#[from] facegate_core::DetectorError),
    #[error("no face detected during the collection window")]
    NoFace,
}

/// What a completed window produced.
pub struct Collected {
    /// Element-wise mean of every descriptor collected in the window.
    pub descriptor: Descriptor,
    /// How many per-tick descriptors went into the mean.
    pub samples: usize,
}

/// Run one collection window to completion.
///
/// Discards warmup frames (Capturing), then polls the detector once per
/// interval tick until the window deadline passes or `cancel` flips to
/// true (Collecting). Ticks that see no face, or a dark frame, append
/// nothing. The source is dropped before aggregation (Finalizing), so
/// the camera is released on success, failure, and cancellation alike.
pub async fn collect<S, D>(
    mut source: S,
    detector: &mut D,
    opts: SessionOptions,
    mut cancel: watch::Receiver<bool>,
    ticks: &mpsc::Sender<TickEvent>,
) -> Result<Collected, SessionError>
where
    S: FrameSource,
    D: DetectorAdapter + ?Sized,
{
    tracing::info!(
        phase = ?Phase::Capturing,
        warmup = opts.warmup_frames,
        "collection window opened"
    );
    for _ in 0..opts.warmup_frames {
        let _ = source.grab();
    }

    let started = Instant::now();
    let deadline = started + opts.window;
    let mut interval = tokio::time::interval(opts.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut buffer: Vec<Descriptor> = Vec::new();

    tracing::info!(
        phase = ?Phase::Collecting,
        window_ms = opts.window.as_millis() as u64,
        interval_ms = opts.poll_interval.as_millis() as u64,
        "polling detector"
    );

    let outcome: Result<(), SessionError> = loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                break Ok(());
            }
            changed = cancel.changed() => {
                // A dropped sender counts as cancellation.
                if changed.is_err() || *cancel.borrow_and_update() {
                    tracing::info!("collection cancelled early");
                    break Ok(());
                }
            }
            _ = interval.tick() => {
                if let Err(e) = poll_once(&mut source, detector, &mut buffer, started, ticks) {
                    break Err(e);
                }
            }
        }
    };

    tracing::info!(
        phase = ?Phase::Finalizing,
        collected = buffer.len(),
        "collection window closed"
    );
    drop(source);
    outcome?;

    let samples = buffer.len();
    let descriptor = aggregate::average(&buffer).map_err(|_| SessionError::NoFace)?;
    Ok(Collected {
        descriptor,
        samples,
    })
}

/// One Collecting tick: grab a frame, run the detector, buffer the
/// descriptor, and publish a progress event.
fn poll_once<S, D>(
    source: &mut S,
    detector: &mut D,
    buffer: &mut Vec<Descriptor>,
    started: Instant,
    ticks: &mpsc::Sender<TickEvent>,
) -> Result<(), SessionError>
where
    S: FrameSource,
    D: DetectorAdapter + ?Sized,
{
    let frame = source.grab()?;
    if frame.is_dark {
        tracing::debug!(sequence = frame.sequence, "dark frame, skipping tick");
        return Ok(());
    }

    let detection = detector.detect(&frame.data, frame.width, frame.height)?;

    let tick_detection = detection.map(|d| {
        buffer.push(d.descriptor);
        TickDetection {
            bounding_box: d.bounding_box,
            landmarks: d.landmarks,
        }
    });

    let event = TickEvent {
        elapsed_ms: started.elapsed().as_millis() as u64,
        collected: buffer.len(),
        frame_width: frame.width,
        frame_height: frame.height,
        detection: tick_detection,
    };
    // Overlay rendering is best-effort; a slow consumer drops ticks
    // rather than stalling collection.
    if ticks.try_send(event).is_err() {
        tracing::debug!("tick event dropped, channel full");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::{Detection, DetectorError};
    use facegate_hw::{CameraError, Frame};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn opts(window_ms: u64) -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_millis(200),
            window: Duration::from_millis(window_ms),
            warmup_frames: 0,
        }
    }

    /// Frame source that records grab counts and its own release.
    struct FakeSource {
        grabs: Arc<AtomicUsize>,
        released: Arc<AtomicBool>,
        dark: bool,
        fail_after: Option<usize>,
    }

    impl FakeSource {
        fn new(grabs: Arc<AtomicUsize>, released: Arc<AtomicBool>) -> Self {
            Self {
                grabs,
                released,
                dark: false,
                fail_after: None,
            }
        }
    }

    impl FrameSource for FakeSource {
        fn grab(&mut self) -> Result<Frame, CameraError> {
            let n = self.grabs.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(CameraError::CaptureFailed("gone".into()));
            }
            Ok(Frame {
                data: vec![128; 4],
                width: 2,
                height: 2,
                sequence: n as u32,
                is_dark: self.dark,
            })
        }

        fn dimensions(&self) -> (u32, u32) {
            (2, 2)
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    /// Detector returning a fixed descriptor on a scripted subset of calls.
    struct FakeDetector {
        calls: Arc<AtomicUsize>,
        descriptor: Vec<f32>,
        respond: fn(usize) -> bool,
    }

    impl FakeDetector {
        fn always(calls: Arc<AtomicUsize>, descriptor: Vec<f32>) -> Self {
            Self {
                calls,
                descriptor,
                respond: |_| true,
            }
        }
    }

    impl DetectorAdapter for FakeDetector {
        fn detect(
            &mut self,
            _frame: &[u8],
            width: u32,
            height: u32,
        ) -> Result<Option<Detection>, DetectorError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !(self.respond)(n) {
                return Ok(None);
            }
            Ok(Some(Detection {
                bounding_box: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: width as f32,
                    height: height as f32,
                    confidence: 0.9,
                },
                landmarks: vec![(0.5, 0.5)],
                descriptor: Descriptor::new(self.descriptor.clone()),
            }))
        }
    }

    fn channels() -> (
        watch::Sender<bool>,
        watch::Receiver<bool>,
        mpsc::Sender<TickEvent>,
        mpsc::Receiver<TickEvent>,
    ) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (tick_tx, tick_rx) = mpsc::channel(64);
        (cancel_tx, cancel_rx, tick_tx, tick_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_once_per_tick_until_deadline() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let source = FakeSource::new(grabs.clone(), released.clone());
        let mut detector = FakeDetector::always(calls.clone(), vec![1.0, 3.0]);

        // 900 ms window at 200 ms: ticks at 0, 200, 400, 600, 800.
        let collected = collect(source, &mut detector, opts(900), cancel_rx, &tick_tx)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(collected.samples, 5);
        assert_eq!(collected.descriptor.values(), &[1.0, 3.0]);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn no_face_ticks_append_nothing() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let source = FakeSource::new(grabs.clone(), released.clone());
        // Face on even calls only.
        let mut detector = FakeDetector {
            calls: calls.clone(),
            descriptor: vec![2.0],
            respond: |n| n % 2 == 0,
        };

        let collected = collect(source, &mut detector, opts(900), cancel_rx, &tick_tx)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(collected.samples, 3);
        assert_eq!(collected.descriptor.values(), &[2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_window_is_no_face() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let source = FakeSource::new(grabs.clone(), released.clone());
        let mut detector = FakeDetector {
            calls,
            descriptor: vec![],
            respond: |_| false,
        };

        let err = collect(source, &mut detector, opts(900), cancel_rx, &tick_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoFace));
        // Camera still released on the failure path.
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_collecting_early() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let source = FakeSource::new(grabs.clone(), released.clone());
        let calls_in_task = calls.clone();
        let released_in_task = released.clone();
        let handle = tokio::spawn(async move {
            let mut detector = FakeDetector::always(calls_in_task, vec![4.0]);
            let result = collect(source, &mut detector, opts(5000), cancel_rx, &tick_tx).await;
            assert!(released_in_task.load(Ordering::SeqCst));
            result
        });

        // Cancel mid-window: ticks at 0, 200, 400 have fired by 500 ms.
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel_tx.send(true).unwrap();

        let collected = handle.await.unwrap().unwrap();
        assert_eq!(collected.samples, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dark_frames_never_reach_the_detector() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let mut source = FakeSource::new(grabs.clone(), released.clone());
        source.dark = true;
        let mut detector = FakeDetector::always(calls.clone(), vec![1.0]);

        let err = collect(source, &mut detector, opts(900), cancel_rx, &tick_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoFace));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(grabs.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_aborts_and_releases() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let mut source = FakeSource::new(grabs.clone(), released.clone());
        source.fail_after = Some(2);
        let mut detector = FakeDetector::always(calls, vec![1.0]);

        let err = collect(source, &mut detector, opts(5000), cancel_rx, &tick_tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Camera(_)));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_frames_are_discarded_before_polling() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx, tick_tx, _tick_rx) = channels();

        let source = FakeSource::new(grabs.clone(), released.clone());
        let mut detector = FakeDetector::always(calls.clone(), vec![1.0]);

        let mut options = opts(900);
        options.warmup_frames = 3;
        collect(source, &mut detector, options, cancel_rx, &tick_tx)
            .await
            .unwrap();

        // 3 warmup grabs + 5 tick grabs.
        assert_eq!(grabs.load(Ordering::SeqCst), 8);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn full_tick_channel_drops_events_without_stalling() {
        let grabs = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        // Capacity 1 and nobody draining.
        let (tick_tx, mut tick_rx) = mpsc::channel(1);

        let source = FakeSource::new(grabs, released);
        let mut detector = FakeDetector::always(calls, vec![1.0]);

        let collected = collect(source, &mut detector, opts(900), cancel_rx, &tick_tx)
            .await
            .unwrap();
        assert_eq!(collected.samples, 5);

        // Exactly one event fit; it reports the first tick.
        let event = tick_rx.try_recv().unwrap();
        assert_eq!(event.collected, 1);
        assert!(event.detection.is_some());
        assert!(tick_rx.try_recv().is_err());
    }
}
