//! facegate-hw — Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access behind the [`FrameSource`] trait the
//! collection loop polls.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::Frame;
