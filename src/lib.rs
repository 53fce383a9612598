//! Cam-Capturer: a thread-confined video capture controller.
//!
//! A [`VideoCapturer`] drives one camera device at a time from a dedicated
//! worker thread: open with bounded retries, format negotiation, a fixed pool
//! of raw frame buffers, device switching, and bounded-time stop. Frames are
//! tagged with rotation and a monotonic timestamp before reaching the
//! registered observers. Devices are reached through the [`CameraDriver`]
//! trait; [`V4L2Driver`] implements it for Linux video nodes.

pub mod capturer;
pub mod config;
pub mod delivery;
pub mod device;
pub mod observer;
pub mod pool;
pub mod session;
pub mod state;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use capturer::VideoCapturer;
pub use config::CapturerConfig;
pub use device::V4L2Driver;
pub use observer::{
    CameraEventsHandler, CapturerObserver, OutputTarget, RotationProvider, TextureCallback,
    TransformMatrix,
};
pub use state::{CaptureState, RetryPolicy};
pub use traits::{
    CameraDriver, CaptureError, CaptureFormat, DeviceError, DeviceHandle, DeviceInfo, Facing,
    FourCC, FrameRateRange, Result, Size,
};
