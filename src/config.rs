//! Capturer configuration.

use std::time::Duration;

use crate::pool::NUMBER_OF_CAPTURE_BUFFERS;
use crate::state::RetryPolicy;
use crate::traits::FourCC;

/// How long `stop` waits for the worker to finish teardown.
pub const CAMERA_STOP_TIMEOUT: Duration = Duration::from_millis(7000);

/// Tunables for a [`VideoCapturer`](crate::VideoCapturer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturerConfig {
    /// Raw buffers cycled through the device.
    pub buffer_count: usize,
    /// Open retry policy.
    pub retry: RetryPolicy,
    /// Bound on how long `stop` blocks.
    pub stop_timeout: Duration,
    /// Deliver frames as textures of the output target instead of raw bytes.
    pub capture_to_texture: bool,
    /// Pixel layout requested for raw frames.
    pub pixel_layout: FourCC,
    /// Name of the worker thread.
    pub worker_name: String,
}

impl Default for CapturerConfig {
    fn default() -> Self {
        Self {
            buffer_count: NUMBER_OF_CAPTURE_BUFFERS,
            retry: RetryPolicy::default(),
            stop_timeout: CAMERA_STOP_TIMEOUT,
            capture_to_texture: false,
            pixel_layout: FourCC::YUYV,
            worker_name: "capture-worker".to_owned(),
        }
    }
}

impl CapturerConfig {
    /// Set the number of raw buffers.
    #[must_use]
    pub fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count.max(1);
        self
    }

    /// Set the open retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the stop timeout.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Deliver texture frames instead of raw frames.
    #[must_use]
    pub const fn with_texture_capture(mut self, enabled: bool) -> Self {
        self.capture_to_texture = enabled;
        self
    }

    /// Set the raw pixel layout.
    #[must_use]
    pub const fn with_pixel_layout(mut self, layout: FourCC) -> Self {
        self.pixel_layout = layout;
        self
    }

    /// Set the worker thread name.
    #[must_use]
    pub fn with_worker_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.worker_name);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CapturerConfig::default();
        assert_eq!(config.buffer_count, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(500));
        assert_eq!(config.stop_timeout, Duration::from_secs(7));
        assert!(!config.capture_to_texture);
        assert_eq!(config.pixel_layout, FourCC::YUYV);
    }

    #[test]
    fn test_builders() {
        let config = CapturerConfig::default()
            .with_buffer_count(0)
            .with_stop_timeout(Duration::from_millis(100))
            .with_texture_capture(true)
            .with_worker_name("cam");
        assert_eq!(config.buffer_count, 1);
        assert_eq!(config.stop_timeout, Duration::from_millis(100));
        assert!(config.capture_to_texture);
        assert_eq!(config.worker_name, "cam");
    }
}
