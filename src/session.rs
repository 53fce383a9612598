//! Open device session: handle, identity, negotiated format and device
//! parameters.

use tracing::{debug, info, warn};

use crate::traits::{
    CameraDriver, CaptureError, CaptureFormat, DeviceHandle, DeviceIdentity, ErrorCallback, FourCC,
    FrameBuffer, FrameCallback, FrameRateRange, Result, Size,
};

// Frame rate penalties, in milli-fps. Ranges with a low minimum are
// preferred (they let the device lower the rate in dim light) as long as the
// maximum stays close to the requested rate.
const MAX_FPS_DIFF_THRESHOLD: u32 = 5000;
const MAX_FPS_LOW_DIFF_WEIGHT: u32 = 1;
const MAX_FPS_HIGH_DIFF_WEIGHT: u32 = 3;
const MIN_FPS_THRESHOLD: u32 = 8000;
const MIN_FPS_LOW_VALUE_WEIGHT: u32 = 1;
const MIN_FPS_HIGH_VALUE_WEIGHT: u32 = 4;

const fn progressive_penalty(value: u32, threshold: u32, low_weight: u32, high_weight: u32) -> u32 {
    if value < threshold {
        value * low_weight
    } else {
        threshold * low_weight + (value - threshold) * high_weight
    }
}

/// Pick the supported range closest to `fps` frames per second.
#[must_use]
pub fn closest_supported_frame_rate(
    supported: &[FrameRateRange],
    fps: u32,
) -> Option<FrameRateRange> {
    let requested = fps.saturating_mul(1000);
    supported.iter().copied().min_by_key(|range| {
        let min_penalty = progressive_penalty(
            range.min,
            MIN_FPS_THRESHOLD,
            MIN_FPS_LOW_VALUE_WEIGHT,
            MIN_FPS_HIGH_VALUE_WEIGHT,
        );
        let max_penalty = progressive_penalty(
            requested.abs_diff(range.max),
            MAX_FPS_DIFF_THRESHOLD,
            MAX_FPS_LOW_DIFF_WEIGHT,
            MAX_FPS_HIGH_DIFF_WEIGHT,
        );
        min_penalty.saturating_add(max_penalty)
    })
}

/// Pick the supported size minimizing `|dw| + |dh|`.
#[must_use]
pub fn closest_supported_size(supported: &[Size], width: u32, height: u32) -> Option<Size> {
    supported
        .iter()
        .copied()
        .min_by_key(|size| size.width.abs_diff(width) + size.height.abs_diff(height))
}

/// An open device and its negotiated state.
pub struct DeviceSession {
    handle: Box<dyn DeviceHandle>,
    identity: DeviceIdentity,
    format: Option<CaptureFormat>,
    streaming: bool,
    zoom: u32,
    torch: bool,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity)
            .field("format", &self.format)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Open the device at `index`.
    pub fn open(driver: &dyn CameraDriver, index: u32) -> Result<Self> {
        let info = driver.device_info(index)?;
        let handle = driver.open(index)?;
        let identity = DeviceIdentity::from_info(index, info);

        info!(
            index,
            name = %identity.name,
            facing = ?identity.facing,
            sensor_orientation = identity.sensor_orientation,
            "Device opened"
        );

        Ok(Self {
            handle,
            identity,
            format: None,
            streaming: false,
            zoom: 0,
            torch: false,
        })
    }

    /// Identity of the open device.
    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Negotiated format, once streaming has been configured.
    #[must_use]
    pub const fn format(&self) -> Option<&CaptureFormat> {
        self.format.as_ref()
    }

    /// Whether the device is streaming.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Closest format the device supports for the request.
    pub fn negotiate(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        pixel_layout: FourCC,
    ) -> Result<CaptureFormat> {
        let sizes = self.handle.supported_sizes(pixel_layout)?;
        debug!(?sizes, %pixel_layout, "Available preview sizes");
        let size = closest_supported_size(&sizes, width, height).ok_or_else(|| {
            CaptureError::FormatNotSupported(format!(
                "no {pixel_layout} preview size near {width}x{height}"
            ))
        })?;

        let rates = self.handle.supported_frame_rates(pixel_layout, size)?;
        debug!(?rates, "Available frame rate ranges");
        let frame_rate = closest_supported_frame_rate(&rates, fps).ok_or_else(|| {
            CaptureError::FormatNotSupported(format!("no frame rate near {fps} fps"))
        })?;

        Ok(CaptureFormat::new(size.width, size.height, frame_rate, pixel_layout))
    }

    /// Stop streaming (if running), drop queued buffers and apply `format`.
    pub fn reconfigure(&mut self, format: CaptureFormat) -> Result<()> {
        if self.format.is_some() {
            self.stop_streaming()?;
            self.handle.set_frame_callback(None);
        }
        self.handle.set_format(&format)?;
        info!(%format, "Capture format applied");
        self.format = Some(format);
        Ok(())
    }

    /// Route preview output to a texture.
    pub fn set_preview_texture(&mut self, texture_id: u32) -> Result<()> {
        self.handle.set_preview_texture(texture_id)
    }

    /// Install the runtime error callback.
    pub fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.handle.set_error_callback(callback);
    }

    /// Install the frame callback.
    pub fn set_frame_callback(&mut self, callback: FrameCallback) {
        self.handle.set_frame_callback(Some(callback));
    }

    /// Queue a buffer for the device to fill.
    pub fn queue_buffer(&mut self, buffer: FrameBuffer) {
        self.handle.add_frame_buffer(buffer);
    }

    /// Start streaming.
    pub fn start_streaming(&mut self) -> Result<()> {
        self.handle.start_streaming()?;
        self.streaming = true;
        Ok(())
    }

    /// Stop streaming. No-op when not streaming.
    pub fn stop_streaming(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.handle.stop_streaming()
    }

    /// Set the zoom level, clamped to the device maximum. Returns the level applied.
    pub fn set_zoom(&mut self, level: u32) -> Result<u32> {
        let max = self.handle.max_zoom();
        if max == 0 {
            return Err(CaptureError::NotSupported("zoom"));
        }
        let level = level.min(max);
        self.handle.set_zoom(level)?;
        self.zoom = level;
        Ok(level)
    }

    /// Current zoom level.
    #[must_use]
    pub const fn zoom(&self) -> u32 {
        self.zoom
    }

    /// Switch the torch.
    pub fn set_torch(&mut self, on: bool) -> Result<()> {
        self.handle.set_torch(on)?;
        self.torch = on;
        Ok(())
    }

    /// Whether the torch is on.
    #[must_use]
    pub const fn torch(&self) -> bool {
        self.torch
    }

    /// Stop streaming and close the device.
    pub fn release(mut self) {
        if let Err(err) = self.stop_streaming() {
            warn!(%err, "Stopping stream during release failed");
        }
        self.handle.set_frame_callback(None);
        info!(index = self.identity.index, "Device released");
    }
}
