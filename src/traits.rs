//! Core types and the driver seam for capture devices.

use crate::state::CaptureState;

/// Pixel format representation (e.g., YUYV, NV21, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// NV21 pixel format (4:2:0 semi-planar).
    pub const NV21: Self = Self::new(b"NV21");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");

    /// Bits used per pixel when sizing raw frame buffers.
    ///
    /// Compressed layouts are sized like YUYV, which bounds any MJPEG frame
    /// a driver will hand back for the same resolution.
    #[must_use]
    pub const fn bits_per_pixel(self) -> u32 {
        match &self.0 {
            b"NV21" | b"NV12" | b"YU12" | b"YV12" => 12,
            b"RGB3" | b"BGR3" => 24,
            _ => 16,
        }
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// A preview size supported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Frame rate bounds in milli-frames-per-second (30 fps is `30_000`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRateRange {
    /// Lower bound.
    pub min: u32,
    /// Upper bound.
    pub max: u32,
}

impl FrameRateRange {
    /// Create a range from milli-fps bounds.
    #[must_use]
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// A fixed range pinned to `fps` frames per second.
    #[must_use]
    pub const fn fixed(fps: u32) -> Self {
        Self::new(fps * 1000, fps * 1000)
    }
}

/// A negotiated capture format.
///
/// Never mutated once negotiated; reconfiguration replaces it wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frame rate range the device was configured with.
    pub frame_rate: FrameRateRange,
    /// Pixel layout of raw frames.
    pub pixel_layout: FourCC,
}

impl CaptureFormat {
    /// Create a new capture format.
    #[must_use]
    pub const fn new(
        width: u32,
        height: u32,
        frame_rate: FrameRateRange,
        pixel_layout: FourCC,
    ) -> Self {
        Self {
            width,
            height,
            frame_rate,
            pixel_layout,
        }
    }

    /// Size in bytes of one raw frame in this format.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        let bits = self.width as usize
            * self.height as usize
            * self.pixel_layout.bits_per_pixel() as usize;
        bits / 8
    }
}

impl std::fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@[{}:{}] {}",
            self.width, self.height, self.frame_rate.min, self.frame_rate.max, self.pixel_layout
        )
    }
}

/// Which way a device points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    /// Towards the user.
    Front,
    /// Away from the user.
    Back,
    /// Not reported by the driver.
    #[default]
    Unknown,
}

/// Static information a driver reports for a device index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Facing of the device.
    pub facing: Facing,
    /// Clockwise rotation of the sensor image in degrees.
    pub sensor_orientation: u32,
}

/// Identity of the device behind an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Driver index of the device.
    pub index: u32,
    /// Human-readable device name.
    pub name: String,
    /// Facing of the device.
    pub facing: Facing,
    /// Clockwise rotation of the sensor image in degrees.
    pub sensor_orientation: u32,
}

impl DeviceIdentity {
    /// Build an identity from driver info.
    #[must_use]
    pub fn from_info(index: u32, info: DeviceInfo) -> Self {
        Self {
            index,
            name: info.name,
            facing: info.facing,
            sensor_orientation: info.sensor_orientation,
        }
    }

    /// Whether the device points towards the user.
    #[must_use]
    pub fn is_front_facing(&self) -> bool {
        self.facing == Facing::Front
    }
}

/// Identifies a buffer issued by the frame buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    /// Pool allocation round the buffer belongs to.
    pub generation: u32,
    /// Slot within that round.
    pub slot: u32,
}

/// A fixed-size raw frame buffer cycled between pool, driver and consumer.
#[derive(Debug)]
pub struct FrameBuffer {
    id: BufferId,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub(crate) fn new(id: BufferId, size: usize) -> Self {
        Self {
            id,
            data: vec![0u8; size],
        }
    }

    /// Identity of this buffer.
    #[must_use]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Frame bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable frame bytes, for drivers filling the buffer.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Capacity of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has zero capacity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Asynchronous runtime error reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// The camera service or driver went away.
    ServerDied,
    /// Driver-specific error code.
    Code(i32),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerDied => write!(f, "Camera server died!"),
            Self::Code(code) => write!(f, "Camera error: {code}"),
        }
    }
}

/// Error type for capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// `start` or another operation was called before `initialize`.
    #[error("capturer is not initialized")]
    NotInitialized,
    /// `initialize` was called twice.
    #[error("capturer is already initialized")]
    AlreadyInitialized,
    /// A worker-confined operation ran on another thread.
    #[error("wrong thread: operation must run on the capture worker")]
    WrongThread,
    /// The state machine refused a transition.
    #[error("illegal state transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// State before the attempted transition.
        from: CaptureState,
        /// Requested state.
        to: CaptureState,
    },
    /// The driver reports no devices at all.
    #[error("no capture devices available")]
    NoDevices,
    /// Device with given index or name was not found.
    #[error("device {0} not found")]
    DeviceNotFound(String),
    /// Failed to open device.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("format not supported: {0}")]
    FormatNotSupported(String),
    /// Error while configuring or running a stream.
    #[error("stream error: {0}")]
    StreamError(String),
    /// Device does not implement an optional control.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),
    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
    /// A device switch is already queued.
    #[error("pending camera switch already in progress")]
    SwitchInProgress,
    /// Only one device exists.
    #[error("no camera to switch to")]
    NoDeviceToSwitchTo,
    /// The capturer is not running, so the request was not queued.
    #[error("camera is stopped")]
    Stopped,
    /// External frames cannot be pushed while device frames reach the primary observer.
    #[error("primary delivery is active; disable it before pushing external frames")]
    PrimaryDeliveryActive,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Callback a device invokes with each filled buffer.
pub type FrameCallback = Box<dyn Fn(FrameBuffer) + Send + Sync>;

/// Callback a device invokes on asynchronous runtime errors.
pub type ErrorCallback = Box<dyn Fn(DeviceError) + Send + Sync>;

/// Device enumeration and opening.
///
/// Shared between caller threads (queries) and the capture worker (open).
pub trait CameraDriver: Send + Sync {
    /// Number of devices currently present.
    fn device_count(&self) -> u32;

    /// Static information for a device.
    fn device_info(&self, index: u32) -> Result<DeviceInfo>;

    /// Human-readable name for a device.
    fn device_name(&self, index: u32) -> Result<String> {
        self.device_info(index).map(|info| info.name)
    }

    /// Formats a device can capture in.
    fn supported_formats(&self, index: u32) -> Result<Vec<CaptureFormat>>;

    /// Open a device. Recoverable failures are reported as `DeviceOpenFailed`.
    fn open(&self, index: u32) -> Result<Box<dyn DeviceHandle>>;
}

/// An open device. Only ever touched from the capture worker.
pub trait DeviceHandle: Send {
    /// Preview sizes the device supports for `pixel_layout`.
    fn supported_sizes(&self, pixel_layout: FourCC) -> Result<Vec<Size>>;

    /// Frame rate ranges the device supports at `size` in `pixel_layout`.
    fn supported_frame_rates(
        &self,
        pixel_layout: FourCC,
        size: Size,
    ) -> Result<Vec<FrameRateRange>>;

    /// Apply a format. Streaming must be stopped.
    fn set_format(&mut self, format: &CaptureFormat) -> Result<()>;

    /// Route preview output to a texture of the output target.
    fn set_preview_texture(&mut self, texture_id: u32) -> Result<()>;

    /// Start producing frames.
    fn start_streaming(&mut self) -> Result<()>;

    /// Stop producing frames.
    fn stop_streaming(&mut self) -> Result<()>;

    /// Install the runtime error callback.
    fn set_error_callback(&mut self, callback: ErrorCallback);

    /// Install the frame callback. `None` drops every queued buffer.
    fn set_frame_callback(&mut self, callback: Option<FrameCallback>);

    /// Queue a buffer for the device to fill.
    fn add_frame_buffer(&mut self, buffer: FrameBuffer);

    /// Highest zoom level, 0 when zoom is unsupported.
    fn max_zoom(&self) -> u32 {
        0
    }

    /// Set the zoom level.
    fn set_zoom(&mut self, _level: u32) -> Result<()> {
        Err(CaptureError::NotSupported("zoom"))
    }

    /// Switch the torch on or off.
    fn set_torch(&mut self, _on: bool) -> Result<()> {
        Err(CaptureError::NotSupported("torch"))
    }
}
