//! Scriptable in-memory camera driver and recording collaborators for
//! testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::observer::{
    CameraEventsHandler, CapturerObserver, OutputTarget, TextureCallback, TransformMatrix,
};
use crate::traits::{
    CameraDriver, CaptureError, CaptureFormat, DeviceError, DeviceHandle, DeviceInfo, ErrorCallback,
    Facing, FourCC, FrameBuffer, FrameCallback, FrameRateRange, Result, Size,
};

/// Static description of a mock device.
#[derive(Debug, Clone)]
pub struct MockDevice {
    info: DeviceInfo,
    layouts: Vec<FourCC>,
    sizes: Vec<Size>,
    frame_rates: Vec<FrameRateRange>,
    max_zoom: u32,
    has_torch: bool,
    open_delay: Duration,
    stop_delay: Duration,
}

impl MockDevice {
    /// Create a device with the default size and frame rate tables.
    #[must_use]
    pub fn new(name: &str, facing: Facing, sensor_orientation: u32) -> Self {
        Self {
            info: DeviceInfo {
                name: name.to_owned(),
                facing,
                sensor_orientation,
            },
            layouts: vec![FourCC::YUYV],
            sizes: vec![Size::new(320, 240), Size::new(640, 480), Size::new(1280, 720)],
            frame_rates: vec![
                FrameRateRange::new(15_000, 15_000),
                FrameRateRange::new(7_000, 30_000),
                FrameRateRange::new(30_000, 30_000),
            ],
            max_zoom: 0,
            has_torch: false,
            open_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
        }
    }

    /// Back-facing device with the sensor mounted at 90 degrees.
    #[must_use]
    pub fn back(name: &str) -> Self {
        Self::new(name, Facing::Back, 90)
    }

    /// Front-facing device with the sensor mounted at 270 degrees.
    #[must_use]
    pub fn front(name: &str) -> Self {
        Self::new(name, Facing::Front, 270)
    }

    /// Offer exactly `layouts`.
    #[must_use]
    pub fn with_layouts(mut self, layouts: &[FourCC]) -> Self {
        self.layouts = layouts.to_vec();
        self
    }

    /// Support zoom up to `max`.
    #[must_use]
    pub const fn with_max_zoom(mut self, max: u32) -> Self {
        self.max_zoom = max;
        self
    }

    /// Support a torch.
    #[must_use]
    pub const fn with_torch(mut self) -> Self {
        self.has_torch = true;
        self
    }

    /// Block every open for `delay`.
    #[must_use]
    pub const fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Block every stream stop for `delay`.
    #[must_use]
    pub const fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }
}

#[derive(Default)]
struct OpenCounter {
    now: AtomicU32,
    peak: AtomicU32,
}

impl OpenCounter {
    fn acquire(&self) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn release(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock driver over a fixed list of devices.
pub struct MockDriver {
    devices: Vec<Arc<MockDeviceState>>,
    open_failures: AtomicU32,
    open_attempts: AtomicU32,
    counter: Arc<OpenCounter>,
}

impl MockDriver {
    /// Create a driver exposing `devices` at indices `0..len`.
    #[must_use]
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|config| {
                    Arc::new(MockDeviceState {
                        config,
                        inner: Mutex::new(DeviceInner::default()),
                    })
                })
                .collect(),
            open_failures: AtomicU32::new(0),
            open_attempts: AtomicU32::new(0),
            counter: Arc::new(OpenCounter::default()),
        }
    }

    /// Make the next `count` opens fail as if the device were busy.
    pub fn fail_next_opens(&self, count: u32) {
        self.open_failures.store(count, Ordering::SeqCst);
    }

    /// Opens attempted so far, successful or not.
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Devices open right now.
    pub fn open_devices(&self) -> u32 {
        self.counter.now.load(Ordering::SeqCst)
    }

    /// Highest number of devices ever open at the same time.
    pub fn peak_open_devices(&self) -> u32 {
        self.counter.peak.load(Ordering::SeqCst)
    }

    /// Runtime state of the device at `index`.
    #[allow(clippy::indexing_slicing)]
    pub fn device(&self, index: usize) -> Arc<MockDeviceState> {
        Arc::clone(&self.devices[index])
    }

    fn state(&self, index: u32) -> Result<&Arc<MockDeviceState>> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.devices.get(i))
            .ok_or_else(|| CaptureError::DeviceNotFound(index.to_string()))
    }
}

impl CameraDriver for MockDriver {
    fn device_count(&self) -> u32 {
        u32::try_from(self.devices.len()).unwrap_or(u32::MAX)
    }

    fn device_info(&self, index: u32) -> Result<DeviceInfo> {
        Ok(self.state(index)?.config.info.clone())
    }

    fn supported_formats(&self, index: u32) -> Result<Vec<CaptureFormat>> {
        let config = &self.state(index)?.config;
        let mut formats = Vec::new();
        for layout in &config.layouts {
            for size in &config.sizes {
                for rate in &config.frame_rates {
                    formats.push(CaptureFormat::new(size.width, size.height, *rate, *layout));
                }
            }
        }
        Ok(formats)
    }

    fn open(&self, index: u32) -> Result<Box<dyn DeviceHandle>> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(self.state(index)?);
        if !state.config.open_delay.is_zero() {
            thread::sleep(state.config.open_delay);
        }
        let fail = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(CaptureError::DeviceOpenFailed(format!(
                "{} is busy",
                state.config.info.name
            )));
        }

        {
            let mut inner = state.inner.lock();
            inner.open = true;
            inner.open_count += 1;
        }
        self.counter.acquire();
        Ok(Box::new(MockHandle {
            state,
            counter: Arc::clone(&self.counter),
        }))
    }
}

#[derive(Default)]
struct DeviceInner {
    open: bool,
    open_count: u32,
    streaming: bool,
    format: Option<CaptureFormat>,
    applied: Vec<CaptureFormat>,
    rate_queries: Vec<(FourCC, Size)>,
    texture: Option<u32>,
    frame_callback: Option<Arc<FrameCallback>>,
    error_callback: Option<Arc<ErrorCallback>>,
    queued: VecDeque<FrameBuffer>,
    buffers_added: usize,
    zoom: u32,
    torch: bool,
}

/// Runtime state of one mock device, shared between the driver, its open
/// handle and the test.
pub struct MockDeviceState {
    config: MockDevice,
    inner: Mutex<DeviceInner>,
}

impl MockDeviceState {
    /// Whether a handle to this device is open.
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Times this device was opened.
    pub fn open_count(&self) -> u32 {
        self.inner.lock().open_count
    }

    /// Whether the device is streaming.
    pub fn is_streaming(&self) -> bool {
        self.inner.lock().streaming
    }

    /// Every format applied, oldest first.
    pub fn applied_formats(&self) -> Vec<CaptureFormat> {
        self.inner.lock().applied.clone()
    }

    /// Layout and size of every frame rate query, oldest first.
    pub fn rate_queries(&self) -> Vec<(FourCC, Size)> {
        self.inner.lock().rate_queries.clone()
    }

    /// Texture the preview is routed to.
    pub fn preview_texture(&self) -> Option<u32> {
        self.inner.lock().texture
    }

    /// Buffers waiting to be filled.
    pub fn queued_buffers(&self) -> Vec<(crate::traits::BufferId, usize)> {
        self.inner
            .lock()
            .queued
            .iter()
            .map(|buffer| (buffer.id(), buffer.len()))
            .collect()
    }

    /// Buffers ever queued on this device.
    pub fn buffers_added(&self) -> usize {
        self.inner.lock().buffers_added
    }

    /// Current zoom level.
    pub fn zoom(&self) -> u32 {
        self.inner.lock().zoom
    }

    /// Whether the torch is on.
    pub fn torch(&self) -> bool {
        self.inner.lock().torch
    }

    /// Fill a queued buffer with color bars and hand it to the frame
    /// callback. Returns `false` when no buffer or callback is available.
    pub fn emit_frame(&self) -> bool {
        self.emit_pattern(TestPattern::ColorBars)
    }

    /// Fill a queued buffer with `pattern` and hand it to the frame callback.
    pub fn emit_pattern(&self, pattern: TestPattern) -> bool {
        let (callback, mut buffer, format) = {
            let mut inner = self.inner.lock();
            if !inner.streaming {
                return false;
            }
            let (Some(callback), Some(format)) = (inner.frame_callback.clone(), inner.format) else {
                return false;
            };
            let Some(buffer) = inner.queued.pop_front() else {
                return false;
            };
            (callback, buffer, format)
        };
        fill_pattern(buffer.data_mut(), format.width, format.height, pattern);
        (*callback)(buffer);
        true
    }

    /// Emit a frame, waiting up to `timeout` for a buffer to come back.
    pub fn emit_frame_within(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.emit_frame() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Report a runtime error through the installed callback.
    pub fn emit_error(&self, error: DeviceError) -> bool {
        let callback = self.inner.lock().error_callback.clone();
        callback.is_some_and(|callback| {
            (*callback)(error);
            true
        })
    }
}

struct MockHandle {
    state: Arc<MockDeviceState>,
    counter: Arc<OpenCounter>,
}

impl DeviceHandle for MockHandle {
    fn supported_sizes(&self, pixel_layout: FourCC) -> Result<Vec<Size>> {
        let config = &self.state.config;
        if config.layouts.contains(&pixel_layout) {
            Ok(config.sizes.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn supported_frame_rates(
        &self,
        pixel_layout: FourCC,
        size: Size,
    ) -> Result<Vec<FrameRateRange>> {
        self.state.inner.lock().rate_queries.push((pixel_layout, size));
        Ok(self.state.config.frame_rates.clone())
    }

    fn set_format(&mut self, format: &CaptureFormat) -> Result<()> {
        let mut inner = self.state.inner.lock();
        if inner.streaming {
            return Err(CaptureError::StreamError("format change while streaming".to_owned()));
        }
        inner.format = Some(*format);
        inner.applied.push(*format);
        Ok(())
    }

    fn set_preview_texture(&mut self, texture_id: u32) -> Result<()> {
        self.state.inner.lock().texture = Some(texture_id);
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        let mut inner = self.state.inner.lock();
        if inner.format.is_none() {
            return Err(CaptureError::StreamError("no format set".to_owned()));
        }
        inner.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        if !self.state.config.stop_delay.is_zero() {
            thread::sleep(self.state.config.stop_delay);
        }
        self.state.inner.lock().streaming = false;
        Ok(())
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.state.inner.lock().error_callback = Some(Arc::new(callback));
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        let mut inner = self.state.inner.lock();
        if callback.is_none() {
            inner.queued.clear();
        }
        inner.frame_callback = callback.map(Arc::new);
    }

    fn add_frame_buffer(&mut self, buffer: FrameBuffer) {
        let mut inner = self.state.inner.lock();
        inner.buffers_added += 1;
        inner.queued.push_back(buffer);
    }

    fn max_zoom(&self) -> u32 {
        self.state.config.max_zoom
    }

    fn set_zoom(&mut self, level: u32) -> Result<()> {
        self.state.inner.lock().zoom = level;
        Ok(())
    }

    fn set_torch(&mut self, on: bool) -> Result<()> {
        if !self.state.config.has_torch {
            return Err(CaptureError::NotSupported("torch"));
        }
        self.state.inner.lock().torch = on;
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut inner = self.state.inner.lock();
        inner.open = false;
        inner.streaming = false;
        inner.format = None;
        inner.frame_callback = None;
        inner.error_callback = None;
        inner.queued.clear();
        drop(inner);
        self.counter.release();
    }
}

/// Output target whose texture frames are produced on demand by the test.
pub struct MockOutputTarget {
    texture_id: u32,
    listener: Mutex<Option<Arc<TextureCallback>>>,
    returned: AtomicU32,
}

impl MockOutputTarget {
    /// Create a target owning `texture_id`.
    pub const fn new(texture_id: u32) -> Self {
        Self {
            texture_id,
            listener: Mutex::new(None),
            returned: AtomicU32::new(0),
        }
    }

    /// Whether a listener is installed.
    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Hand a texture frame to the listener.
    pub fn emit_texture_frame(&self, transform: TransformMatrix, timestamp_ns: i64) -> bool {
        let listener = self.listener.lock().clone();
        listener.is_some_and(|listener| {
            (*listener)(self.texture_id, transform, timestamp_ns);
            true
        })
    }

    /// Texture frames handed back.
    pub fn returned_frames(&self) -> u32 {
        self.returned.load(Ordering::SeqCst)
    }
}

impl OutputTarget for MockOutputTarget {
    fn texture_id(&self) -> u32 {
        self.texture_id
    }

    fn start_listening(&self, callback: TextureCallback) {
        *self.listener.lock() = Some(Arc::new(callback));
    }

    fn stop_listening(&self) {
        *self.listener.lock() = None;
    }

    fn return_texture_frame(&self) {
        self.returned.fetch_add(1, Ordering::SeqCst);
    }
}

/// Something a [`Recorder`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// `on_capture_started`.
    Started(bool),
    /// `on_capture_stopped`.
    Stopped,
    /// `on_raw_frame`.
    RawFrame {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
        /// Rotation tag.
        rotation: u32,
        /// Bytes delivered.
        len: usize,
        /// First byte of the frame.
        first_byte: Option<u8>,
    },
    /// `on_texture_frame`.
    TextureFrame {
        /// Frame width.
        width: u32,
        /// Frame height.
        height: u32,
        /// Texture the frame lives in.
        texture_id: u32,
        /// Texture transform.
        transform: TransformMatrix,
        /// Rotation tag.
        rotation: u32,
    },
    /// `on_device_opening`.
    Opening(String),
    /// `on_device_error`.
    DeviceError(String),
    /// `on_device_closed`.
    Closed,
    /// `on_first_frame_available`.
    FirstFrame,
    /// `on_switch_done`.
    SwitchDone(bool),
    /// `on_switch_error`.
    SwitchError(String),
}

/// Observer and events handler logging every call in order.
#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<Recorded>>,
    changed: Condvar,
}

impl Recorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: Recorded) {
        self.log.lock().push(event);
        self.changed.notify_all();
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    /// Occurrences of `event`.
    pub fn count(&self, event: &Recorded) -> usize {
        self.log.lock().iter().filter(|e| *e == event).count()
    }

    /// Raw frames received.
    pub fn raw_frames(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| matches!(e, Recorded::RawFrame { .. }))
            .count()
    }

    /// Wait until `predicate` holds over the log.
    pub fn wait_until<P>(&self, timeout: Duration, mut predicate: P) -> bool
    where
        P: FnMut(&[Recorded]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut log = self.log.lock();
        while !predicate(&log) {
            if self.changed.wait_until(&mut log, deadline).timed_out() {
                return predicate(&log);
            }
        }
        true
    }

    /// Wait until `event` has been recorded at least once.
    pub fn wait_for(&self, event: &Recorded, timeout: Duration) -> bool {
        self.wait_until(timeout, |log| log.contains(event))
    }
}

impl CapturerObserver for Recorder {
    fn on_capture_started(&self, success: bool) {
        self.record(Recorded::Started(success));
    }

    fn on_capture_stopped(&self) {
        self.record(Recorded::Stopped);
    }

    fn on_raw_frame(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        rotation: u32,
        _timestamp_ns: i64,
    ) {
        self.record(Recorded::RawFrame {
            width,
            height,
            rotation,
            len: data.len(),
            first_byte: data.first().copied(),
        });
    }

    fn on_texture_frame(
        &self,
        width: u32,
        height: u32,
        texture_id: u32,
        transform: &TransformMatrix,
        rotation: u32,
        _timestamp_ns: i64,
    ) {
        self.record(Recorded::TextureFrame {
            width,
            height,
            texture_id,
            transform: *transform,
            rotation,
        });
    }
}

impl CameraEventsHandler for Recorder {
    fn on_device_opening(&self, name: &str) {
        self.record(Recorded::Opening(name.to_owned()));
    }

    fn on_device_error(&self, message: &str) {
        self.record(Recorded::DeviceError(message.to_owned()));
    }

    fn on_device_closed(&self) {
        self.record(Recorded::Closed);
    }

    fn on_first_frame_available(&self) {
        self.record(Recorded::FirstFrame);
    }

    fn on_switch_done(&self, front_facing: bool) {
        self.record(Recorded::SwitchDone(front_facing));
    }

    fn on_switch_error(&self, message: &str) {
        self.record(Recorded::SwitchError(message.to_owned()));
    }
}

/// Test pattern written into emitted frames.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with the given Y, U, V values.
    Solid(u8, u8, u8),
}

/// Write `pattern` as YUYV into `data`.
pub fn fill_pattern(data: &mut [u8], width: u32, height: u32, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => fill_color_bars(data, width, height),
        TestPattern::Gradient => fill_gradient(data, width, height),
        TestPattern::Solid(y, u, v) => fill_solid(data, y, u, v),
    }
}

fn put_macropixel(data: &mut [u8], offset: usize, y: u8, u: u8, v: u8) {
    if let Some(pixel) = data.get_mut(offset..offset + 4) {
        pixel.copy_from_slice(&[y, u, y, v]);
    }
}

fn fill_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, yellow, cyan, green, magenta, red, blue, black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];
    let bar_width = (width / 8).max(1);
    for row in 0..height {
        for x in (0..width).step_by(2) {
            let (y, u, v) = BARS.get((x / bar_width) as usize).copied().unwrap_or(BARS[7]);
            put_macropixel(data, ((row * width + x) * 2) as usize, y, u, v);
        }
    }
}

fn fill_gradient(data: &mut [u8], width: u32, height: u32) {
    for row in 0..height {
        for x in (0..width).step_by(2) {
            let y = u8::try_from(x * 255 / width.max(1)).unwrap_or(u8::MAX);
            put_macropixel(data, ((row * width + x) * 2) as usize, y, 128, 128);
        }
    }
}

fn fill_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for pixel in data.chunks_exact_mut(4) {
        pixel.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_bars_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        fill_pattern(&mut data, 640, 480, TestPattern::ColorBars);
        // White bar on the left, black bar on the right.
        assert_eq!(data[0], 235);
        assert_eq!(data[639 * 2], 16);
    }

    #[test]
    fn test_gradient_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        fill_pattern(&mut data, 640, 480, TestPattern::Gradient);
        assert!(data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        assert!(data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let mut data = vec![0u8; 64 * 64 * 2];
        fill_pattern(&mut data, 64, 64, TestPattern::Solid(128, 64, 192));
        assert_eq!(&data[..4], &[128, 64, 128, 192]);
    }

    #[test]
    fn test_open_failures_are_scripted() {
        let driver = MockDriver::new(vec![MockDevice::back("back")]);
        driver.fail_next_opens(2);
        assert!(matches!(driver.open(0), Err(CaptureError::DeviceOpenFailed(_))));
        assert!(matches!(driver.open(0), Err(CaptureError::DeviceOpenFailed(_))));
        let handle = driver.open(0).expect("third open succeeds");
        assert_eq!(driver.open_attempts(), 3);
        assert_eq!(driver.open_devices(), 1);
        drop(handle);
        assert_eq!(driver.open_devices(), 0);
        assert!(!driver.device(0).is_open());
    }

    #[test]
    fn test_emit_requires_streaming_and_buffer() {
        let driver = MockDriver::new(vec![MockDevice::back("back")]);
        let mut handle = driver.open(0).expect("open");
        let device = driver.device(0);
        assert!(!device.emit_frame());

        let (tx, rx) = crossbeam_channel::unbounded();
        handle
            .set_format(&CaptureFormat::new(16, 2, FrameRateRange::fixed(30), FourCC::YUYV))
            .expect("format");
        handle.set_frame_callback(Some(Box::new(move |buffer| {
            let _ = tx.send(buffer);
        })));
        handle.start_streaming().expect("start");
        assert!(!device.emit_frame());

        let mut pool = crate::pool::FrameBufferPool::new();
        for buffer in pool.allocate(64, 1) {
            handle.add_frame_buffer(buffer);
        }
        assert!(device.emit_frame());
        let buffer = rx.recv_timeout(Duration::from_secs(1)).expect("frame");
        assert_eq!(buffer.data()[0], 235);
        assert!(!device.emit_frame());
    }
}
