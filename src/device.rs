//! V4L2 driver backend using the v4l crate.
//!
//! Devices are `/dev/videoN` nodes discovered through sysfs. An open handle
//! streams with mmap buffers on its own thread and copies every frame into
//! the next pooled buffer queued by the capturer.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Description, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraDriver, CaptureError, CaptureFormat, DeviceError, DeviceHandle, DeviceInfo, ErrorCallback,
    Facing, FourCC, FrameBuffer, FrameCallback, FrameRateRange, Result, Size,
};

const SYSFS_VIDEO4LINUX: &str = "/sys/class/video4linux";
const MAX_VIDEO_NODES: u32 = 64;
const MMAP_BUFFER_COUNT: u32 = 4;

const V4L2_CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;
const V4L2_CID_CAMERA_ORIENTATION: u32 = 0x009a_0922;
const V4L2_CID_CAMERA_SENSOR_ROTATION: u32 = 0x009a_0923;
const V4L2_CID_FLASH_LED_MODE: u32 = 0x009c_0901;
const V4L2_FLASH_LED_MODE_NONE: i64 = 0;
const V4L2_FLASH_LED_MODE_TORCH: i64 = 2;
const V4L2_CAMERA_ORIENTATION_FRONT: i64 = 0;
const V4L2_CAMERA_ORIENTATION_BACK: i64 = 1;

fn open_failed(node: u32, err: &io::Error) -> CaptureError {
    CaptureError::DeviceOpenFailed(format!("/dev/video{node}: {err}"))
}

fn stream_error(err: &io::Error) -> CaptureError {
    CaptureError::StreamError(err.to_string())
}

fn sysfs_name(node: u32) -> Option<String> {
    let path = Path::new(SYSFS_VIDEO4LINUX).join(format!("video{node}")).join("name");
    fs::read_to_string(path).ok().map(|name| name.trim().to_owned())
}

fn control_default(controls: &[Description], id: u32) -> Option<i64> {
    controls.iter().find(|desc| desc.id == id).map(|desc| desc.default)
}

fn milli_fps(numerator: u32, denominator: u32) -> Option<u32> {
    (numerator > 0).then(|| denominator.saturating_mul(1000) / numerator)
}

/// Driver over the V4L2 capture nodes of this machine.
#[derive(Debug, Clone)]
pub struct V4L2Driver {
    nodes: Vec<u32>,
}

impl V4L2Driver {
    /// Driver over every video node listed in sysfs.
    #[must_use]
    pub fn discover() -> Self {
        let nodes: Vec<u32> = (0..MAX_VIDEO_NODES)
            .filter(|node| sysfs_name(*node).is_some())
            .collect();
        debug!(?nodes, "Discovered video nodes");
        Self { nodes }
    }

    /// Driver over the given `/dev/videoN` node numbers, in order.
    #[must_use]
    pub const fn with_nodes(nodes: Vec<u32>) -> Self {
        Self { nodes }
    }

    /// Node number behind a driver index.
    pub fn node(&self, index: u32) -> Result<u32> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.nodes.get(i))
            .copied()
            .ok_or_else(|| CaptureError::DeviceNotFound(index.to_string()))
    }

    fn open_device(&self, index: u32) -> Result<(u32, Device)> {
        let node = self.node(index)?;
        let device = Device::new(node as usize).map_err(|err| open_failed(node, &err))?;
        Ok((node, device))
    }
}

impl CameraDriver for V4L2Driver {
    fn device_count(&self) -> u32 {
        u32::try_from(self.nodes.len()).unwrap_or(u32::MAX)
    }

    fn device_info(&self, index: u32) -> Result<DeviceInfo> {
        let (node, device) = self.open_device(index)?;
        let name = match sysfs_name(node) {
            Some(name) => name,
            None => device.query_caps().map_err(|err| open_failed(node, &err))?.card,
        };
        let controls = device.query_controls().unwrap_or_default();
        let facing = match control_default(&controls, V4L2_CID_CAMERA_ORIENTATION) {
            Some(V4L2_CAMERA_ORIENTATION_FRONT) => Facing::Front,
            Some(V4L2_CAMERA_ORIENTATION_BACK) => Facing::Back,
            _ => Facing::Unknown,
        };
        let sensor_orientation = control_default(&controls, V4L2_CID_CAMERA_SENSOR_ROTATION)
            .and_then(|rotation| u32::try_from(rotation.rem_euclid(360)).ok())
            .unwrap_or(0);

        Ok(DeviceInfo {
            name,
            facing,
            sensor_orientation,
        })
    }

    fn supported_formats(&self, index: u32) -> Result<Vec<CaptureFormat>> {
        let (_, device) = self.open_device(index)?;
        let mut formats = Vec::new();
        for description in device.enum_formats().map_err(|err| stream_error(&err))? {
            let layout = FourCC::from(description.fourcc);
            for size in frame_sizes(&device, layout)? {
                for rate in frame_rates(&device, layout, size)? {
                    formats.push(CaptureFormat::new(size.width, size.height, rate, layout));
                }
            }
        }
        Ok(formats)
    }

    fn open(&self, index: u32) -> Result<Box<dyn DeviceHandle>> {
        let (node, device) = self.open_device(index)?;
        let caps = device.query_caps().map_err(|err| open_failed(node, &err))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE)
            || !caps.capabilities.contains(v4l::capability::Flags::STREAMING)
        {
            return Err(CaptureError::NotSupported("video capture streaming"));
        }
        let controls = device.query_controls().unwrap_or_default();
        info!(node, card = %caps.card, driver = %caps.driver, "V4L2 device opened");

        Ok(Box::new(V4L2Handle {
            device: Arc::new(device),
            node,
            controls,
            shared: Arc::new(StreamShared::default()),
            stream: None,
        }))
    }
}

fn frame_sizes(device: &Device, layout: FourCC) -> Result<Vec<Size>> {
    let mut sizes = Vec::new();
    for framesize in device.enum_framesizes(layout.into()).map_err(|err| stream_error(&err))? {
        match framesize.size {
            FrameSizeEnum::Discrete(size) => sizes.push(Size::new(size.width, size.height)),
            FrameSizeEnum::Stepwise(stepwise) => {
                let common = [(320, 240), (640, 480), (1280, 720), (1920, 1080)];
                sizes.extend(
                    common
                        .into_iter()
                        .filter(|&(width, height)| {
                            (stepwise.min_width..=stepwise.max_width).contains(&width)
                                && (stepwise.min_height..=stepwise.max_height).contains(&height)
                        })
                        .map(|(width, height)| Size::new(width, height)),
                );
                sizes.push(Size::new(stepwise.max_width, stepwise.max_height));
            }
        }
    }
    Ok(sizes)
}

fn frame_rates(device: &Device, layout: FourCC, size: Size) -> Result<Vec<FrameRateRange>> {
    let intervals = device
        .enum_frameintervals(layout.into(), size.width, size.height)
        .map_err(|err| stream_error(&err))?;
    let mut rates = Vec::new();
    for interval in intervals {
        match interval.interval {
            FrameIntervalEnum::Discrete(fraction) => {
                if let Some(fps) = milli_fps(fraction.numerator, fraction.denominator) {
                    rates.push(FrameRateRange::new(fps, fps));
                }
            }
            FrameIntervalEnum::Stepwise(stepwise) => {
                // The longest interval is the lowest rate.
                let min = milli_fps(stepwise.max.numerator, stepwise.max.denominator);
                let max = milli_fps(stepwise.min.numerator, stepwise.min.denominator);
                if let (Some(min), Some(max)) = (min, max) {
                    rates.push(FrameRateRange::new(min, max));
                }
            }
        }
    }
    Ok(rates)
}

/// State shared between a handle and its streaming thread.
#[derive(Default)]
struct StreamShared {
    frame_callback: Mutex<Option<Arc<FrameCallback>>>,
    error_callback: Mutex<Option<Arc<ErrorCallback>>>,
    buffers: Mutex<VecDeque<FrameBuffer>>,
}

impl StreamShared {
    fn report_error(&self, err: &io::Error) {
        let error = match err.raw_os_error() {
            // ENODEV: the device went away.
            Some(19) => DeviceError::ServerDied,
            Some(code) => DeviceError::Code(code),
            None => DeviceError::Code(-1),
        };
        let callback = self.error_callback.lock().clone();
        if let Some(callback) = callback {
            (*callback)(error);
        }
    }
}

struct StreamThread {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// An open V4L2 capture node.
pub struct V4L2Handle {
    device: Arc<Device>,
    node: u32,
    controls: Vec<Description>,
    shared: Arc<StreamShared>,
    stream: Option<StreamThread>,
}

impl V4L2Handle {
    fn control(&self, id: u32) -> Option<&Description> {
        self.controls.iter().find(|desc| desc.id == id)
    }

    fn set_control(&self, id: u32, value: i64) -> Result<()> {
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|err| stream_error(&err))
    }
}

impl DeviceHandle for V4L2Handle {
    fn supported_sizes(&self, pixel_layout: FourCC) -> Result<Vec<Size>> {
        frame_sizes(&self.device, pixel_layout)
    }

    fn supported_frame_rates(
        &self,
        pixel_layout: FourCC,
        size: Size,
    ) -> Result<Vec<FrameRateRange>> {
        let mut rates = frame_rates(&self.device, pixel_layout, size)?;
        if rates.is_empty() {
            rates.push(FrameRateRange::fixed(30));
        }
        Ok(rates)
    }

    fn set_format(&mut self, format: &CaptureFormat) -> Result<()> {
        let mut fmt = self.device.format().map_err(|err| stream_error(&err))?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.pixel_layout.into();

        let actual = self.device.set_format(&fmt).map_err(|err| stream_error(&err))?;
        if actual.width != format.width
            || actual.height != format.height
            || FourCC::from(actual.fourcc) != format.pixel_layout
        {
            return Err(CaptureError::FormatNotSupported(format!(
                "requested {format}, driver chose {}x{} {}",
                actual.width,
                actual.height,
                FourCC::from(actual.fourcc)
            )));
        }

        let fps = (format.frame_rate.max / 1000).max(1);
        if let Err(err) = self.device.set_params(&Parameters::with_fps(fps)) {
            warn!(%err, fps, "Setting frame rate failed, keeping driver default");
        }
        debug!(node = self.node, %format, "V4L2 format set");
        Ok(())
    }

    fn set_preview_texture(&mut self, _texture_id: u32) -> Result<()> {
        Err(CaptureError::NotSupported("texture output"))
    }

    fn start_streaming(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let join = thread::Builder::new()
            .name(format!("v4l2-stream-{}", self.node))
            .spawn(move || stream_loop(&device, &shared, &thread_stop, &ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stream = Some(StreamThread { stop, join });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = join.join();
                Err(stream_error(&err))
            }
            Err(_) => {
                let _ = join.join();
                Err(CaptureError::StreamError("stream thread exited".to_owned()))
            }
        }
    }

    fn stop_streaming(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        stream.stop.store(true, Ordering::Release);
        // Returns once the pending dequeue completes.
        if stream.join.join().is_err() {
            warn!(node = self.node, "V4L2 stream thread panicked");
        }
        debug!(node = self.node, "V4L2 streaming stopped");
        Ok(())
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        *self.shared.error_callback.lock() = Some(Arc::new(callback));
    }

    fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        if callback.is_none() {
            self.shared.buffers.lock().clear();
        }
        *self.shared.frame_callback.lock() = callback.map(Arc::new);
    }

    fn add_frame_buffer(&mut self, buffer: FrameBuffer) {
        self.shared.buffers.lock().push_back(buffer);
    }

    fn max_zoom(&self) -> u32 {
        self.control(V4L2_CID_ZOOM_ABSOLUTE)
            .and_then(|desc| u32::try_from(desc.maximum).ok())
            .unwrap_or(0)
    }

    fn set_zoom(&mut self, level: u32) -> Result<()> {
        if self.control(V4L2_CID_ZOOM_ABSOLUTE).is_none() {
            return Err(CaptureError::NotSupported("zoom"));
        }
        self.set_control(V4L2_CID_ZOOM_ABSOLUTE, i64::from(level))
    }

    fn set_torch(&mut self, on: bool) -> Result<()> {
        if self.control(V4L2_CID_FLASH_LED_MODE).is_none() {
            return Err(CaptureError::NotSupported("torch"));
        }
        let mode = if on {
            V4L2_FLASH_LED_MODE_TORCH
        } else {
            V4L2_FLASH_LED_MODE_NONE
        };
        self.set_control(V4L2_CID_FLASH_LED_MODE, mode)
    }
}

impl Drop for V4L2Handle {
    fn drop(&mut self) {
        let _ = self.stop_streaming();
        debug!(node = self.node, "V4L2 device closed");
    }
}

fn stream_loop(
    device: &Device,
    shared: &StreamShared,
    stop: &AtomicBool,
    ready: &crossbeam_channel::Sender<io::Result<()>>,
) {
    let mut stream = match Stream::with_buffers(device, Type::VideoCapture, MMAP_BUFFER_COUNT) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let mut starved: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        let (data, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(err) => {
                if !stop.load(Ordering::Acquire) {
                    warn!(%err, "V4L2 dequeue failed");
                    shared.report_error(&err);
                }
                break;
            }
        };

        let Some(mut buffer) = shared.buffers.lock().pop_front() else {
            starved += 1;
            trace!(sequence = meta.sequence, "No free buffer, frame dropped");
            continue;
        };
        let used = usize::try_from(meta.bytesused)
            .unwrap_or(usize::MAX)
            .min(data.len())
            .min(buffer.len());
        if let (Some(dst), Some(src)) = (buffer.data_mut().get_mut(..used), data.get(..used)) {
            dst.copy_from_slice(src);
        }

        let callback = shared.frame_callback.lock().clone();
        if let Some(callback) = callback {
            (*callback)(buffer);
        }
    }
    if starved > 0 {
        debug!(starved, "Frames dropped for lack of buffers");
    }
}
