//! Cam-capturer binary for exercising capture on a V4L2 node.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cam_capturer::{
    CameraDriver, CameraEventsHandler, CapturerConfig, CapturerObserver, OutputTarget,
    TextureCallback, TransformMatrix, V4L2Driver, VideoCapturer,
};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Capture frames from a V4L2 camera and print per-frame statistics.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Device name as reported by the driver (defaults to the first device)
    #[arg(short, long)]
    device: Option<String>,

    /// Requested frame width
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Requested frame height
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Requested frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Seconds to capture before stopping
    #[arg(short, long, default_value_t = 5)]
    seconds: u64,

    /// Switch to the next device halfway through
    #[arg(long)]
    switch: bool,

    /// Drop every second frame
    #[arg(long)]
    half_rate: bool,

    /// List devices and their formats, then exit
    #[arg(long)]
    list: bool,
}

struct PrintObserver {
    frames: AtomicU64,
}

impl CapturerObserver for PrintObserver {
    fn on_capture_started(&self, success: bool) {
        println!("Capture started: {success}");
    }

    fn on_capture_stopped(&self) {
        println!("Capture stopped after {} frames", self.frames.load(Ordering::Relaxed));
    }

    fn on_raw_frame(&self, data: &[u8], width: u32, height: u32, rotation: u32, timestamp_ns: i64) {
        let n = self.frames.fetch_add(1, Ordering::Relaxed);
        println!(
            "Frame {n}: {width}x{height} {} bytes, rotation {rotation}, ts {timestamp_ns} ns",
            data.len()
        );
    }

    fn on_texture_frame(
        &self,
        _width: u32,
        _height: u32,
        _texture_id: u32,
        _transform: &TransformMatrix,
        _rotation: u32,
        _timestamp_ns: i64,
    ) {
    }
}

struct LogEvents;

impl CameraEventsHandler for LogEvents {
    fn on_device_opening(&self, name: &str) {
        info!(name, "Opening device");
    }

    fn on_device_error(&self, message: &str) {
        error!(reason = message, "Device error");
    }

    fn on_device_closed(&self) {
        info!("Device closed");
    }

    fn on_first_frame_available(&self) {
        info!("First frame available");
    }

    fn on_switch_done(&self, front_facing: bool) {
        info!(front_facing, "Switch done");
    }

    fn on_switch_error(&self, message: &str) {
        warn!(reason = message, "Switch failed");
    }
}

/// Raw capture needs no texture.
struct NoTexture;

impl OutputTarget for NoTexture {
    fn texture_id(&self) -> u32 {
        0
    }

    fn start_listening(&self, _callback: TextureCallback) {}

    fn stop_listening(&self) {}

    fn return_texture_frame(&self) {}
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(&Args::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> cam_capturer::Result<()> {
    let driver = Arc::new(V4L2Driver::discover());

    if args.list {
        for index in 0..driver.device_count() {
            let info = driver.device_info(index)?;
            println!(
                "{index}: {} ({:?}, sensor {}°)",
                info.name, info.facing, info.sensor_orientation
            );
            for format in driver.supported_formats(index)? {
                println!("    {format}");
            }
        }
        return Ok(());
    }

    let capturer = VideoCapturer::new(
        driver,
        args.device.as_deref(),
        Some(Arc::new(LogEvents) as Arc<dyn CameraEventsHandler>),
        CapturerConfig::default(),
    )?;
    capturer.initialize(
        Arc::new(NoTexture),
        Arc::new(PrintObserver {
            frames: AtomicU64::new(0),
        }),
    )?;
    capturer.set_decimation(args.half_rate);
    capturer.start(args.width, args.height, args.fps)?;

    let run_for = Duration::from_secs(args.seconds);
    if args.switch {
        thread::sleep(run_for / 2);
        if let Err(err) = capturer.switch_device() {
            warn!(%err, "Switch request rejected");
        }
        thread::sleep(run_for / 2);
    } else {
        thread::sleep(run_for);
    }

    capturer.stop()
}
