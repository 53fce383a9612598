//! Frame delivery gate: orientation, timestamps, first-frame signal,
//! decimation and fan-out to consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::RwLock;
use tracing::debug;

use crate::observer::{CameraEventsHandler, CapturerObserver, RotationProvider, TransformMatrix};
use crate::traits::{CaptureFormat, DeviceIdentity, Facing};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic timestamp in nanoseconds since the first call in this process.
#[must_use]
pub fn monotonic_now_ns() -> i64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Rotation to tag a frame with, in degrees.
///
/// The display rotation is inverted for back-facing devices before being
/// added to the sensor orientation. A combined rotation of 180 is reported
/// as 0 because some consumers render a 180 tag incorrectly.
#[must_use]
pub const fn frame_orientation(
    sensor_orientation: u32,
    display_rotation: u32,
    facing: Facing,
) -> u32 {
    let mut rotation = display_rotation % 360;
    if matches!(facing, Facing::Back) {
        rotation = (360 - rotation) % 360;
    }
    let combined = (sensor_orientation % 360 + rotation) % 360;
    if combined == 180 {
        0
    } else {
        combined
    }
}

/// Identity transform.
pub const IDENTITY_MATRIX: TransformMatrix = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Mirror around the vertical center line in texture coordinates.
pub const HORIZONTAL_FLIP_MATRIX: TransformMatrix = [
    -1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    1.0, 0.0, 0.0, 1.0,
];

/// `a * b` for column-major 4x4 matrices.
#[must_use]
#[allow(clippy::indexing_slicing)]
pub fn multiply_matrices(a: &TransformMatrix, b: &TransformMatrix) -> TransformMatrix {
    std::array::from_fn(|i| {
        let (col, row) = (i / 4, i % 4);
        (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum()
    })
}

/// Routing switches shared between caller threads and the worker.
pub struct DeliveryRouting {
    auxiliary: RwLock<Option<Arc<dyn CapturerObserver>>>,
    primary_enabled: AtomicBool,
    decimate: AtomicBool,
}

impl Default for DeliveryRouting {
    fn default() -> Self {
        Self {
            auxiliary: RwLock::new(None),
            primary_enabled: AtomicBool::new(true),
            decimate: AtomicBool::new(false),
        }
    }
}

impl DeliveryRouting {
    /// Set or clear the auxiliary observer.
    pub fn set_auxiliary(&self, observer: Option<Arc<dyn CapturerObserver>>) {
        *self.auxiliary.write() = observer;
    }

    /// Current auxiliary observer.
    #[must_use]
    pub fn auxiliary(&self) -> Option<Arc<dyn CapturerObserver>> {
        self.auxiliary.read().clone()
    }

    /// Whether device frames reach the primary observer.
    #[must_use]
    pub fn primary_enabled(&self) -> bool {
        self.primary_enabled.load(Ordering::Acquire)
    }

    /// Enable or disable delivery of device frames to the primary observer.
    pub fn set_primary_enabled(&self, enabled: bool) {
        self.primary_enabled.store(enabled, Ordering::Release);
    }

    /// Whether every second frame is dropped.
    #[must_use]
    pub fn decimate(&self) -> bool {
        self.decimate.load(Ordering::Acquire)
    }

    /// Enable or disable decimation.
    pub fn set_decimate(&self, enabled: bool) {
        self.decimate.store(enabled, Ordering::Release);
    }
}

/// Outcome of offering a raw frame to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Forwarded to the consumers.
    Delivered,
    /// Dropped by decimation.
    Dropped,
}

/// Forwards produced frames to the registered consumers. Lives on the worker.
pub struct FrameDeliveryGate {
    primary: Arc<dyn CapturerObserver>,
    routing: Arc<DeliveryRouting>,
    events: Option<Arc<dyn CameraEventsHandler>>,
    rotation: Arc<dyn RotationProvider>,
    first_frame_reported: bool,
    decimation_counter: u64,
    delivered: u64,
    dropped: u64,
}

impl FrameDeliveryGate {
    /// Create a gate delivering to `primary`.
    pub fn new(
        primary: Arc<dyn CapturerObserver>,
        routing: Arc<DeliveryRouting>,
        events: Option<Arc<dyn CameraEventsHandler>>,
        rotation: Arc<dyn RotationProvider>,
    ) -> Self {
        Self {
            primary,
            routing,
            events,
            rotation,
            first_frame_reported: false,
            decimation_counter: 0,
            delivered: 0,
            dropped: 0,
        }
    }

    /// Re-arm the first-frame signal and restart decimation. Called on every
    /// (re)open.
    pub fn reset(&mut self) {
        if self.delivered > 0 || self.dropped > 0 {
            debug!(delivered = self.delivered, dropped = self.dropped, "Frame delivery totals");
        }
        self.first_frame_reported = false;
        self.decimation_counter = 0;
        self.delivered = 0;
        self.dropped = 0;
    }

    fn report_first_frame(&mut self) {
        if self.first_frame_reported {
            return;
        }
        self.first_frame_reported = true;
        debug!("First frame available");
        if let Some(events) = &self.events {
            events.on_first_frame_available();
        }
    }

    fn orientation(&self, identity: &DeviceIdentity) -> u32 {
        frame_orientation(
            identity.sensor_orientation,
            self.rotation.display_rotation(),
            identity.facing,
        )
    }

    /// Offer a raw frame. On `Dropped` nothing was delivered.
    pub fn deliver_raw(
        &mut self,
        data: &[u8],
        format: &CaptureFormat,
        identity: &DeviceIdentity,
    ) -> Delivery {
        self.report_first_frame();

        if self.routing.decimate() {
            self.decimation_counter += 1;
            if self.decimation_counter % 2 == 0 {
                self.dropped += 1;
                return Delivery::Dropped;
            }
        }

        let timestamp_ns = monotonic_now_ns();
        let rotation = self.orientation(identity);

        if let Some(auxiliary) = self.routing.auxiliary() {
            auxiliary.on_raw_frame(data, format.width, format.height, rotation, timestamp_ns);
        }
        if self.routing.primary_enabled() {
            self.primary
                .on_raw_frame(data, format.width, format.height, rotation, timestamp_ns);
        }
        self.delivered += 1;
        Delivery::Delivered
    }

    /// Forward a texture frame, undoing the platform mirroring for
    /// front-facing devices.
    pub fn deliver_texture(
        &mut self,
        format: &CaptureFormat,
        identity: &DeviceIdentity,
        texture_id: u32,
        transform: &TransformMatrix,
        timestamp_ns: i64,
    ) {
        self.report_first_frame();

        let rotation = self.orientation(identity);
        let transform = if identity.is_front_facing() {
            multiply_matrices(transform, &HORIZONTAL_FLIP_MATRIX)
        } else {
            *transform
        };
        self.primary.on_texture_frame(
            format.width,
            format.height,
            texture_id,
            &transform,
            rotation,
            timestamp_ns,
        );
        self.delivered += 1;
    }

    /// Frames delivered and dropped since the last reset.
    #[must_use]
    pub const fn totals(&self) -> (u64, u64) {
        (self.delivered, self.dropped)
    }
}
