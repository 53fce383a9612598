//! Collaborator seams: frame consumers, lifecycle events, output target and
//! display rotation.

/// 4x4 column-major texture transform.
pub type TransformMatrix = [f32; 16];

/// Callback an output target invokes when a texture frame is ready:
/// `(texture_id, transform, timestamp_ns)`.
pub type TextureCallback = Box<dyn Fn(u32, TransformMatrix, i64) + Send + Sync>;

/// Consumer of captured frames.
pub trait CapturerObserver: Send + Sync {
    /// Capture start finished, successfully or not.
    fn on_capture_started(&self, success: bool);

    /// Capture stopped.
    fn on_capture_stopped(&self);

    /// A raw frame. `data` is only valid for the duration of the call.
    fn on_raw_frame(&self, data: &[u8], width: u32, height: u32, rotation: u32, timestamp_ns: i64);

    /// A frame rendered into a texture of the output target.
    fn on_texture_frame(
        &self,
        width: u32,
        height: u32,
        texture_id: u32,
        transform: &TransformMatrix,
        rotation: u32,
        timestamp_ns: i64,
    );
}

/// Lifecycle and error events. Every method defaults to a no-op.
pub trait CameraEventsHandler: Send + Sync {
    /// A device is about to be opened.
    fn on_device_opening(&self, _name: &str) {}

    /// A device or capture error occurred.
    fn on_device_error(&self, _message: &str) {}

    /// The device was released.
    fn on_device_closed(&self) {}

    /// The first frame after a start reached the delivery gate.
    fn on_first_frame_available(&self) {}

    /// A device switch completed.
    fn on_switch_done(&self, _front_facing: bool) {}

    /// A device switch was rejected or failed.
    fn on_switch_error(&self, _message: &str) {}
}

/// Surface/texture provider frames are rendered into.
pub trait OutputTarget: Send + Sync {
    /// Texture the device previews into.
    fn texture_id(&self) -> u32;

    /// Begin forwarding texture frames to `callback`.
    fn start_listening(&self, callback: TextureCallback);

    /// Stop forwarding texture frames.
    fn stop_listening(&self);

    /// Release the texture frame most recently delivered.
    fn return_texture_frame(&self);
}

/// Accessor for the current display rotation in degrees (0, 90, 180, 270).
pub trait RotationProvider: Send + Sync {
    /// Current display rotation.
    fn display_rotation(&self) -> u32;
}

impl<F> RotationProvider for F
where
    F: Fn() -> u32 + Send + Sync,
{
    fn display_rotation(&self) -> u32 {
        self()
    }
}
