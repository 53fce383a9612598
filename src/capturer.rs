//! Thread-safe capturer façade and the worker-confined capture core.
//!
//! [`VideoCapturer`] is callable from any thread. Apart from a few fast-path
//! flags it only posts tasks onto its capture worker, where the capture core
//! owns the state machine, the device session, the buffer pool and the
//! delivery gate.

use std::sync::{Arc, OnceLock, Weak};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::CapturerConfig;
use crate::delivery::{Delivery, DeliveryRouting, FrameDeliveryGate};
use crate::observer::{
    CameraEventsHandler, CapturerObserver, OutputTarget, RotationProvider, TextureCallback,
    TransformMatrix,
};
use crate::pool::FrameBufferPool;
use crate::session::DeviceSession;
use crate::state::{CaptureState, OpenRetry, StateMachine};
use crate::traits::{
    CameraDriver, CaptureError, CaptureFormat, DeviceError, DeviceIdentity, Facing, FrameBuffer,
    FrameCallback, Result,
};
use crate::worker::{CaptureWorker, Scheduler, WorkerHandle};

const START_FAILED: &str = "Camera can not be started.";
const POST_FAILED: &str = "Could not post task to camera thread.";
const STOP_TIMEOUT: &str = "Camera stop timeout";
const CAMERA_STOPPED: &str = "Camera is stopped.";
const NO_CAMERA_TO_SWITCH: &str = "No camera to switch to.";
const SWITCH_PENDING: &str = "Pending camera switch already in progress.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FormatRequest {
    width: u32,
    height: u32,
    fps: u32,
}

/// State readable from both caller threads and the worker.
struct Shared {
    driver: Arc<dyn CameraDriver>,
    events: Option<Arc<dyn CameraEventsHandler>>,
    config: CapturerConfig,
    routing: Arc<DeliveryRouting>,
    device_index: Mutex<u32>,
    active_device: Mutex<Option<DeviceIdentity>>,
    pending_switch: Mutex<bool>,
}

impl Shared {
    fn report_error(&self, message: &str) {
        if let Some(events) = &self.events {
            events.on_device_error(message);
        }
    }

    fn report_switch_error(&self, message: &str) {
        if let Some(events) = &self.events {
            events.on_switch_error(message);
        }
    }
}

/// Clears the pending-switch flag and reports the outcome when dropped, so a
/// switch task that is purged or refused still releases the flag.
struct PendingSwitch {
    shared: Arc<Shared>,
    outcome: Option<std::result::Result<bool, String>>,
}

impl PendingSwitch {
    fn complete(mut self, outcome: std::result::Result<bool, String>) {
        self.outcome = Some(outcome);
    }
}

impl Drop for PendingSwitch {
    fn drop(&mut self) {
        *self.shared.pending_switch.lock() = false;
        match self.outcome.take() {
            Some(Ok(front_facing)) => {
                info!(front_facing, "Device switch done");
                if let Some(events) = &self.shared.events {
                    events.on_switch_done(front_facing);
                }
            }
            Some(Err(message)) => {
                warn!(reason = %message, "Device switch failed");
                self.shared.report_switch_error(&message);
            }
            None => self.shared.report_switch_error(CAMERA_STOPPED),
        }
    }
}

/// Travels with a posted start task. If the task is refused or purged before
/// it runs, the start is reported as failed and the running flag cleared.
struct PendingStart {
    shared: Arc<Shared>,
    observer: Arc<dyn CapturerObserver>,
    worker: WorkerHandle<CaptureCore>,
    armed: bool,
}

impl PendingStart {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Start task dropped before it ran");
        self.worker.mark_stopped();
        self.observer.on_capture_started(false);
        self.shared.report_error(POST_FAILED);
    }
}

/// A texture frame on its way to the worker. Handed back to the output
/// target unless it was delivered.
struct PendingTexture {
    target: Weak<dyn OutputTarget>,
    delivered: bool,
}

impl Drop for PendingTexture {
    fn drop(&mut self) {
        if self.delivered {
            return;
        }
        if let Some(target) = self.target.upgrade() {
            target.return_texture_frame();
        }
    }
}

/// Everything the capture worker owns.
struct CaptureCore {
    worker: WorkerHandle<CaptureCore>,
    shared: Arc<Shared>,
    observer: Arc<dyn CapturerObserver>,
    target: Arc<dyn OutputTarget>,
    machine: StateMachine,
    session: Option<DeviceSession>,
    pool: FrameBufferPool,
    gate: FrameDeliveryGate,
    requested: Option<FormatRequest>,
}

impl CaptureCore {
    fn new(
        worker: WorkerHandle<Self>,
        shared: Arc<Shared>,
        observer: Arc<dyn CapturerObserver>,
        target: Arc<dyn OutputTarget>,
        rotation: Arc<dyn RotationProvider>,
    ) -> Self {
        let gate = FrameDeliveryGate::new(
            Arc::clone(&observer),
            Arc::clone(&shared.routing),
            shared.events.clone(),
            rotation,
        );
        Self {
            worker,
            machine: StateMachine::new(shared.config.retry),
            shared,
            observer,
            target,
            session: None,
            pool: FrameBufferPool::new(),
            gate,
            requested: None,
        }
    }

    fn start_capture(&mut self, request: FormatRequest, scheduler: &mut Scheduler<Self>) {
        if self.worker.check_on_worker().is_err() {
            return;
        }
        if self.session.is_some() || self.machine.state() != CaptureState::Idle {
            error!(state = ?self.machine.state(), "Capture already started");
            return;
        }
        if self.machine.transition(CaptureState::Opening { attempt: 1 }).is_err() {
            return;
        }
        self.requested = Some(request);
        self.open_current(scheduler);
    }

    /// One open attempt for the current device index. State must be `Opening`.
    fn open_current(&mut self, scheduler: &mut Scheduler<Self>) {
        if !self.worker.is_running() {
            debug!("Open skipped, capture is stopped");
            return;
        }
        let (Some(request), CaptureState::Opening { attempt }) =
            (self.requested, self.machine.state())
        else {
            return;
        };
        let index = *self.shared.device_index.lock();

        if attempt == 1 {
            let name = self
                .shared
                .driver
                .device_name(index)
                .unwrap_or_else(|_| format!("device {index}"));
            if let Some(events) = &self.shared.events {
                events.on_device_opening(&name);
            }
        }
        info!(index, attempt, "Opening capture device");

        match DeviceSession::open(self.shared.driver.as_ref(), index) {
            Ok(session) => {
                *self.shared.active_device.lock() = Some(session.identity().clone());
                self.session = Some(session);
                self.gate.reset();
                match self.prepare_session().and_then(|()| self.start_preview(request)) {
                    Ok(()) => {
                        if self.machine.transition(CaptureState::Running).is_ok() {
                            self.observer.on_capture_started(true);
                        }
                    }
                    Err(err) => {
                        error!(%err, "Configuring capture device failed");
                        self.fail_start(scheduler);
                    }
                }
            }
            Err(err @ CaptureError::DeviceOpenFailed(_)) => self.retry_open(&err, scheduler),
            Err(err) => {
                error!(%err, "Opening capture device failed");
                self.fail_start(scheduler);
            }
        }
    }

    fn retry_open(&mut self, err: &CaptureError, scheduler: &mut Scheduler<Self>) {
        match self.machine.next_attempt() {
            OpenRetry::Retry { attempt, delay } => {
                let max_attempts = self.machine.policy().max_attempts;
                warn!(
                    %err,
                    attempt,
                    max_attempts,
                    ?delay,
                    "Opening capture device failed, retrying"
                );
                if self.machine.transition(CaptureState::Opening { attempt }).is_err() {
                    return;
                }
                let posted = self
                    .worker
                    .post_delayed_if_running(delay, |core, scheduler| core.open_current(scheduler));
                if !posted {
                    debug!("Capture stopped before the retry was scheduled");
                    self.machine.reset();
                }
            }
            OpenRetry::GiveUp => {
                error!(%err, "Opening capture device failed, giving up");
                self.fail_start(scheduler);
            }
        }
    }

    fn fail_start(&mut self, scheduler: &mut Scheduler<Self>) {
        self.stop_capture(scheduler);
        self.observer.on_capture_started(false);
        self.shared.report_error(START_FAILED);
    }

    fn prepare_session(&mut self) -> Result<()> {
        let error_callback = {
            let handle = self.worker.clone();
            Box::new(move |err: DeviceError| {
                let posted = handle.post_if_running(move |core, scheduler| {
                    core.on_device_error(err, scheduler);
                });
                if !posted {
                    warn!(%err, "Device error after capture stopped");
                }
            })
        };
        let texture_callback = self
            .shared
            .config
            .capture_to_texture
            .then(|| self.texture_callback());

        let session = self.session.as_mut().ok_or(CaptureError::Stopped)?;
        session.set_error_callback(error_callback);
        if let Some(callback) = texture_callback {
            session.set_preview_texture(self.target.texture_id())?;
            self.target.start_listening(callback);
        }
        Ok(())
    }

    fn frame_callback(&self) -> FrameCallback {
        let handle = self.worker.clone();
        Box::new(move |buffer| {
            if !handle.post_if_running(move |core, _| core.on_frame(buffer)) {
                trace!("Frame dropped, capture stopped");
            }
        })
    }

    fn texture_callback(&self) -> TextureCallback {
        let handle = self.worker.clone();
        let target = Arc::downgrade(&self.target);
        Box::new(move |texture_id, transform, timestamp_ns| {
            let frame = PendingTexture {
                target: target.clone(),
                delivered: false,
            };
            let posted = handle.post_if_running(move |core, _| {
                core.on_texture_frame(frame, texture_id, transform, timestamp_ns);
            });
            if !posted {
                trace!("Texture frame returned, capture stopped");
            }
        })
    }

    /// Negotiate and apply `request`, then (re)start streaming. An unchanged
    /// negotiated format leaves the stream and buffers untouched.
    fn start_preview(&mut self, request: FormatRequest) -> Result<()> {
        let frame_callback = self.frame_callback();
        let session = self.session.as_mut().ok_or(CaptureError::Stopped)?;
        let format = session.negotiate(
            request.width,
            request.height,
            request.fps,
            self.shared.config.pixel_layout,
        )?;
        self.requested = Some(request);

        if session.is_streaming() && session.format() == Some(&format) {
            debug!(%format, "Requested format already active");
            return Ok(());
        }

        session.reconfigure(format)?;
        if !self.shared.config.capture_to_texture {
            for buffer in self.pool.allocate(format.frame_size(), self.shared.config.buffer_count) {
                session.queue_buffer(buffer);
            }
            session.set_frame_callback(frame_callback);
        }
        session.start_streaming()
    }

    /// Full teardown: stop accepting work, purge pending tasks, release the
    /// device and return to idle.
    fn stop_capture(&mut self, scheduler: &mut Scheduler<Self>) {
        if self.worker.check_on_worker().is_err() {
            return;
        }
        debug!(state = ?self.machine.state(), "Stopping capture");
        self.worker.mark_stopped();
        scheduler.remove_tasks(self.worker.token());

        if self.machine.state() != CaptureState::Idle {
            let _ = self.machine.transition(CaptureState::Stopping);
        }
        self.release_device();
        self.requested = None;
        self.machine.reset();
        let (delivered, dropped) = self.gate.totals();
        info!(delivered, dropped, "Capture stopped");
    }

    fn release_device(&mut self) {
        if self.shared.config.capture_to_texture {
            self.target.stop_listening();
        }
        self.pool.clear();
        if let Some(session) = self.session.take() {
            session.release();
            if let Some(events) = &self.shared.events {
                events.on_device_closed();
            }
        }
    }

    fn switch_device(
        &mut self,
        scheduler: &mut Scheduler<Self>,
    ) -> std::result::Result<bool, String> {
        self.worker.check_on_worker().map_err(|err| err.to_string())?;
        if !self.worker.is_running() {
            error!("Switch requested while capture is stopped");
            return Err(CAMERA_STOPPED.to_owned());
        }
        self.machine
            .transition(CaptureState::Switching)
            .map_err(|err| err.to_string())?;

        self.release_device();
        let count = self.shared.driver.device_count().max(1);
        let index = {
            let mut current = self.shared.device_index.lock();
            *current = (*current + 1) % count;
            *current
        };
        info!(index, count, "Switching capture device");

        self.machine
            .transition(CaptureState::Opening { attempt: 1 })
            .map_err(|err| err.to_string())?;
        self.open_current(scheduler);

        if !self.worker.is_running() {
            return Err(CAMERA_STOPPED.to_owned());
        }
        Ok(self
            .shared
            .driver
            .device_info(index)
            .is_ok_and(|info| info.facing == Facing::Front))
    }

    fn change_format(&mut self, request: FormatRequest, scheduler: &mut Scheduler<Self>) {
        if self.worker.check_on_worker().is_err() {
            return;
        }
        if !self.worker.is_running() || self.machine.state() != CaptureState::Running {
            error!(state = ?self.machine.state(), "Format change requested while not capturing");
            return;
        }
        info!(request.width, request.height, request.fps, "Changing capture format");
        if let Err(err) = self.start_preview(request) {
            error!(%err, "Format change failed");
            self.shared.report_error(&err.to_string());
            self.stop_capture(scheduler);
        }
    }

    fn on_frame(&mut self, buffer: FrameBuffer) {
        if self.worker.check_on_worker().is_err() {
            return;
        }
        if !self.worker.is_running() {
            debug!("Frame after stop dropped");
            return;
        }
        if !self.pool.accept(&buffer) {
            debug!(id = ?buffer.id(), "Stale frame buffer dropped");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(format) = session.format().copied() else {
            return;
        };
        if self.gate.deliver_raw(buffer.data(), &format, session.identity()) == Delivery::Dropped {
            trace!(id = ?buffer.id(), "Decimated frame requeued undelivered");
        }
        if let Some(buffer) = self.pool.reclaim(buffer) {
            session.queue_buffer(buffer);
        }
    }

    fn on_texture_frame(
        &mut self,
        mut frame: PendingTexture,
        texture_id: u32,
        transform: TransformMatrix,
        timestamp_ns: i64,
    ) {
        if self.worker.check_on_worker().is_err() {
            return;
        }
        let active = self
            .session
            .as_ref()
            .filter(|_| self.worker.is_running())
            .and_then(|session| {
                session
                    .format()
                    .copied()
                    .map(|format| (format, session.identity()))
            });
        let Some((format, identity)) = active else {
            debug!("Texture frame after stop returned");
            return;
        };
        self.gate
            .deliver_texture(&format, identity, texture_id, &transform, timestamp_ns);
        frame.delivered = true;
    }

    fn on_device_error(&mut self, err: DeviceError, scheduler: &mut Scheduler<Self>) {
        error!(%err, "Device runtime error");
        self.shared.report_error(&err.to_string());
        if self.session.is_some() || self.machine.state() != CaptureState::Idle {
            self.stop_capture(scheduler);
        }
    }

    fn set_zoom(&mut self, level: u32) {
        let Some(session) = self.session.as_mut() else {
            warn!(level, "Zoom requested without an open device");
            return;
        };
        match session.set_zoom(level) {
            Ok(applied) => debug!(requested = level, applied, "Zoom applied"),
            Err(err) => warn!(%err, level, "Zoom failed"),
        }
    }

    fn set_torch(&mut self, on: bool) {
        let Some(session) = self.session.as_mut() else {
            warn!(on, "Torch requested without an open device");
            return;
        };
        if let Err(err) = session.set_torch(on) {
            warn!(%err, on, "Torch failed");
        }
    }
}

struct Initialized {
    worker: CaptureWorker<CaptureCore>,
    observer: Arc<dyn CapturerObserver>,
}

/// Video capturer driving one device at a time from a dedicated worker
/// thread.
///
/// Every method takes `&self` and may be called from any thread. Lifecycle
/// outcomes are reported through the [`CapturerObserver`] given to
/// [`initialize`](Self::initialize) and the optional [`CameraEventsHandler`].
pub struct VideoCapturer {
    shared: Arc<Shared>,
    rotation: Arc<dyn RotationProvider>,
    inner: OnceLock<Initialized>,
}

impl VideoCapturer {
    /// Create a capturer for the device called `device_name`, or the first
    /// device when no name is given.
    pub fn new(
        driver: Arc<dyn CameraDriver>,
        device_name: Option<&str>,
        events: Option<Arc<dyn CameraEventsHandler>>,
        config: CapturerConfig,
    ) -> Result<Self> {
        let count = driver.device_count();
        if count == 0 {
            error!("No capture devices available");
            return Err(CaptureError::NoDevices);
        }
        let index = match device_name.filter(|name| !name.is_empty()) {
            None => 0,
            Some(name) => (0..count)
                .find(|&index| driver.device_name(index).is_ok_and(|found| found == name))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_owned()))?,
        };
        info!(index, count, "Video capturer created");

        Ok(Self {
            shared: Arc::new(Shared {
                driver,
                events,
                config,
                routing: Arc::new(DeliveryRouting::default()),
                device_index: Mutex::new(index),
                active_device: Mutex::new(None),
                pending_switch: Mutex::new(false),
            }),
            rotation: Arc::new(|| 0_u32),
            inner: OnceLock::new(),
        })
    }

    /// Use `provider` for the display rotation. Takes effect at `initialize`.
    #[must_use]
    pub fn with_rotation_provider(mut self, provider: Arc<dyn RotationProvider>) -> Self {
        self.rotation = provider;
        self
    }

    /// Spawn the capture worker and bind the output target and primary
    /// observer. May only be called once.
    pub fn initialize(
        &self,
        target: Arc<dyn OutputTarget>,
        observer: Arc<dyn CapturerObserver>,
    ) -> Result<()> {
        if self.inner.get().is_some() {
            error!("Capturer initialized twice");
            return Err(CaptureError::AlreadyInitialized);
        }
        let shared = Arc::clone(&self.shared);
        let rotation = Arc::clone(&self.rotation);
        let core_observer = Arc::clone(&observer);
        let worker = CaptureWorker::spawn(&self.shared.config.worker_name, move |handle| {
            CaptureCore::new(handle, shared, core_observer, target, rotation)
        })?
        .with_shutdown_timeout(self.shared.config.stop_timeout);
        self.inner
            .set(Initialized { worker, observer })
            .map_err(|_| CaptureError::AlreadyInitialized)?;
        debug!("Video capturer initialized");
        Ok(())
    }

    fn initialized(&self) -> Result<&Initialized> {
        self.inner.get().ok_or_else(|| {
            error!("Capturer used before initialize");
            CaptureError::NotInitialized
        })
    }

    fn post<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&mut CaptureCore, &mut Scheduler<CaptureCore>) + Send + 'static,
    {
        if self.initialized()?.worker.handle().post_if_running(task) {
            Ok(())
        } else {
            warn!("Capture is stopped, request dropped");
            Err(CaptureError::Stopped)
        }
    }

    /// Open the current device and start streaming at the closest supported
    /// format. Completion is reported through `on_capture_started`.
    pub fn start(&self, width: u32, height: u32, fps: u32) -> Result<()> {
        let init = self.initialized()?;
        info!(width, height, fps, "Start capture requested");

        let handle = init.worker.handle();
        if handle.mark_running() {
            error!("Capture already started");
            return Ok(());
        }
        let request = FormatRequest { width, height, fps };
        let guard = PendingStart {
            shared: Arc::clone(&self.shared),
            observer: Arc::clone(&init.observer),
            worker: handle.clone(),
            armed: true,
        };
        // A refused task is dropped right away, and the guard reports it.
        let posted = handle.post_if_running(move |core, scheduler| {
            guard.disarm();
            core.start_capture(request, scheduler);
        });
        if posted {
            Ok(())
        } else {
            Err(CaptureError::Stopped)
        }
    }

    /// Stop capturing and release the device.
    ///
    /// Blocks until the worker has torn down or the stop timeout elapses; a
    /// timeout is reported as a device error. No-op when nothing is running.
    pub fn stop(&self) -> Result<()> {
        let Some(init) = self.inner.get() else {
            debug!("Stop before initialize ignored");
            return Ok(());
        };
        let handle = init.worker.handle();
        if handle.is_on_worker() {
            error!("Stop called from the capture worker");
            return Err(CaptureError::WrongThread);
        }
        info!("Stop capture requested");

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let posted = handle.post_if_running(move |core, scheduler| {
            core.stop_capture(scheduler);
            let _ = done_tx.send(());
        });
        if !posted {
            warn!("Stop requested while capture is not running");
            return Ok(());
        }

        match done_rx.recv_timeout(self.shared.config.stop_timeout) {
            Ok(()) => debug!("Capture stop confirmed"),
            Err(RecvTimeoutError::Timeout) => {
                error!(timeout = ?self.shared.config.stop_timeout, "Camera stop timeout");
                self.shared.report_error(STOP_TIMEOUT);
            }
            // Purged by a concurrent teardown, which released the device.
            Err(RecvTimeoutError::Disconnected) => debug!("Stop task superseded"),
        }
        init.observer.on_capture_stopped();
        Ok(())
    }

    /// Release the current device and open the next one with the last
    /// requested format. The outcome is reported through `on_switch_done` or
    /// `on_switch_error`.
    pub fn switch_device(&self) -> Result<()> {
        info!("Device switch requested");
        if self.shared.driver.device_count() < 2 {
            self.shared.report_switch_error(NO_CAMERA_TO_SWITCH);
            return Err(CaptureError::NoDeviceToSwitchTo);
        }
        let init = self.initialized()?;

        let already_pending = {
            let mut pending = self.shared.pending_switch.lock();
            std::mem::replace(&mut *pending, true)
        };
        if already_pending {
            warn!("Ignoring device switch request, one is already pending");
            self.shared.report_switch_error(SWITCH_PENDING);
            return Err(CaptureError::SwitchInProgress);
        }

        let guard = PendingSwitch {
            shared: Arc::clone(&self.shared),
            outcome: None,
        };
        // A refused task is dropped right away, and the guard reports it.
        let posted = init.worker.handle().post_if_running(move |core, scheduler| {
            let outcome = core.switch_device(scheduler);
            guard.complete(outcome);
        });
        if posted {
            Ok(())
        } else {
            Err(CaptureError::Stopped)
        }
    }

    /// Re-negotiate the running stream for a new size and frame rate.
    pub fn change_format(&self, width: u32, height: u32, fps: u32) -> Result<()> {
        info!(width, height, fps, "Format change requested");
        let request = FormatRequest { width, height, fps };
        self.post(move |core, scheduler| core.change_format(request, scheduler))
    }

    /// Drop every second frame while `enabled`.
    pub fn set_decimation(&self, enabled: bool) {
        debug!(enabled, "Frame decimation");
        self.shared.routing.set_decimate(enabled);
    }

    /// Also deliver raw frames to `observer`, or stop doing so with `None`.
    pub fn set_auxiliary_observer(&self, observer: Option<Arc<dyn CapturerObserver>>) {
        debug!(enabled = observer.is_some(), "Auxiliary observer");
        self.shared.routing.set_auxiliary(observer);
    }

    /// Enable or disable delivery of device frames to the primary observer.
    pub fn set_primary_delivery(&self, enabled: bool) {
        debug!(enabled, "Primary delivery");
        self.shared.routing.set_primary_enabled(enabled);
    }

    /// Hand a frame from another source to the primary observer. Only
    /// allowed while primary delivery of device frames is disabled.
    pub fn push_external_frame(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        rotation: u32,
        timestamp_ns: i64,
    ) -> Result<()> {
        let init = self.initialized()?;
        if self.shared.routing.primary_enabled() {
            error!("External frame pushed while primary delivery is active");
            return Err(CaptureError::PrimaryDeliveryActive);
        }
        init.observer
            .on_raw_frame(data, width, height, rotation, timestamp_ns);
        Ok(())
    }

    /// Set the zoom level, clamped to the device maximum.
    pub fn set_zoom(&self, level: u32) -> Result<()> {
        self.post(move |core, _| core.set_zoom(level))
    }

    /// Switch the torch on or off.
    pub fn set_torch(&self, on: bool) -> Result<()> {
        self.post(move |core, _| core.set_torch(on))
    }

    /// Whether capture is started and not yet stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .get()
            .is_some_and(|init| init.worker.handle().is_running())
    }

    /// Whether frames are delivered as textures.
    #[must_use]
    pub fn is_capturing_to_texture(&self) -> bool {
        self.shared.config.capture_to_texture
    }

    /// Whether the active (or, before the first open, selected) device faces
    /// away from the user. Devices with unknown facing count as back-facing.
    #[must_use]
    pub fn uses_back_camera(&self) -> bool {
        let facing = self
            .shared
            .active_device
            .lock()
            .as_ref()
            .map(|identity| identity.facing);
        let facing = facing.or_else(|| {
            self.shared
                .driver
                .device_info(self.current_device_index())
                .ok()
                .map(|info| info.facing)
        });
        facing != Some(Facing::Front)
    }

    /// Driver index of the selected device.
    #[must_use]
    pub fn current_device_index(&self) -> u32 {
        *self.shared.device_index.lock()
    }

    /// Formats the selected device supports.
    pub fn supported_formats(&self) -> Result<Vec<CaptureFormat>> {
        self.shared
            .driver
            .supported_formats(self.current_device_index())
    }
}

impl Drop for VideoCapturer {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop() {
                warn!(%err, "Stopping capture on drop failed");
            }
        }
    }
}
