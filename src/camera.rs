//! Camera session: the command surface offered to the host application.
//!
//! Every command is checked against the lifecycle first, then validated,
//! then forwarded to the engine as exactly one native call. Configuration
//! is stored before it is pushed and is not rolled back if the push fails.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::buffer::FrameGeometry;
use crate::config::{
    BinMode, ConfigStore, DisplayMode, Gains, ImageConfig, Resolution, ToneSettings,
    ENGINE_BUFFER_COUNT,
};
use crate::dispatch::{
    fault_callback, frame_callback, DispatchStats, FrameConsumer, FrameDispatcher,
    SharedDispatcher,
};
use crate::lifecycle::{Lifecycle, LifecycleState, Operation};
use crate::traits::{
    pixel_depth_bytes, CameraBits, CameraError, CameraId, CameraIdentity, DeviceEngine,
    FrameType, GrabCount, HostContext, Result, Status, WorkMode,
};

/// Fixed credential the engine expects for its factory control panel.
pub const FACTORY_PANEL_PASSWORD: &str = "123456";

/// One camera session over a [`DeviceEngine`].
pub struct Camera<E: DeviceEngine> {
    engine: E,
    lifecycle: Lifecycle,
    store: ConfigStore,
    dispatcher: SharedDispatcher,
    work_mode: WorkMode,
    frame_type: FrameType,
    bits: CameraBits,
}

impl<E: DeviceEngine> std::fmt::Debug for Camera<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("lifecycle", &self.lifecycle)
            .field("config", self.store.config())
            .field("work_mode", &self.work_mode)
            .field("frame_type", &self.frame_type)
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl<E: DeviceEngine> Camera<E> {
    /// A session over `engine` with the default configuration.
    pub fn new(engine: E) -> Self {
        Self::with_config(engine, ImageConfig::default())
    }

    /// A session over `engine` starting from `config`.
    ///
    /// Nothing is pushed until the matching setter is called.
    pub fn with_config(engine: E, config: ImageConfig) -> Self {
        Self {
            engine,
            lifecycle: Lifecycle::new(),
            store: ConfigStore::with_config(config),
            dispatcher: Arc::new(Mutex::new(FrameDispatcher::new())),
            work_mode: WorkMode::default(),
            frame_type: FrameType::default(),
            bits: CameraBits::default(),
        }
    }

    /// The underlying engine.
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// The underlying engine, mutably.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Lifecycle details: working set, active camera, camera count.
    pub const fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Last requested configuration.
    pub const fn config(&self) -> &ImageConfig {
        self.store.config()
    }

    /// Frame bounds `(max_x, max_y)` of the current resolution.
    pub const fn max_xy(&self) -> (u32, u32) {
        self.store.max_xy()
    }

    /// Exposure in microseconds.
    pub const fn exposure_us(&self) -> u32 {
        self.store.exposure_us()
    }

    /// Last requested work mode.
    pub const fn work_mode(&self) -> WorkMode {
        self.work_mode
    }

    /// Frame type used for the next grab.
    pub const fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Frame delivery counters.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher().stats()
    }

    /// Size of the frame buffer in bytes, 0 when none is held.
    pub fn frame_buffer_len(&self) -> usize {
        self.dispatcher().buffer().len()
    }

    /// Geometry the frame buffer is sized for with the current settings.
    pub fn frame_geometry(&self) -> FrameGeometry {
        let (max_x, max_y) = self.store.max_xy();
        FrameGeometry {
            max_x,
            max_y,
            pixel_depth: pixel_depth_bytes(self.frame_type, self.bits),
        }
    }

    /// Send frames and device faults to `consumer`.
    pub fn set_frame_consumer<C: FrameConsumer + 'static>(&mut self, consumer: C) {
        self.dispatcher().set_consumer(Some(Box::new(consumer)));
    }

    /// Stop forwarding frames; statistics are still collected.
    pub fn clear_frame_consumer(&mut self) {
        self.dispatcher().set_consumer(None);
    }

    /// Reserve driver resources. Returns the number of cameras found.
    pub fn init_device(&mut self) -> Result<u32> {
        self.gate(Operation::InitDevice)?;
        let count = checked(Operation::InitDevice, self.engine.init_device())?;
        let count = u32::try_from(count).unwrap_or(0);
        self.lifecycle.device_initialized(count);
        info!(cameras = count, "device initialized");
        Ok(count)
    }

    /// Release all driver resources. A no-op if the driver was never initialized.
    pub fn uninit_device(&mut self) -> Result<()> {
        self.gate(Operation::UninitDevice)?;
        if !self.lifecycle.driver_initialized() {
            debug!("uninit_device without init, nothing to release");
            return Ok(());
        }
        checked(Operation::UninitDevice, self.engine.uninit_device())?;
        self.dispatcher().buffer_mut().free();
        self.lifecycle.device_uninitialized();
        info!("device uninitialized");
        Ok(())
    }

    /// Module and serial number of `camera`, or the "Unknown" sentinel if
    /// the engine cannot read them.
    pub fn query_identity(&mut self, camera: CameraId) -> Result<CameraIdentity> {
        self.gate(Operation::QueryIdentity)?;
        reported(self.lifecycle.check_enumerated(camera))?;
        match self.engine.query_identity(camera) {
            Ok(identity) => Ok(identity),
            Err(status) => {
                warn!(%camera, status = status.0, "identity query failed");
                Ok(CameraIdentity::unknown())
            }
        }
    }

    /// Add `camera` to the working set and make it the active camera.
    pub fn add_to_working_set(&mut self, camera: CameraId) -> Result<()> {
        self.gate(Operation::AddToWorkingSet)?;
        reported(self.lifecycle.check_enumerated(camera))?;
        if self.lifecycle.contains(camera) {
            debug!(%camera, "already in working set");
            self.lifecycle.camera_added(camera);
            return Ok(());
        }
        checked(
            Operation::AddToWorkingSet,
            self.engine.add_to_working_set(camera),
        )?;
        self.lifecycle.camera_added(camera);
        info!(%camera, "added to working set");
        Ok(())
    }

    /// Remove `camera` from the working set. Removing an absent camera is a
    /// no-op in every state.
    pub fn remove_from_working_set(&mut self, camera: CameraId) -> Result<()> {
        if !self.lifecycle.contains(camera) {
            debug!(%camera, "not in working set, nothing to remove");
            return Ok(());
        }
        self.gate(Operation::RemoveFromWorkingSet)?;
        checked(
            Operation::RemoveFromWorkingSet,
            self.engine.remove_from_working_set(camera),
        )?;
        self.lifecycle.camera_removed(camera);
        info!(%camera, "removed from working set");
        Ok(())
    }

    /// Start the acquisition engine, delivering callbacks on `context`.
    pub fn start_engine(&mut self, context: HostContext, bits: CameraBits) -> Result<()> {
        self.gate(Operation::StartEngine)?;
        checked(Operation::StartEngine, self.engine.start_engine(context, bits))?;
        self.bits = bits;
        self.lifecycle.engine_started();
        info!(?bits, "engine started");
        Ok(())
    }

    /// Stop the acquisition engine. Grabbing must be stopped first.
    pub fn stop_engine(&mut self) -> Result<()> {
        self.gate(Operation::StopEngine)?;
        checked(Operation::StopEngine, self.engine.stop_engine())?;
        self.lifecycle.engine_stopped();
        info!("engine stopped");
        Ok(())
    }

    /// Select video or external-trigger acquisition.
    pub fn set_work_mode(&mut self, mode: WorkMode) -> Result<()> {
        let camera = self.device_gate(Operation::SetWorkMode)?;
        self.work_mode = mode;
        self.push(Operation::SetWorkMode, |engine| {
            engine.set_work_mode(camera, mode)
        })
    }

    /// Choose the frame type for the next grab. Not allowed while grabbing.
    pub fn set_frame_type(&mut self, frame_type: FrameType) -> Result<()> {
        self.gate(Operation::SetFrameType)?;
        self.frame_type = frame_type;
        Ok(())
    }

    /// Show the factory control panel for the active camera.
    pub fn show_factory_panel(&mut self) -> Result<()> {
        let camera = self.device_gate(Operation::ShowFactoryPanel)?;
        self.push(Operation::ShowFactoryPanel, |engine| {
            engine.show_factory_panel(camera, FACTORY_PANEL_PASSWORD)
        })
    }

    /// Hide the factory control panel.
    pub fn hide_factory_panel(&mut self) -> Result<()> {
        self.gate(Operation::HideFactoryPanel)?;
        self.push(Operation::HideFactoryPanel, E::hide_factory_panel)
    }

    /// Forward USB device faults to the frame consumer.
    pub fn install_fault_callback(&mut self) -> Result<()> {
        self.gate(Operation::InstallFaultCallback)?;
        let callback = fault_callback(&self.dispatcher);
        self.push(Operation::InstallFaultCallback, |engine| {
            engine.install_fault_callback(Some(callback))
        })
    }

    /// Start grabbing `frames` frames.
    ///
    /// Allocates the frame buffer, installs the frame callback, then starts
    /// the grab. Any failure undoes the earlier steps.
    ///
    /// A finite grab ends on the engine side once its frames are delivered,
    /// but the session stays in [`LifecycleState::Grabbing`] until
    /// [`Self::stop_grab`] is called; [`DispatchStats::budget_exhausted`]
    /// reports when that point is reached.
    pub fn start_grab(&mut self, frames: GrabCount) -> Result<()> {
        self.gate(Operation::StartGrab)?;
        if !frames.is_native_count() {
            return reported(Err(CameraError::invalid(
                "frame count",
                format!(
                    "{frames:?} must be between 1 and {} and not the continuous sentinel {:#x}",
                    i32::MAX,
                    GrabCount::INFINITE_FRAMES
                ),
            )));
        }

        let geometry = self.frame_geometry();
        {
            let mut dispatcher = self.dispatcher();
            if let Err(err) = dispatcher.buffer_mut().allocate(geometry) {
                error!(%err, "frame buffer unavailable, grab not started");
                return Err(err);
            }
            dispatcher.begin_grab(geometry.pixel_depth, frames);
        }

        let callback = frame_callback(&self.dispatcher);
        let installed = checked(
            Operation::InstallFrameCallback,
            self.engine
                .install_frame_callback(self.frame_type, Some(callback)),
        );
        if let Err(err) = installed {
            self.dispatcher().buffer_mut().free();
            return Err(err);
        }

        if let Err(err) = checked(Operation::StartGrab, self.engine.start_grab(frames)) {
            let unhooked = self.engine.install_frame_callback(self.frame_type, None);
            if unhooked.is_failure() {
                warn!(status = unhooked.0, "failed to remove frame callback");
            }
            self.dispatcher().buffer_mut().free();
            return Err(err);
        }

        self.lifecycle.grab_started();
        info!(?frames, frame_type = ?self.frame_type, "grab started");
        Ok(())
    }

    /// Stop grabbing.
    ///
    /// The session leaves the grabbing state and frees the frame buffer even
    /// if the engine reports a failure; the callback is removed first so no
    /// further frames reach the buffer.
    pub fn stop_grab(&mut self) -> Result<()> {
        self.gate(Operation::StopGrab)?;
        let unhooked = checked(
            Operation::InstallFrameCallback,
            self.engine.install_frame_callback(self.frame_type, None),
        );
        let stopped = checked(Operation::StopGrab, self.engine.stop_grab());
        self.dispatcher().buffer_mut().free();
        self.lifecycle.grab_stopped();
        info!("grab stopped");
        unhooked.and(stopped).map(drop)
    }

    /// Set the resolution class and bin mode.
    ///
    /// A held frame buffer is reallocated for the new bounds. An ROI origin
    /// outside the new bounds is clamped and pushed again.
    pub fn set_resolution(&mut self, resolution: Resolution, bin: BinMode) -> Result<()> {
        let camera = self.device_gate(Operation::ApplyResolution)?;
        let roi = self.store.roi();
        self.store.stage_resolution(resolution, bin);
        self.push_resolution(camera, roi)
    }

    /// Like [`Self::set_resolution`] with a raw resolution index. An
    /// undefined index is rejected and the bounds are left unchanged.
    pub fn set_resolution_index(&mut self, index: i32, bin: BinMode) -> Result<()> {
        let camera = self.device_gate(Operation::ApplyResolution)?;
        let roi = self.store.roi();
        reported(self.store.stage_resolution_index(index, bin))?;
        self.push_resolution(camera, roi)
    }

    /// Set the ROI origin.
    pub fn set_roi(&mut self, x_start: u32, y_start: u32) -> Result<()> {
        let camera = self.device_gate(Operation::ApplyRoi)?;
        reported(self.store.stage_roi(x_start, y_start))?;
        self.push(Operation::ApplyRoi, |engine| {
            engine.apply_roi(camera, x_start, y_start)
        })
    }

    /// Set the RGB gains.
    pub fn set_gains(&mut self, gains: Gains) -> Result<()> {
        let camera = self.device_gate(Operation::ApplyGains)?;
        reported(self.store.stage_gains(gains))?;
        self.push(Operation::ApplyGains, |engine| {
            engine.apply_gains(camera, gains)
        })
    }

    /// Set the exposure in milliseconds.
    pub fn set_exposure_ms(&mut self, millis: u32) -> Result<()> {
        let camera = self.device_gate(Operation::ApplyExposure)?;
        let staged = reported(self.store.stage_exposure_ms(millis))?;
        self.push(Operation::ApplyExposure, |engine| {
            engine.apply_exposure(camera, staged.ticks)
        })
    }

    /// Set the exposure in microseconds; must be a multiple of 50.
    pub fn set_exposure_us(&mut self, micros: u32) -> Result<()> {
        let camera = self.device_gate(Operation::ApplyExposure)?;
        let staged = reported(self.store.stage_exposure_us(micros))?;
        self.push(Operation::ApplyExposure, |engine| {
            engine.apply_exposure(camera, staged.ticks)
        })
    }

    /// Set gamma, contrast, brightness and sharpness.
    pub fn set_tone(&mut self, tone: ToneSettings) -> Result<()> {
        self.gate(Operation::ApplyGamma)?;
        reported(self.store.stage_tone(tone))?;
        self.push(Operation::ApplyGamma, |engine| engine.apply_gamma(tone))
    }

    /// Set the black-and-white, mirror and flip flags.
    pub fn set_display_mode(&mut self, mode: DisplayMode) -> Result<()> {
        self.gate(Operation::ApplyDisplayMode)?;
        self.store.stage_display(mode);
        self.push(Operation::ApplyDisplayMode, |engine| {
            engine.apply_display_mode(mode)
        })
    }

    /// Configure GPIO pin directions on the active camera.
    pub fn set_gpio_config(&mut self, config: u8) -> Result<()> {
        let camera = self.device_gate(Operation::GpioConfig)?;
        self.push(Operation::GpioConfig, |engine| {
            engine.set_gpio_config(camera, config)
        })
    }

    /// Write GPIO outputs on the active camera and read back its inputs.
    pub fn gpio_write_read(&mut self, output: u8) -> Result<u8> {
        let camera = self.device_gate(Operation::GpioWriteRead)?;
        self.engine
            .gpio_write_read(camera, output)
            .map_err(|status| {
                let err = CameraError::NativeCallFailure {
                    operation: Operation::GpioWriteRead,
                    status: status.0,
                };
                warn!(%err, "engine call failed");
                err
            })
    }

    /// Walk the lifecycle back to uninitialized from whatever state the
    /// session is in. Every step is attempted; the first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut first_error = None;
        if self.state() == LifecycleState::Grabbing {
            keep_first(&mut first_error, self.stop_grab());
        }
        if self.state() == LifecycleState::EngineStarted {
            keep_first(&mut first_error, self.stop_engine());
        }
        let cameras: Vec<CameraId> = self.lifecycle.working_set().collect();
        for camera in cameras {
            keep_first(&mut first_error, self.remove_from_working_set(camera));
        }
        if self.lifecycle.driver_initialized() {
            keep_first(&mut first_error, self.uninit_device());
        }
        first_error.map_or(Ok(()), Err)
    }

    fn dispatcher(&self) -> MutexGuard<'_, FrameDispatcher> {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn gate(&self, operation: Operation) -> Result<()> {
        reported(self.lifecycle.permit(operation))
    }

    /// Gate a device-specific operation and resolve the camera it targets.
    fn device_gate(&self, operation: Operation) -> Result<CameraId> {
        self.gate(operation)?;
        reported(self.lifecycle.require_active(operation))
    }

    fn push<F>(&mut self, operation: Operation, call: F) -> Result<()>
    where
        F: FnOnce(&mut E) -> Status,
    {
        debug!(%operation, "forwarding to engine");
        checked(operation, call(&mut self.engine)).map(drop)
    }

    fn push_resolution(&mut self, camera: CameraId, previous_roi: (u32, u32)) -> Result<()> {
        let config = self.store.config();
        let (row, column, bin) = (config.row_size, config.column_size, config.bin);
        let mut pushed = self.push(Operation::ApplyResolution, |engine| {
            engine.apply_resolution(camera, row, column, bin, ENGINE_BUFFER_COUNT)
        });

        let (x_start, y_start) = self.store.roi();
        if (x_start, y_start) != previous_roi {
            debug!(x_start, y_start, "roi clamped to the new resolution");
            let reapplied = self.push(Operation::ApplyRoi, |engine| {
                engine.apply_roi(camera, x_start, y_start)
            });
            pushed = pushed.and(reapplied);
        }

        let geometry = self.frame_geometry();
        let resized = self.dispatcher().buffer_mut().resize(geometry);
        if let Err(err) = &resized {
            error!(%err, "frame buffer could not follow the resolution change");
        }
        pushed.and(resized)
    }
}

impl<E: DeviceEngine> Drop for Camera<E> {
    fn drop(&mut self) {
        if self.lifecycle.driver_initialized() || self.state() != LifecycleState::Uninitialized {
            if let Err(err) = self.shutdown() {
                warn!(%err, "camera shutdown incomplete");
            }
        }
    }
}

fn checked(operation: Operation, status: Status) -> Result<i32> {
    status
        .check(operation)
        .inspect_err(|err| warn!(%err, "engine call failed"))
}

fn reported<T>(result: Result<T>) -> Result<T> {
    result.inspect_err(|err| warn!(%err, "operation rejected"))
}

fn keep_first(slot: &mut Option<CameraError>, result: Result<()>) {
    if let Err(err) = result {
        slot.get_or_insert(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FrameEvent;
    use crate::mock::{Call, MockEngine};
    use crate::traits::FrameMetadata;
    use std::sync::mpsc;

    fn ready() -> Camera<MockEngine> {
        let mut camera = Camera::new(MockEngine::new());
        camera.init_device().expect("init failed");
        camera
            .add_to_working_set(CameraId::FIRST)
            .expect("add failed");
        camera
    }

    fn started() -> Camera<MockEngine> {
        let mut camera = ready();
        camera
            .start_engine(HostContext::default(), CameraBits::Eight)
            .expect("start engine failed");
        camera
    }

    fn frame(rows: u32, columns: u32) -> FrameMetadata {
        FrameMetadata {
            camera_id: 1,
            rows,
            columns,
            ..FrameMetadata::default()
        }
    }

    #[test]
    fn test_lifecycle_forward_and_back() {
        let mut camera = started();
        assert_eq!(camera.state(), LifecycleState::EngineStarted);

        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        assert_eq!(camera.state(), LifecycleState::Grabbing);

        camera.stop_grab().expect("stop grab failed");
        camera.stop_engine().expect("stop engine failed");
        camera
            .remove_from_working_set(CameraId::FIRST)
            .expect("remove failed");
        camera.uninit_device().expect("uninit failed");
        assert_eq!(camera.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_start_grab_before_engine_is_rejected() {
        let mut camera = ready();
        let err = camera
            .start_grab(GrabCount::Infinite)
            .expect_err("grab before engine must fail");

        assert!(matches!(
            err,
            CameraError::PreconditionViolation {
                operation: Operation::StartGrab,
                state: LifecycleState::DeviceReady
            }
        ));
        assert!(camera.engine().calls_of(Operation::StartGrab).is_empty());
        assert!(camera
            .engine()
            .calls_of(Operation::InstallFrameCallback)
            .is_empty());
        assert_eq!(camera.frame_buffer_len(), 0);
    }

    #[test]
    fn test_config_push_rejected_when_uninitialized() {
        let mut camera = Camera::new(MockEngine::new());
        assert!(matches!(
            camera.set_gains(Gains::default()),
            Err(CameraError::PreconditionViolation { .. })
        ));
        assert!(matches!(
            camera.set_tone(ToneSettings::default()),
            Err(CameraError::PreconditionViolation { .. })
        ));
        assert!(camera.engine().calls().is_empty());
    }

    #[test]
    fn test_set_resolution_updates_bounds_and_pushes() {
        let expected = [(1392, 256), (1392, 344), (1392, 520), (1392, 1040)];
        for (resolution, (max_x, max_y)) in Resolution::ALL.into_iter().zip(expected) {
            let mut camera = ready();
            camera
                .set_resolution(resolution, BinMode::Bin1x2)
                .expect("set_resolution failed");

            assert_eq!(camera.max_xy(), (max_x, max_y));
            assert_eq!(camera.config().row_size, max_x);
            assert_eq!(camera.config().column_size, max_y);
            assert_eq!(
                camera.engine().calls().last(),
                Some(&Call::ApplyResolution {
                    camera: CameraId::FIRST,
                    row: max_x,
                    column: max_y,
                    bin: BinMode::Bin1x2,
                    buffer_count: ENGINE_BUFFER_COUNT,
                })
            );
        }
    }

    #[test]
    fn test_resolution_change_clamps_and_repushes_roi() {
        let mut camera = ready();
        camera.set_roi(0, 1000).expect("set_roi failed");
        camera.engine_mut().clear_calls();

        camera
            .set_resolution(Resolution::Tiny, BinMode::NoBin)
            .expect("set_resolution failed");

        let (_, max_y) = camera.max_xy();
        assert!(camera.config().y_start < max_y);
        assert_eq!(camera.config().y_start, 255);
        assert_eq!(
            camera.engine().calls_of(Operation::ApplyRoi),
            vec![&Call::ApplyRoi(CameraId::FIRST, 0, 255)]
        );

        // An ROI already inside the new bounds is not pushed again.
        camera.engine_mut().clear_calls();
        camera
            .set_resolution(Resolution::Normal, BinMode::NoBin)
            .expect("set_resolution failed");
        assert!(camera.engine().calls_of(Operation::ApplyRoi).is_empty());
    }

    #[test]
    fn test_undefined_resolution_is_validation_failure() {
        let mut camera = ready();
        camera
            .set_resolution(Resolution::Little, BinMode::NoBin)
            .expect("set_resolution failed");
        camera.engine_mut().clear_calls();

        let err = camera
            .set_resolution_index(9, BinMode::NoBin)
            .expect_err("undefined resolution must fail");

        assert!(matches!(err, CameraError::ValidationFailure { .. }));
        assert_eq!(camera.max_xy(), (1392, 344));
        assert!(camera.engine().calls().is_empty());
    }

    #[test]
    fn test_exposure_round_trip() {
        let mut camera = ready();
        camera.set_exposure_ms(5).expect("set_exposure failed");

        assert_eq!(camera.exposure_us(), 5_000);
        assert_eq!(
            camera.engine().calls().last(),
            Some(&Call::ApplyExposure(CameraId::FIRST, 100))
        );
    }

    #[test]
    fn test_exposure_us_must_be_whole_ticks() {
        let mut camera = ready();
        assert!(matches!(
            camera.set_exposure_us(1_234),
            Err(CameraError::ValidationFailure { .. })
        ));
        camera.set_exposure_us(1_250).expect("valid exposure");
        assert_eq!(
            camera.engine().calls().last(),
            Some(&Call::ApplyExposure(CameraId::FIRST, 25))
        );
    }

    #[test]
    fn test_failed_push_keeps_requested_value() {
        let mut camera = ready();
        camera.engine_mut().fail(Operation::ApplyGains, -1);
        let gains = Gains {
            red: 20,
            green: 30,
            blue: 40,
        };

        let err = camera.set_gains(gains).expect_err("push must fail");
        assert!(matches!(
            err,
            CameraError::NativeCallFailure {
                operation: Operation::ApplyGains,
                status: -1
            }
        ));
        assert_eq!(camera.config().gains, gains);

        // The session stays usable and a retry goes through.
        camera.engine_mut().clear_failure(Operation::ApplyGains);
        camera.set_gains(gains).expect("retry failed");
        assert_eq!(camera.engine().calls_of(Operation::ApplyGains).len(), 2);
    }

    #[test]
    fn test_setters_are_idempotent() {
        let mut camera = ready();
        camera.set_roi(10, 20).expect("first set_roi failed");
        camera.set_roi(10, 20).expect("second set_roi failed");

        let calls = camera.engine().calls_of(Operation::ApplyRoi);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls.first(), calls.last());
        assert_eq!((camera.config().x_start, camera.config().y_start), (10, 20));
    }

    #[test]
    fn test_roi_outside_bounds_is_rejected() {
        let mut camera = ready();
        camera
            .set_resolution(Resolution::Tiny, BinMode::NoBin)
            .expect("set_resolution failed");
        assert!(matches!(
            camera.set_roi(0, 300),
            Err(CameraError::ValidationFailure { .. })
        ));
        assert!(camera.engine().calls_of(Operation::ApplyRoi).is_empty());
    }

    #[test]
    fn test_process_wide_settings() {
        let mut camera = ready();
        let display = DisplayMode {
            black_white: true,
            horizontal_mirror: false,
            vertical_flip: true,
        };
        camera.set_display_mode(display).expect("display failed");
        camera
            .set_tone(ToneSettings::default())
            .expect("tone failed");

        assert_eq!(
            camera.engine().calls_of(Operation::ApplyDisplayMode),
            vec![&Call::ApplyDisplayMode(display)]
        );
        assert_eq!(camera.config().display, display);
        assert_eq!(camera.engine().calls_of(Operation::ApplyGamma).len(), 1);
    }

    #[test]
    fn test_grab_buffer_sized_for_resolution() {
        let mut camera = started();
        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        assert_eq!(camera.frame_buffer_len(), 1392 * 1040 * 3);

        camera.stop_grab().expect("stop failed");
        assert_eq!(camera.frame_buffer_len(), 0);
    }

    #[test]
    fn test_raw_frames_use_one_byte_per_pixel() {
        let mut camera = started();
        camera.set_frame_type(FrameType::Raw).expect("frame type");
        camera.start_grab(GrabCount::Frames(3)).expect("grab failed");
        assert_eq!(camera.frame_buffer_len(), 1392 * 1040);
        assert!(matches!(
            camera.set_frame_type(FrameType::Dib),
            Err(CameraError::PreconditionViolation {
                operation: Operation::SetFrameType,
                state: LifecycleState::Grabbing
            })
        ));
        assert_eq!(camera.frame_type(), FrameType::Raw);
    }

    #[test]
    fn test_resolution_change_while_grabbing_reallocates() {
        let mut camera = started();
        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        camera
            .set_resolution(Resolution::Small, BinMode::NoBin)
            .expect("set_resolution failed");
        assert_eq!(camera.frame_buffer_len(), 1392 * 520 * 3);
    }

    #[test]
    fn test_frames_reach_consumer_with_average() {
        let (tx, rx) = mpsc::channel();
        let mut camera = started();
        camera.set_frame_consumer(move |event: &FrameEvent<'_>| {
            tx.send((event.average, event.pixels.len()))
                .expect("receiver alive");
        });
        camera.start_grab(GrabCount::Infinite).expect("grab failed");

        assert!(camera.engine_mut().emit_frame(&frame(4, 4), &[200; 4 * 4 * 3]));
        assert_eq!(rx.try_recv().ok(), Some((200, 48)));
        assert_eq!(camera.dispatch_stats().delivered, 1);
        assert_eq!(camera.dispatch_stats().last_average, Some(200));
    }

    #[test]
    fn test_no_frames_after_stop_grab() {
        let mut camera = started();
        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        camera.stop_grab().expect("stop failed");

        assert!(!camera.engine().has_frame_callback());
        assert!(!camera.engine_mut().emit_frame(&frame(4, 4), &[1; 48]));
        assert_eq!(camera.dispatch_stats().delivered, 0);
    }

    #[test]
    fn test_failed_start_grab_rolls_back() {
        let mut camera = started();
        camera.engine_mut().fail(Operation::StartGrab, -2);

        assert!(camera.start_grab(GrabCount::Infinite).is_err());
        assert_eq!(camera.state(), LifecycleState::EngineStarted);
        assert_eq!(camera.frame_buffer_len(), 0);
        assert!(!camera.engine().has_frame_callback());
    }

    #[test]
    fn test_zero_frame_grab_is_invalid() {
        let mut camera = started();
        assert!(matches!(
            camera.start_grab(GrabCount::Frames(0)),
            Err(CameraError::ValidationFailure { .. })
        ));
        assert_eq!(camera.state(), LifecycleState::EngineStarted);
    }

    #[test]
    fn test_grab_count_must_have_native_encoding() {
        let mut camera = started();
        for frames in [GrabCount::Frames(0x8888), GrabCount::Frames(u32::MAX)] {
            assert!(matches!(
                camera.start_grab(frames),
                Err(CameraError::ValidationFailure { .. })
            ));
        }
        assert!(camera.engine().calls_of(Operation::StartGrab).is_empty());

        camera
            .start_grab(GrabCount::Frames(40_000))
            .expect("large finite grab failed");
        assert_eq!(
            camera.engine().calls().last(),
            Some(&Call::StartGrab(GrabCount::Frames(40_000)))
        );
    }

    #[test]
    fn test_finite_grab_stays_grabbing_until_stopped() {
        let mut camera = started();
        camera.start_grab(GrabCount::Frames(1)).expect("grab failed");

        assert!(camera.engine_mut().emit_frame(&frame(2, 2), &[9; 12]));
        assert!(camera.dispatch_stats().budget_exhausted);
        assert_eq!(camera.state(), LifecycleState::Grabbing);
        assert!(camera.stop_engine().is_err());

        camera.stop_grab().expect("stop failed");
        camera.stop_engine().expect("stop engine failed");
    }

    #[test]
    fn test_failed_stop_grab_still_leaves_grabbing() {
        let mut camera = started();
        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        camera.engine_mut().fail(Operation::StopGrab, -1);

        assert!(camera.stop_grab().is_err());
        assert_eq!(camera.state(), LifecycleState::EngineStarted);
        assert_eq!(camera.frame_buffer_len(), 0);
    }

    #[test]
    fn test_stop_engine_while_grabbing_is_rejected() {
        let mut camera = started();
        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        assert!(matches!(
            camera.stop_engine(),
            Err(CameraError::PreconditionViolation {
                operation: Operation::StopEngine,
                state: LifecycleState::Grabbing
            })
        ));
        assert!(camera.engine().calls_of(Operation::StopEngine).is_empty());
    }

    #[test]
    fn test_remove_absent_camera_is_noop() {
        let mut camera = Camera::new(MockEngine::new().with_cameras(2));
        camera.init_device().expect("init failed");
        camera
            .add_to_working_set(CameraId::FIRST)
            .expect("add failed");

        let absent = CameraId::new(2).expect("valid id");
        camera
            .remove_from_working_set(absent)
            .expect("removing an absent camera is not an error");

        assert_eq!(camera.state(), LifecycleState::DeviceReady);
        assert!(camera.lifecycle().contains(CameraId::FIRST));
        assert!(camera
            .engine()
            .calls_of(Operation::RemoveFromWorkingSet)
            .is_empty());
    }

    #[test]
    fn test_remove_absent_camera_while_engine_started() {
        let mut camera = Camera::new(MockEngine::new().with_cameras(2));
        camera.init_device().expect("init failed");
        camera
            .add_to_working_set(CameraId::FIRST)
            .expect("add failed");
        camera
            .start_engine(HostContext::default(), CameraBits::Eight)
            .expect("start engine failed");

        let absent = CameraId::new(2).expect("valid id");
        camera
            .remove_from_working_set(absent)
            .expect("removing an absent camera is not an error");
        assert_eq!(camera.state(), LifecycleState::EngineStarted);
        assert!(camera
            .engine()
            .calls_of(Operation::RemoveFromWorkingSet)
            .is_empty());

        // A present camera still cannot leave while the engine runs.
        assert!(matches!(
            camera.remove_from_working_set(CameraId::FIRST),
            Err(CameraError::PreconditionViolation { .. })
        ));
    }

    #[test]
    fn test_uninit_with_cameras_in_working_set_is_rejected() {
        let mut camera = ready();
        assert!(matches!(
            camera.uninit_device(),
            Err(CameraError::PreconditionViolation {
                operation: Operation::UninitDevice,
                state: LifecycleState::DeviceReady
            })
        ));
        assert!(camera.engine().calls_of(Operation::UninitDevice).is_empty());
        assert!(camera.lifecycle().contains(CameraId::FIRST));
    }

    #[test]
    fn test_negative_camera_count_is_failure() {
        let mut camera = Camera::new(MockEngine::new().with_cameras(-1));
        assert!(matches!(
            camera.init_device(),
            Err(CameraError::NativeCallFailure {
                operation: Operation::InitDevice,
                ..
            })
        ));
        assert!(!camera.lifecycle().driver_initialized());
    }

    #[test]
    fn test_add_unknown_camera_is_rejected() {
        let mut camera = Camera::new(MockEngine::new());
        camera.init_device().expect("init failed");
        let missing = CameraId::new(4).expect("valid id");
        assert!(matches!(
            camera.add_to_working_set(missing),
            Err(CameraError::ValidationFailure { .. })
        ));
        assert_eq!(camera.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_uninit_without_init_is_safe() {
        let mut camera = Camera::new(MockEngine::new());
        camera.uninit_device().expect("uninit must be safe");
        assert!(camera.engine().calls().is_empty());
    }

    #[test]
    fn test_identity_query() {
        let mut camera = Camera::new(MockEngine::new());
        camera.init_device().expect("init failed");
        let identity = camera
            .query_identity(CameraId::FIRST)
            .expect("query failed");
        assert_eq!(identity.module_no, "CCE-B013-U");

        camera.engine_mut().fail(Operation::QueryIdentity, -1);
        let identity = camera
            .query_identity(CameraId::FIRST)
            .expect("failure yields the sentinel");
        assert!(identity.is_unknown());
    }

    #[test]
    fn test_factory_panel_uses_fixed_password() {
        let mut camera = ready();
        assert!(camera.show_factory_panel().is_err());

        camera
            .start_engine(HostContext::default(), CameraBits::Eight)
            .expect("start engine failed");
        camera.show_factory_panel().expect("show failed");
        camera.hide_factory_panel().expect("hide failed");

        assert_eq!(
            camera.engine().calls_of(Operation::ShowFactoryPanel),
            vec![&Call::ShowFactoryPanel(
                CameraId::FIRST,
                FACTORY_PANEL_PASSWORD.to_owned()
            )]
        );
    }

    #[test]
    fn test_gpio() {
        let mut camera = Camera::new(MockEngine::new().with_gpio_input(0x05));
        assert!(camera.gpio_write_read(0x01).is_err());

        camera.init_device().expect("init failed");
        camera
            .add_to_working_set(CameraId::FIRST)
            .expect("add failed");
        camera.set_gpio_config(0x03).expect("gpio config failed");
        assert_eq!(camera.gpio_write_read(0x04).ok(), Some(0x05));

        camera.engine_mut().fail(Operation::GpioWriteRead, -1);
        assert!(matches!(
            camera.gpio_write_read(0x04),
            Err(CameraError::NativeCallFailure { .. })
        ));
    }

    #[test]
    fn test_work_mode() {
        let mut camera = ready();
        camera
            .set_work_mode(WorkMode::ExternalTrigger)
            .expect("work mode failed");
        assert_eq!(camera.work_mode(), WorkMode::ExternalTrigger);
        assert_eq!(
            camera.engine().calls().last(),
            Some(&Call::SetWorkMode(
                CameraId::FIRST,
                WorkMode::ExternalTrigger
            ))
        );
    }

    #[test]
    fn test_device_fault_reaches_consumer() {
        struct FaultCounter(mpsc::Sender<()>);
        impl FrameConsumer for FaultCounter {
            fn on_frame(&mut self, _event: &FrameEvent<'_>) {}
            fn on_device_fault(&mut self) {
                self.0.send(()).expect("receiver alive");
            }
        }

        let (tx, rx) = mpsc::channel();
        let mut camera = ready();
        camera.set_frame_consumer(FaultCounter(tx));
        camera.install_fault_callback().expect("install failed");

        assert!(camera.engine_mut().emit_fault());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_shutdown_from_grabbing() {
        let mut camera = started();
        camera.start_grab(GrabCount::Infinite).expect("grab failed");
        camera.engine_mut().clear_calls();

        camera.shutdown().expect("shutdown failed");

        let operations: Vec<Operation> = camera
            .engine()
            .calls()
            .iter()
            .map(Call::operation)
            .collect();
        assert_eq!(
            operations,
            vec![
                Operation::InstallFrameCallback,
                Operation::StopGrab,
                Operation::StopEngine,
                Operation::RemoveFromWorkingSet,
                Operation::UninitDevice,
            ]
        );
        assert_eq!(camera.state(), LifecycleState::Uninitialized);
        assert!(!camera.lifecycle().driver_initialized());
    }
}
