//! Mock engine for testing without hardware.

use std::collections::HashMap;

use crate::config::{BinMode, DisplayMode, Gains, ToneSettings};
use crate::lifecycle::Operation;
use crate::traits::{
    CameraBits, CameraId, CameraIdentity, DeviceEngine, FaultCallback, FrameCallback,
    FrameMetadata, FrameType, GrabCount, HostContext, Status, WorkMode,
};

/// One recorded engine call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Call {
    InitDevice,
    UninitDevice,
    QueryIdentity(CameraId),
    AddToWorkingSet(CameraId),
    RemoveFromWorkingSet(CameraId),
    StartEngine(HostContext, CameraBits),
    StopEngine,
    SetWorkMode(CameraId, WorkMode),
    ShowFactoryPanel(CameraId, String),
    HideFactoryPanel,
    ApplyResolution {
        camera: CameraId,
        row: u32,
        column: u32,
        bin: BinMode,
        buffer_count: u32,
    },
    ApplyRoi(CameraId, u32, u32),
    ApplyGains(CameraId, Gains),
    ApplyExposure(CameraId, u32),
    ApplyGamma(ToneSettings),
    ApplyDisplayMode(DisplayMode),
    InstallFrameCallback(FrameType, bool),
    InstallFaultCallback(bool),
    StartGrab(GrabCount),
    StopGrab,
    GpioConfig(CameraId, u8),
    GpioWriteRead(CameraId, u8),
}

impl Call {
    /// The operation this call belongs to.
    pub const fn operation(&self) -> Operation {
        match self {
            Self::InitDevice => Operation::InitDevice,
            Self::UninitDevice => Operation::UninitDevice,
            Self::QueryIdentity(_) => Operation::QueryIdentity,
            Self::AddToWorkingSet(_) => Operation::AddToWorkingSet,
            Self::RemoveFromWorkingSet(_) => Operation::RemoveFromWorkingSet,
            Self::StartEngine(..) => Operation::StartEngine,
            Self::StopEngine => Operation::StopEngine,
            Self::SetWorkMode(..) => Operation::SetWorkMode,
            Self::ShowFactoryPanel(..) => Operation::ShowFactoryPanel,
            Self::HideFactoryPanel => Operation::HideFactoryPanel,
            Self::ApplyResolution { .. } => Operation::ApplyResolution,
            Self::ApplyRoi(..) => Operation::ApplyRoi,
            Self::ApplyGains(..) => Operation::ApplyGains,
            Self::ApplyExposure(..) => Operation::ApplyExposure,
            Self::ApplyGamma(_) => Operation::ApplyGamma,
            Self::ApplyDisplayMode(_) => Operation::ApplyDisplayMode,
            Self::InstallFrameCallback(..) => Operation::InstallFrameCallback,
            Self::InstallFaultCallback(_) => Operation::InstallFaultCallback,
            Self::StartGrab(_) => Operation::StartGrab,
            Self::StopGrab => Operation::StopGrab,
            Self::GpioConfig(..) => Operation::GpioConfig,
            Self::GpioWriteRead(..) => Operation::GpioWriteRead,
        }
    }
}

/// In-memory engine that records every call.
pub struct MockEngine {
    camera_count: i32,
    identity: CameraIdentity,
    gpio_input: u8,
    failures: HashMap<Operation, i32>,
    calls: Vec<Call>,
    frame_callback: Option<FrameCallback>,
    fault_callback: Option<FaultCallback>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// A mock with one camera attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            camera_count: 1,
            identity: CameraIdentity {
                module_no: "CCE-B013-U".to_owned(),
                serial_no: "13-000001".to_owned(),
            },
            gpio_input: 0,
            failures: HashMap::new(),
            calls: Vec::new(),
            frame_callback: None,
            fault_callback: None,
        }
    }

    /// Set the number of cameras `init_device` reports.
    #[must_use]
    pub fn with_cameras(mut self, count: i32) -> Self {
        self.camera_count = count;
        self
    }

    /// Set the value GPIO reads return.
    #[must_use]
    pub fn with_gpio_input(mut self, input: u8) -> Self {
        self.gpio_input = input;
        self
    }

    /// Make every call of `operation` return `status` until cleared.
    pub fn fail(&mut self, operation: Operation, status: i32) {
        self.failures.insert(operation, status);
    }

    /// Stop injecting failures for `operation`.
    pub fn clear_failure(&mut self, operation: Operation) {
        self.failures.remove(&operation);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Calls of one operation, in order.
    pub fn calls_of(&self, operation: Operation) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|call| call.operation() == operation)
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Whether a frame callback is installed.
    pub const fn has_frame_callback(&self) -> bool {
        self.frame_callback.is_some()
    }

    /// Deliver one frame through the installed callback, as the host loop would.
    ///
    /// Returns `false` if no callback is installed.
    pub fn emit_frame(&mut self, metadata: &FrameMetadata, pixels: &[u8]) -> bool {
        self.frame_callback.as_mut().is_some_and(|callback| {
            callback(metadata, pixels);
            true
        })
    }

    /// Raise a USB device fault. Returns `false` if no callback is installed.
    pub fn emit_fault(&mut self) -> bool {
        self.fault_callback.as_mut().is_some_and(|callback| {
            callback();
            true
        })
    }

    fn record(&mut self, call: Call) -> Status {
        let operation = call.operation();
        self.calls.push(call);
        self.failures
            .get(&operation)
            .map_or(Status::OK, |&status| Status(status))
    }
}

impl DeviceEngine for MockEngine {
    fn init_device(&mut self) -> Status {
        let status = self.record(Call::InitDevice);
        if status.is_failure() {
            status
        } else {
            Status(self.camera_count)
        }
    }

    fn uninit_device(&mut self) -> Status {
        self.frame_callback = None;
        self.fault_callback = None;
        self.record(Call::UninitDevice)
    }

    fn query_identity(&mut self, camera: CameraId) -> Result<CameraIdentity, Status> {
        let status = self.record(Call::QueryIdentity(camera));
        if status.is_failure() {
            Err(status)
        } else {
            Ok(self.identity.clone())
        }
    }

    fn add_to_working_set(&mut self, camera: CameraId) -> Status {
        self.record(Call::AddToWorkingSet(camera))
    }

    fn remove_from_working_set(&mut self, camera: CameraId) -> Status {
        self.record(Call::RemoveFromWorkingSet(camera))
    }

    fn start_engine(&mut self, context: HostContext, bits: CameraBits) -> Status {
        self.record(Call::StartEngine(context, bits))
    }

    fn stop_engine(&mut self) -> Status {
        self.record(Call::StopEngine)
    }

    fn set_work_mode(&mut self, camera: CameraId, mode: WorkMode) -> Status {
        self.record(Call::SetWorkMode(camera, mode))
    }

    fn show_factory_panel(&mut self, camera: CameraId, password: &str) -> Status {
        self.record(Call::ShowFactoryPanel(camera, password.to_owned()))
    }

    fn hide_factory_panel(&mut self) -> Status {
        self.record(Call::HideFactoryPanel)
    }

    fn apply_resolution(
        &mut self,
        camera: CameraId,
        row: u32,
        column: u32,
        bin: BinMode,
        buffer_count: u32,
    ) -> Status {
        self.record(Call::ApplyResolution {
            camera,
            row,
            column,
            bin,
            buffer_count,
        })
    }

    fn apply_roi(&mut self, camera: CameraId, x_start: u32, y_start: u32) -> Status {
        self.record(Call::ApplyRoi(camera, x_start, y_start))
    }

    fn apply_gains(&mut self, camera: CameraId, gains: Gains) -> Status {
        self.record(Call::ApplyGains(camera, gains))
    }

    fn apply_exposure(&mut self, camera: CameraId, ticks: u32) -> Status {
        self.record(Call::ApplyExposure(camera, ticks))
    }

    fn apply_gamma(&mut self, tone: ToneSettings) -> Status {
        self.record(Call::ApplyGamma(tone))
    }

    fn apply_display_mode(&mut self, mode: DisplayMode) -> Status {
        self.record(Call::ApplyDisplayMode(mode))
    }

    fn install_frame_callback(
        &mut self,
        frame_type: FrameType,
        callback: Option<FrameCallback>,
    ) -> Status {
        let status = self.record(Call::InstallFrameCallback(frame_type, callback.is_some()));
        if !status.is_failure() {
            self.frame_callback = callback;
        }
        status
    }

    fn install_fault_callback(&mut self, callback: Option<FaultCallback>) -> Status {
        let status = self.record(Call::InstallFaultCallback(callback.is_some()));
        if !status.is_failure() {
            self.fault_callback = callback;
        }
        status
    }

    fn start_grab(&mut self, frames: GrabCount) -> Status {
        self.record(Call::StartGrab(frames))
    }

    fn stop_grab(&mut self) -> Status {
        self.record(Call::StopGrab)
    }

    fn set_gpio_config(&mut self, camera: CameraId, config: u8) -> Status {
        self.record(Call::GpioConfig(camera, config))
    }

    fn gpio_write_read(&mut self, camera: CameraId, output: u8) -> Result<u8, Status> {
        let status = self.record(Call::GpioWriteRead(camera, output));
        if status.is_failure() {
            Err(status)
        } else {
            Ok(self.gpio_input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_engine_records_calls() {
        let mut engine = MockEngine::new().with_cameras(2);
        assert_eq!(engine.init_device(), Status(2));
        assert_eq!(engine.add_to_working_set(CameraId::FIRST), Status::OK);
        assert_eq!(
            engine.calls(),
            &[Call::InitDevice, Call::AddToWorkingSet(CameraId::FIRST)]
        );
    }

    #[test]
    fn test_mock_engine_injects_failures() {
        let mut engine = MockEngine::new();
        engine.fail(Operation::ApplyGains, -3);
        assert_eq!(
            engine.apply_gains(CameraId::FIRST, Gains::default()),
            Status(-3)
        );

        engine.clear_failure(Operation::ApplyGains);
        assert_eq!(
            engine.apply_gains(CameraId::FIRST, Gains::default()),
            Status::OK
        );
    }

    #[test]
    fn test_mock_engine_delivers_only_with_callback() {
        let mut engine = MockEngine::new();
        assert!(!engine.emit_frame(&FrameMetadata::default(), &[]));

        let (tx, rx) = std::sync::mpsc::channel();
        engine.install_frame_callback(
            FrameType::Raw,
            Some(Box::new(move |metadata: &FrameMetadata, pixels: &[u8]| {
                tx.send((metadata.rows, pixels.len())).expect("receiver alive");
            })),
        );
        let metadata = FrameMetadata {
            rows: 2,
            columns: 2,
            ..FrameMetadata::default()
        };
        assert!(engine.emit_frame(&metadata, &[0; 4]));
        assert_eq!(rx.try_recv().ok(), Some((2, 4)));
    }
}
