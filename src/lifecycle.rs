//! Device/engine lifecycle state machine.
//!
//! The [`Lifecycle`] gate decides which operations are legal before anything
//! reaches the engine, and records the transitions once the engine has
//! accepted them.

use std::collections::BTreeSet;
use std::fmt;

use crate::traits::{CameraError, CameraId, Result};

/// Lifecycle state of one device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    /// No camera is in the working set.
    #[default]
    Uninitialized,
    /// Driver initialized and at least one camera in the working set.
    DeviceReady,
    /// The acquisition engine is running.
    EngineStarted,
    /// Frames are being grabbed.
    Grabbing,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::DeviceReady => "device ready",
            Self::EngineStarted => "engine started",
            Self::Grabbing => "grabbing",
        };
        f.write_str(name)
    }
}

/// Every gated session operation. All but `SetFrameType` cross the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Operation {
    InitDevice,
    UninitDevice,
    QueryIdentity,
    AddToWorkingSet,
    RemoveFromWorkingSet,
    StartEngine,
    StopEngine,
    SetWorkMode,
    ShowFactoryPanel,
    HideFactoryPanel,
    ApplyResolution,
    ApplyRoi,
    ApplyGains,
    ApplyExposure,
    ApplyGamma,
    ApplyDisplayMode,
    InstallFrameCallback,
    InstallFaultCallback,
    StartGrab,
    StopGrab,
    GpioConfig,
    GpioWriteRead,
    SetFrameType,
}

impl Operation {
    /// Native entry point name, used in error reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InitDevice => "init_device",
            Self::UninitDevice => "uninit_device",
            Self::QueryIdentity => "query_identity",
            Self::AddToWorkingSet => "add_to_working_set",
            Self::RemoveFromWorkingSet => "remove_from_working_set",
            Self::StartEngine => "start_engine",
            Self::StopEngine => "stop_engine",
            Self::SetWorkMode => "set_work_mode",
            Self::ShowFactoryPanel => "show_factory_panel",
            Self::HideFactoryPanel => "hide_factory_panel",
            Self::ApplyResolution => "apply_resolution",
            Self::ApplyRoi => "apply_roi",
            Self::ApplyGains => "apply_gains",
            Self::ApplyExposure => "apply_exposure",
            Self::ApplyGamma => "apply_gamma",
            Self::ApplyDisplayMode => "apply_display_mode",
            Self::InstallFrameCallback => "install_frame_callback",
            Self::InstallFaultCallback => "install_fault_callback",
            Self::StartGrab => "start_grab",
            Self::StopGrab => "stop_grab",
            Self::GpioConfig => "set_gpio_config",
            Self::GpioWriteRead => "gpio_write_read",
            Self::SetFrameType => "set_frame_type",
        }
    }

    /// Whether this operation pushes configuration to a device.
    #[must_use]
    pub const fn is_config_push(self) -> bool {
        matches!(
            self,
            Self::SetWorkMode
                | Self::ApplyResolution
                | Self::ApplyRoi
                | Self::ApplyGains
                | Self::ApplyExposure
                | Self::ApplyGamma
                | Self::ApplyDisplayMode
                | Self::GpioConfig
                | Self::GpioWriteRead
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl LifecycleState {
    /// Whether `operation` may be forwarded to the engine in this state.
    #[must_use]
    pub const fn permits(self, operation: Operation) -> bool {
        use LifecycleState::{DeviceReady, EngineStarted, Grabbing, Uninitialized};

        if operation.is_config_push() {
            return matches!(self, DeviceReady | EngineStarted | Grabbing);
        }
        match operation {
            Operation::InitDevice | Operation::UninitDevice => matches!(self, Uninitialized),
            Operation::QueryIdentity
            | Operation::AddToWorkingSet
            | Operation::RemoveFromWorkingSet => matches!(self, Uninitialized | DeviceReady),
            Operation::StartEngine => matches!(self, DeviceReady),
            Operation::StopEngine | Operation::StartGrab => matches!(self, EngineStarted),
            Operation::StopGrab => matches!(self, Grabbing),
            Operation::ShowFactoryPanel
            | Operation::HideFactoryPanel
            | Operation::InstallFrameCallback => matches!(self, EngineStarted | Grabbing),
            Operation::InstallFaultCallback => {
                matches!(self, DeviceReady | EngineStarted | Grabbing)
            }
            Operation::SetFrameType => !matches!(self, Grabbing),
            _ => false,
        }
    }
}

/// Lifecycle gate for one device session.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: LifecycleState,
    driver_initialized: bool,
    camera_count: u32,
    working_set: BTreeSet<CameraId>,
    active: Option<CameraId>,
}

impl Lifecycle {
    /// A fresh, uninitialized session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether `init_device` has succeeded and not been undone.
    pub const fn driver_initialized(&self) -> bool {
        self.driver_initialized
    }

    /// Cameras discovered by the last successful `init_device`.
    pub const fn camera_count(&self) -> u32 {
        self.camera_count
    }

    /// Cameras currently in the working set.
    pub fn working_set(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.working_set.iter().copied()
    }

    /// Whether `camera` is in the working set.
    pub fn contains(&self, camera: CameraId) -> bool {
        self.working_set.contains(&camera)
    }

    /// Camera that device-specific configuration is pushed to.
    pub const fn active_camera(&self) -> Option<CameraId> {
        self.active
    }

    /// Reject `operation` unless the current state permits it.
    pub fn permit(&self, operation: Operation) -> Result<()> {
        let driver_ok = match operation {
            Operation::InitDevice => !self.driver_initialized,
            Operation::QueryIdentity | Operation::AddToWorkingSet => self.driver_initialized,
            _ => true,
        };
        if driver_ok && self.state.permits(operation) {
            Ok(())
        } else {
            Err(CameraError::PreconditionViolation {
                operation,
                state: self.state,
            })
        }
    }

    /// The active camera, or a precondition violation for `operation`.
    pub fn require_active(&self, operation: Operation) -> Result<CameraId> {
        self.active.ok_or(CameraError::PreconditionViolation {
            operation,
            state: self.state,
        })
    }

    /// Validate that `camera` was enumerated by `init_device`.
    pub fn check_enumerated(&self, camera: CameraId) -> Result<()> {
        if camera.get() <= self.camera_count {
            Ok(())
        } else {
            Err(CameraError::invalid(
                "camera id",
                format!(
                    "{camera} is outside the {} enumerated camera(s)",
                    self.camera_count
                ),
            ))
        }
    }

    pub(crate) fn device_initialized(&mut self, camera_count: u32) {
        self.driver_initialized = true;
        self.camera_count = camera_count;
    }

    pub(crate) fn device_uninitialized(&mut self) {
        self.driver_initialized = false;
        self.camera_count = 0;
        self.working_set.clear();
        self.active = None;
        self.state = LifecycleState::Uninitialized;
    }

    /// Record a camera joining the working set. Returns `false` if already present.
    pub(crate) fn camera_added(&mut self, camera: CameraId) -> bool {
        let inserted = self.working_set.insert(camera);
        self.active = Some(camera);
        if self.state == LifecycleState::Uninitialized {
            self.state = LifecycleState::DeviceReady;
        }
        inserted
    }

    /// Record a camera leaving the working set. Returns `false` if it was absent.
    pub(crate) fn camera_removed(&mut self, camera: CameraId) -> bool {
        if !self.working_set.remove(&camera) {
            return false;
        }
        if self.active == Some(camera) {
            self.active = self.working_set.iter().next_back().copied();
        }
        if self.working_set.is_empty() {
            self.state = LifecycleState::Uninitialized;
        }
        true
    }

    pub(crate) fn engine_started(&mut self) {
        self.state = LifecycleState::EngineStarted;
    }

    pub(crate) fn engine_stopped(&mut self) {
        self.state = LifecycleState::DeviceReady;
    }

    pub(crate) fn grab_started(&mut self) {
        self.state = LifecycleState::Grabbing;
    }

    pub(crate) fn grab_stopped(&mut self) {
        self.state = LifecycleState::EngineStarted;
    }
}
