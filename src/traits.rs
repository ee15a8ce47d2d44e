//! Core traits and types for the camera engine abstraction.

use std::fmt;
use std::num::NonZeroU32;

use crate::config::{BinMode, DisplayMode, Gains, ToneSettings};
use crate::lifecycle::{LifecycleState, Operation};

/// Identifies one physical camera in the working set (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CameraId(NonZeroU32);

impl CameraId {
    /// The first enumerated camera.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// Create a camera id, returning `None` for the invalid id 0.
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        match NonZeroU32::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// The raw 1-based id passed to the engine.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {}", self.0)
    }
}

/// Integer status returned by every native entry point.
///
/// Negative values are failures, anything else is success. For
/// `init_device` the non-negative value is the number of cameras found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub i32);

impl Status {
    /// The status the vendor engine returns on success.
    pub const OK: Self = Self(1);
    /// The status the vendor engine returns on failure.
    pub const FAILED: Self = Self(-1);

    /// Whether the engine reported a failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Convert to a `Result`, naming the attempted operation on failure.
    pub fn check(self, operation: Operation) -> Result<i32> {
        if self.is_failure() {
            Err(CameraError::NativeCallFailure {
                operation,
                status: self.0,
            })
        } else {
            Ok(self.0)
        }
    }
}

/// Module and serial number reported by a camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraIdentity {
    /// Camera module (model) number.
    pub module_no: String,
    /// Camera serial number.
    pub serial_no: String,
}

impl CameraIdentity {
    /// Sentinel reported when the identity query fails.
    pub const UNKNOWN: &'static str = "Unknown";

    /// The sentinel identity.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            module_no: Self::UNKNOWN.to_owned(),
            serial_no: Self::UNKNOWN.to_owned(),
        }
    }

    /// Whether this is the sentinel identity.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.module_no == Self::UNKNOWN && self.serial_no == Self::UNKNOWN
    }
}

/// Camera acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkMode {
    /// Continuously deliver frames.
    #[default]
    Video = 0,
    /// Capture one frame per external trigger signal.
    ExternalTrigger = 1,
}

/// Kind of data delivered to the frame callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    /// Raw sensor data.
    Raw = 0,
    /// Processed 24-bit device-independent bitmap data.
    #[default]
    Dib = 1,
}

/// Sensor bit depth the engine is started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraBits {
    /// 8 bits per sample.
    #[default]
    Eight = 8,
    /// 12 bits per sample.
    Twelve = 12,
}

/// Bytes per pixel for a frame type at a given sensor bit depth.
#[must_use]
pub const fn pixel_depth_bytes(frame_type: FrameType, bits: CameraBits) -> usize {
    match (frame_type, bits) {
        (FrameType::Raw, CameraBits::Eight) => 1,
        (FrameType::Raw, CameraBits::Twelve) => 2,
        (FrameType::Dib, _) => 3,
    }
}

/// Number of frames requested from `start_grab`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabCount {
    /// Capture continuously until `stop_grab`.
    Infinite,
    /// Capture this many frames, then the engine stops on its own.
    Frames(u32),
}

impl GrabCount {
    /// Native sentinel for continuous capture.
    pub const INFINITE_FRAMES: i32 = 0x8888;

    /// The value passed to the native `start_grab` entry point.
    ///
    /// Only meaningful for counts accepted by [`Self::is_native_count`].
    #[must_use]
    pub fn native(self) -> i32 {
        match self {
            Self::Infinite => Self::INFINITE_FRAMES,
            Self::Frames(count) => i32::try_from(count).unwrap_or(i32::MAX),
        }
    }

    /// Whether the engine can be asked for exactly this many frames.
    ///
    /// Zero, the continuous-capture sentinel and counts beyond `i32::MAX`
    /// have no finite native encoding.
    #[must_use]
    pub fn is_native_count(self) -> bool {
        match self {
            Self::Infinite => true,
            Self::Frames(count) => i32::try_from(count)
                .is_ok_and(|count| count > 0 && count != Self::INFINITE_FRAMES),
        }
    }

    /// Interpret a native frame count, where the sentinel means continuous.
    #[must_use]
    pub fn from_native(count: i32) -> Self {
        if count == Self::INFINITE_FRAMES {
            Self::Infinite
        } else {
            Self::Frames(u32::try_from(count).unwrap_or(0))
        }
    }
}

/// Opaque host delivery context passed to `start_engine`.
///
/// The vendor engine marshals frame callbacks onto the message loop owning
/// this handle. Zero means "no window"; the engine then delivers on its own
/// thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostContext(pub usize);

/// Per-frame property record exactly as the engine lays it out in memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RawFrameProperty {
    pub camera_id: i32,
    pub row: i32,
    pub column: i32,
    pub bin: i32,
    pub x_start: i32,
    pub y_start: i32,
    pub exposure_time: i32,
    pub red_gain: i32,
    pub green_gain: i32,
    pub blue_gain: i32,
    pub time_stamp: i32,
    pub trigger_occurred: i32,
    pub trigger_event_count: i32,
    pub user_mark: i32,
    pub frame_time: i32,
    pub ccd_frequency: i32,
    pub process_frame_type: i32,
    pub filter_accept_for_file: i32,
}

/// Metadata for one delivered frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Camera that produced the frame.
    pub camera_id: u32,
    /// Number of rows.
    pub rows: u32,
    /// Number of columns.
    pub columns: u32,
    /// Bin mode code.
    pub bin: u32,
    /// ROI x start.
    pub x_start: u32,
    /// ROI y start.
    pub y_start: u32,
    /// Exposure in engine ticks (50 µs each).
    pub exposure_ticks: u32,
    /// Red gain.
    pub red_gain: u32,
    /// Green gain.
    pub green_gain: u32,
    /// Blue gain.
    pub blue_gain: u32,
    /// Engine timestamp in milliseconds.
    pub timestamp: u32,
    /// Whether an external trigger produced this frame.
    pub trigger_occurred: bool,
    /// Trigger events since trigger mode was set.
    pub trigger_event_count: u32,
    /// User mark.
    pub user_mark: u32,
    /// Frame time.
    pub frame_time: u32,
    /// CCD frequency mode.
    pub ccd_frequency: u32,
    /// Processing type code.
    pub process_frame_type: u32,
    /// Filter accept flag.
    pub filter_accept: bool,
}

impl FrameMetadata {
    /// Exposure in microseconds.
    #[must_use]
    pub const fn exposure_us(&self) -> u64 {
        self.exposure_ticks as u64 * crate::config::MICROS_PER_TICK as u64
    }

    /// Bytes a frame with these dimensions occupies at `depth` bytes per pixel.
    #[must_use]
    pub fn frame_len(&self, depth: usize) -> Option<usize> {
        usize::try_from(self.rows)
            .ok()?
            .checked_mul(usize::try_from(self.columns).ok()?)?
            .checked_mul(depth)
    }
}

impl From<&RawFrameProperty> for FrameMetadata {
    fn from(raw: &RawFrameProperty) -> Self {
        let field = |value: i32| u32::try_from(value).unwrap_or(0);
        Self {
            camera_id: field(raw.camera_id),
            rows: field(raw.row),
            columns: field(raw.column),
            bin: field(raw.bin),
            x_start: field(raw.x_start),
            y_start: field(raw.y_start),
            exposure_ticks: field(raw.exposure_time),
            red_gain: field(raw.red_gain),
            green_gain: field(raw.green_gain),
            blue_gain: field(raw.blue_gain),
            timestamp: field(raw.time_stamp),
            trigger_occurred: raw.trigger_occurred != 0,
            trigger_event_count: field(raw.trigger_event_count),
            user_mark: field(raw.user_mark),
            frame_time: field(raw.frame_time),
            ccd_frequency: field(raw.ccd_frequency),
            process_frame_type: field(raw.process_frame_type),
            filter_accept: raw.filter_accept_for_file != 0,
        }
    }
}

/// Callback the engine invokes once per delivered frame.
///
/// The pixel slice is only valid for the duration of the call.
pub type FrameCallback = Box<dyn FnMut(&FrameMetadata, &[u8]) + Send>;

/// Callback the engine invokes when the USB device faults.
pub type FaultCallback = Box<dyn FnMut() + Send>;

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// Operation invoked in a lifecycle state that does not permit it.
    #[error("{operation} is not permitted while {state}")]
    PreconditionViolation {
        /// Rejected operation.
        operation: Operation,
        /// State at the time of the call.
        state: LifecycleState,
    },
    /// The engine returned a failure status.
    #[error("{operation} failed with engine status {status}")]
    NativeCallFailure {
        /// Attempted operation.
        operation: Operation,
        /// Engine status code.
        status: i32,
    },
    /// Input outside its documented range.
    #[error("invalid {parameter}: {reason}")]
    ValidationFailure {
        /// Offending parameter.
        parameter: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    /// The frame buffer could not be allocated.
    #[error("failed to allocate a {bytes} byte frame buffer")]
    ResourceFailure {
        /// Requested size.
        bytes: usize,
    },
    /// The vendor library could not be loaded or lacks an entry point.
    #[error("camera SDK unavailable: {0}")]
    SdkUnavailable(String),
}

impl CameraError {
    pub(crate) fn invalid<R: Into<String>>(parameter: &'static str, reason: R) -> Self {
        Self::ValidationFailure {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Abstraction over the vendor camera engine.
///
/// Each method maps 1:1 to one native entry point and returns its status
/// untouched; interpreting the status is left to the caller.
pub trait DeviceEngine {
    /// Reserve driver resources. Returns the number of cameras found.
    fn init_device(&mut self) -> Status;

    /// Release all driver resources. Safe to call without a prior init.
    fn uninit_device(&mut self) -> Status;

    /// Read the module and serial number of a camera.
    fn query_identity(&mut self, camera: CameraId) -> std::result::Result<CameraIdentity, Status>;

    /// Add a camera to the working set.
    fn add_to_working_set(&mut self, camera: CameraId) -> Status;

    /// Remove a camera from the working set.
    fn remove_from_working_set(&mut self, camera: CameraId) -> Status;

    /// Start the internal acquisition engine.
    fn start_engine(&mut self, context: HostContext, bits: CameraBits) -> Status;

    /// Stop the acquisition engine.
    fn stop_engine(&mut self) -> Status;

    /// Select video or external-trigger acquisition.
    fn set_work_mode(&mut self, camera: CameraId, mode: WorkMode) -> Status;

    /// Show the factory control panel.
    fn show_factory_panel(&mut self, camera: CameraId, password: &str) -> Status;

    /// Hide the factory control panel.
    fn hide_factory_panel(&mut self) -> Status;

    /// Apply frame size, bin mode and engine buffer count.
    fn apply_resolution(
        &mut self,
        camera: CameraId,
        row: u32,
        column: u32,
        bin: BinMode,
        buffer_count: u32,
    ) -> Status;

    /// Apply the ROI origin.
    fn apply_roi(&mut self, camera: CameraId, x_start: u32, y_start: u32) -> Status;

    /// Apply RGB gains.
    fn apply_gains(&mut self, camera: CameraId, gains: Gains) -> Status;

    /// Apply exposure in engine ticks.
    fn apply_exposure(&mut self, camera: CameraId, ticks: u32) -> Status;

    /// Apply gamma, contrast, brightness and sharpness (process-wide).
    fn apply_gamma(&mut self, tone: ToneSettings) -> Status;

    /// Apply B&W, mirror and flip flags (process-wide).
    fn apply_display_mode(&mut self, mode: DisplayMode) -> Status;

    /// Register a frame callback, or unregister with `None`.
    fn install_frame_callback(
        &mut self,
        frame_type: FrameType,
        callback: Option<FrameCallback>,
    ) -> Status;

    /// Register a device fault callback, or unregister with `None`.
    fn install_fault_callback(&mut self, callback: Option<FaultCallback>) -> Status;

    /// Start grabbing frames.
    fn start_grab(&mut self, frames: GrabCount) -> Status;

    /// Stop grabbing frames.
    fn stop_grab(&mut self) -> Status;

    /// Configure GPIO pin directions.
    fn set_gpio_config(&mut self, camera: CameraId, config: u8) -> Status;

    /// Write GPIO outputs and read back inputs.
    fn gpio_write_read(&mut self, camera: CameraId, output: u8) -> std::result::Result<u8, Status>;
}
