//! Vendor engine binding loaded at runtime with `libloading`.
//!
//! The vendor library exposes `BUFCCDUSB_*` stdcall entry points that all
//! return an integer status. Its frame and fault hooks carry no user
//! context pointer, so the installed callbacks live in process-wide slots
//! read by the trampolines below.
#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString, OsStr};
use std::sync::{Mutex, PoisonError};

use libloading::Library;
use tracing::{debug, warn};

use crate::config::{BinMode, DisplayMode, Gains, ToneSettings};
use crate::traits::{
    pixel_depth_bytes, CameraBits, CameraError, CameraId, CameraIdentity, DeviceEngine,
    FaultCallback, FrameCallback, FrameMetadata, FrameType, GrabCount, HostContext,
    RawFrameProperty, Result, Status, WorkMode,
};

/// Default vendor library name.
#[cfg(windows)]
pub const DEFAULT_LIBRARY: &str = "BUF_USBCCDCamera_SDK_Stdcall.dll";
/// Default vendor library name.
#[cfg(not(windows))]
pub const DEFAULT_LIBRARY: &str = "libBUF_USBCCDCamera_SDK.so";

/// Size of the module and serial number strings filled in by the engine.
const IDENTITY_LEN: usize = 32;

type FrameHook = unsafe extern "system" fn(property: *mut RawFrameProperty, frame: *mut u8);
type DeviceHook = unsafe extern "system" fn(image_type: c_int);

type InitDevice = unsafe extern "system" fn() -> c_int;
type UnInitDevice = unsafe extern "system" fn() -> c_int;
type GetModuleNoSerialNo =
    unsafe extern "system" fn(id: c_int, module: *mut c_char, serial: *mut c_char) -> c_int;
type WorkingSet = unsafe extern "system" fn(id: c_int) -> c_int;
type StartCameraEngine = unsafe extern "system" fn(parent: *mut c_void, bits: c_uint) -> c_int;
type NoArgs = unsafe extern "system" fn() -> c_int;
type SetCameraWorkMode = unsafe extern "system" fn(id: c_int, mode: c_int) -> c_int;
type ShowFactoryControlPanel = unsafe extern "system" fn(id: c_int, password: *const c_char) -> c_int;
type StartFrameGrab = unsafe extern "system" fn(total_frames: c_int) -> c_int;
type SetCustomizedResolution = unsafe extern "system" fn(
    id: c_int,
    row: c_int,
    column: c_int,
    bin: c_int,
    buffer_count: c_int,
) -> c_int;
type SetXYStart = unsafe extern "system" fn(id: c_int, x: c_int, y: c_int) -> c_int;
type SetGains = unsafe extern "system" fn(id: c_int, r: c_int, g: c_int, b: c_int) -> c_int;
type SetExposureTime = unsafe extern "system" fn(id: c_int, ticks: c_int) -> c_int;
type SetGamma = unsafe extern "system" fn(
    gamma: c_int,
    contrast: c_int,
    brightness: c_int,
    sharp: c_int,
) -> c_int;
type SetBWMode = unsafe extern "system" fn(bw: c_int, h_mirror: c_int, v_flip: c_int) -> c_int;
type InstallFrameHooker =
    unsafe extern "system" fn(frame_type: c_int, hook: Option<FrameHook>) -> c_int;
type InstallUSBDeviceHooker = unsafe extern "system" fn(hook: Option<DeviceHook>) -> c_int;
type SetGPIOConfig = unsafe extern "system" fn(id: c_int, config: u8) -> c_int;
type SetGPIOInOut = unsafe extern "system" fn(id: c_int, output: u8, input: *mut u8) -> c_int;

struct FrameSlot {
    callback: FrameCallback,
    pixel_depth: usize,
}

static FRAME_SLOT: Mutex<Option<FrameSlot>> = Mutex::new(None);
static FAULT_SLOT: Mutex<Option<FaultCallback>> = Mutex::new(None);

unsafe extern "system" fn frame_trampoline(property: *mut RawFrameProperty, frame: *mut u8) {
    if property.is_null() || frame.is_null() {
        return;
    }
    // SAFETY: the engine passes a valid property record for the duration of the call.
    let metadata = FrameMetadata::from(unsafe { &*property });

    let mut slot = FRAME_SLOT.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(slot) = slot.as_mut() else {
        return;
    };
    let Some(len) = metadata.frame_len(slot.pixel_depth) else {
        return;
    };
    // SAFETY: the engine's frame holds rows * columns * depth bytes and stays
    // valid until the hook returns.
    let pixels = unsafe { std::slice::from_raw_parts(frame.cast_const(), len) };
    (slot.callback)(&metadata, pixels);
}

unsafe extern "system" fn fault_trampoline(_image_type: c_int) {
    let mut slot = FAULT_SLOT.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(callback) = slot.as_mut() {
        callback();
    }
}

fn symbol<T: Copy>(library: &Library, name: &str) -> Result<T> {
    let mut name = name.as_bytes().to_vec();
    name.push(0);
    // SAFETY: every requested type matches the vendor header for that name.
    unsafe { library.get::<T>(&name) }
        .map(|symbol| *symbol)
        .map_err(|err| CameraError::SdkUnavailable(format!("missing entry point: {err}")))
}

const fn int(value: u32) -> c_int {
    if value > i32::MAX as u32 {
        i32::MAX
    } else {
        value as c_int
    }
}

/// Engine backed by the vendor's shared library.
pub struct SdkEngine {
    init_device: InitDevice,
    uninit_device: UnInitDevice,
    get_module_no_serial_no: GetModuleNoSerialNo,
    add_device_to_working_set: WorkingSet,
    remove_device_from_working_set: WorkingSet,
    start_camera_engine: StartCameraEngine,
    stop_camera_engine: NoArgs,
    set_camera_work_mode: SetCameraWorkMode,
    show_factory_control_panel: ShowFactoryControlPanel,
    hide_factory_control_panel: NoArgs,
    start_frame_grab: StartFrameGrab,
    stop_frame_grab: NoArgs,
    set_customized_resolution: SetCustomizedResolution,
    set_xy_start: SetXYStart,
    set_gains: SetGains,
    set_exposure_time: SetExposureTime,
    set_gamma: SetGamma,
    set_bw_mode: SetBWMode,
    install_frame_hooker: InstallFrameHooker,
    install_usb_device_hooker: InstallUSBDeviceHooker,
    set_gpio_config: SetGPIOConfig,
    set_gpio_in_out: SetGPIOInOut,
    bits: CameraBits,
    // Keeps every function pointer above valid; dropped last.
    _library: Library,
}

impl std::fmt::Debug for SdkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkEngine")
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

impl SdkEngine {
    /// Load the vendor library from `path` and resolve every entry point.
    pub fn load<P: AsRef<OsStr>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initialisers; the vendor library has none
        // with preconditions.
        let library = unsafe { Library::new(path) }.map_err(|err| {
            CameraError::SdkUnavailable(format!("failed to load {}: {err}", path.to_string_lossy()))
        })?;
        debug!(library = %path.to_string_lossy(), "camera SDK loaded");

        Ok(Self {
            init_device: symbol(&library, "BUFCCDUSB_InitDevice")?,
            uninit_device: symbol(&library, "BUFCCDUSB_UnInitDevice")?,
            get_module_no_serial_no: symbol(&library, "BUFCCDUSB_GetModuleNoSerialNo")?,
            add_device_to_working_set: symbol(&library, "BUFCCDUSB_AddDeviceToWorkingSet")?,
            remove_device_from_working_set: symbol(
                &library,
                "BUFCCDUSB_RemoveDeviceFromWorkingSet",
            )?,
            start_camera_engine: symbol(&library, "BUFCCDUSB_StartCameraEngine")?,
            stop_camera_engine: symbol(&library, "BUFCCDUSB_StopCameraEngine")?,
            set_camera_work_mode: symbol(&library, "BUFCCDUSB_SetCameraWorkMode")?,
            show_factory_control_panel: symbol(&library, "BUFCCDUSB_ShowFactoryControlPanel")?,
            hide_factory_control_panel: symbol(&library, "BUFCCDUSB_HideFactoryControlPanel")?,
            start_frame_grab: symbol(&library, "BUFCCDUSB_StartFrameGrab")?,
            stop_frame_grab: symbol(&library, "BUFCCDUSB_StopFrameGrab")?,
            set_customized_resolution: symbol(&library, "BUFCCDUSB_SetCustomizedResolution")?,
            set_xy_start: symbol(&library, "BUFCCDUSB_SetXYStart")?,
            set_gains: symbol(&library, "BUFCCDUSB_SetGains")?,
            set_exposure_time: symbol(&library, "BUFCCDUSB_SetExposureTime")?,
            set_gamma: symbol(&library, "BUFCCDUSB_SetGamma")?,
            set_bw_mode: symbol(&library, "BUFCCDUSB_SetBWMode")?,
            install_frame_hooker: symbol(&library, "BUFCCDUSB_InstallFrameHooker")?,
            install_usb_device_hooker: symbol(&library, "BUFCCDUSB_InstallUSBDeviceHooker")?,
            set_gpio_config: symbol(&library, "BUFCCDUSB_SetGPIOConfig")?,
            set_gpio_in_out: symbol(&library, "BUFCCDUSB_SetGPIOInOut")?,
            bits: CameraBits::default(),
            _library: library,
        })
    }

    /// Load the vendor library by its default name.
    pub fn load_default() -> Result<Self> {
        Self::load(DEFAULT_LIBRARY)
    }
}

impl Drop for SdkEngine {
    fn drop(&mut self) {
        // The trampolines must not outlive the library they were installed into.
        // SAFETY: unhooking with null is always valid.
        unsafe {
            (self.install_frame_hooker)(FrameType::Raw as c_int, None);
            (self.install_usb_device_hooker)(None);
        }
        FRAME_SLOT
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        FAULT_SLOT
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

// SAFETY (all calls below): arguments are plain integers or pointers to
// buffers that outlive the call, matching the vendor header.
impl DeviceEngine for SdkEngine {
    fn init_device(&mut self) -> Status {
        Status(unsafe { (self.init_device)() })
    }

    fn uninit_device(&mut self) -> Status {
        Status(unsafe { (self.uninit_device)() })
    }

    fn query_identity(&mut self, camera: CameraId) -> std::result::Result<CameraIdentity, Status> {
        let mut module = [0u8; IDENTITY_LEN];
        let mut serial = [0u8; IDENTITY_LEN];
        let status = Status(unsafe {
            (self.get_module_no_serial_no)(
                int(camera.get()),
                module.as_mut_ptr().cast(),
                serial.as_mut_ptr().cast(),
            )
        });
        if status.is_failure() {
            return Err(status);
        }
        let text = |bytes: &[u8]| {
            CStr::from_bytes_until_nul(bytes)
                .map(|text| text.to_string_lossy().trim().to_owned())
                .unwrap_or_default()
        };
        Ok(CameraIdentity {
            module_no: text(&module),
            serial_no: text(&serial),
        })
    }

    fn add_to_working_set(&mut self, camera: CameraId) -> Status {
        Status(unsafe { (self.add_device_to_working_set)(int(camera.get())) })
    }

    fn remove_from_working_set(&mut self, camera: CameraId) -> Status {
        Status(unsafe { (self.remove_device_from_working_set)(int(camera.get())) })
    }

    fn start_engine(&mut self, context: HostContext, bits: CameraBits) -> Status {
        self.bits = bits;
        let parent = context.0 as *mut c_void;
        Status(unsafe { (self.start_camera_engine)(parent, bits as c_uint) })
    }

    fn stop_engine(&mut self) -> Status {
        Status(unsafe { (self.stop_camera_engine)() })
    }

    fn set_work_mode(&mut self, camera: CameraId, mode: WorkMode) -> Status {
        Status(unsafe { (self.set_camera_work_mode)(int(camera.get()), mode as c_int) })
    }

    fn show_factory_panel(&mut self, camera: CameraId, password: &str) -> Status {
        let Ok(password) = CString::new(password) else {
            warn!("factory panel password contains a NUL byte");
            return Status::FAILED;
        };
        Status(unsafe { (self.show_factory_control_panel)(int(camera.get()), password.as_ptr()) })
    }

    fn hide_factory_panel(&mut self) -> Status {
        Status(unsafe { (self.hide_factory_control_panel)() })
    }

    fn apply_resolution(
        &mut self,
        camera: CameraId,
        row: u32,
        column: u32,
        bin: BinMode,
        buffer_count: u32,
    ) -> Status {
        Status(unsafe {
            (self.set_customized_resolution)(
                int(camera.get()),
                int(row),
                int(column),
                c_int::from(bin.code()),
                int(buffer_count),
            )
        })
    }

    fn apply_roi(&mut self, camera: CameraId, x_start: u32, y_start: u32) -> Status {
        Status(unsafe { (self.set_xy_start)(int(camera.get()), int(x_start), int(y_start)) })
    }

    fn apply_gains(&mut self, camera: CameraId, gains: Gains) -> Status {
        Status(unsafe {
            (self.set_gains)(
                int(camera.get()),
                c_int::from(gains.red),
                c_int::from(gains.green),
                c_int::from(gains.blue),
            )
        })
    }

    fn apply_exposure(&mut self, camera: CameraId, ticks: u32) -> Status {
        Status(unsafe { (self.set_exposure_time)(int(camera.get()), int(ticks)) })
    }

    fn apply_gamma(&mut self, tone: ToneSettings) -> Status {
        Status(unsafe {
            (self.set_gamma)(
                c_int::from(tone.gamma),
                c_int::from(tone.contrast),
                c_int::from(tone.brightness),
                tone.sharpness as c_int,
            )
        })
    }

    fn apply_display_mode(&mut self, mode: DisplayMode) -> Status {
        Status(unsafe {
            (self.set_bw_mode)(
                c_int::from(mode.black_white),
                c_int::from(mode.horizontal_mirror),
                c_int::from(mode.vertical_flip),
            )
        })
    }

    fn install_frame_callback(
        &mut self,
        frame_type: FrameType,
        callback: Option<FrameCallback>,
    ) -> Status {
        let hook = callback.is_some().then_some(frame_trampoline as FrameHook);
        *FRAME_SLOT.lock().unwrap_or_else(PoisonError::into_inner) =
            callback.map(|callback| FrameSlot {
                callback,
                pixel_depth: pixel_depth_bytes(frame_type, self.bits),
            });
        Status(unsafe { (self.install_frame_hooker)(frame_type as c_int, hook) })
    }

    fn install_fault_callback(&mut self, callback: Option<FaultCallback>) -> Status {
        let hook = callback.is_some().then_some(fault_trampoline as DeviceHook);
        *FAULT_SLOT.lock().unwrap_or_else(PoisonError::into_inner) = callback;
        Status(unsafe { (self.install_usb_device_hooker)(hook) })
    }

    fn start_grab(&mut self, frames: GrabCount) -> Status {
        Status(unsafe { (self.start_frame_grab)(frames.native()) })
    }

    fn stop_grab(&mut self) -> Status {
        Status(unsafe { (self.stop_frame_grab)() })
    }

    fn set_gpio_config(&mut self, camera: CameraId, config: u8) -> Status {
        Status(unsafe { (self.set_gpio_config)(int(camera.get()), config) })
    }

    fn gpio_write_read(&mut self, camera: CameraId, output: u8) -> std::result::Result<u8, Status> {
        let mut input = 0u8;
        let status = Status(unsafe { (self.set_gpio_in_out)(int(camera.get()), output, &mut input) });
        if status.is_failure() {
            Err(status)
        } else {
            Ok(input)
        }
    }
}
