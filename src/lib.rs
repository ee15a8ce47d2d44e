//! Bufccd-Capture: control and frame acquisition for USB CCD cameras
//!
//! This library wraps the vendor camera engine behind the [`DeviceEngine`]
//! trait and layers a lifecycle-checked [`Camera`] session on top of it,
//! enabling both production use with the vendor SDK and testing with a mock
//! engine.

pub mod buffer;
pub mod camera;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod logger;
pub mod sdk;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use camera::{Camera, FACTORY_PANEL_PASSWORD};
pub use config::{BinMode, DisplayMode, Gains, ImageConfig, Resolution, ToneSettings};
pub use dispatch::{DispatchStats, FrameConsumer, FrameEvent};
pub use lifecycle::{LifecycleState, Operation};
pub use sdk::SdkEngine;
pub use traits::{
    CameraBits, CameraError, CameraId, CameraIdentity, DeviceEngine, FrameMetadata, FrameType,
    GrabCount, HostContext, WorkMode,
};
