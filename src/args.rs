use clap::Parser;
use std::path::PathBuf;

use bufccd_capture::config::{BinMode, DisplayMode, Gains, Resolution, Sharpness, ToneSettings};
use bufccd_capture::traits::{CameraBits, FrameType, GrabCount, WorkMode};

/// Resolution classes offered on the command line.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy)]
pub enum ResolutionArg {
    /// 1392 x 256
    Tiny,
    /// 1392 x 344
    Little,
    /// 1392 x 520
    Small,
    /// 1392 x 1040
    Normal,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::Tiny => Self::Tiny,
            ResolutionArg::Little => Self::Little,
            ResolutionArg::Small => Self::Small,
            ResolutionArg::Normal => Self::Normal,
        }
    }
}

/// Bin modes offered on the command line.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy)]
pub enum BinArg {
    /// No binning
    None,
    /// Combine 1x2 pixels
    Bin1x2,
    /// Combine 1x3 pixels
    Bin1x3,
    /// Combine 1x4 pixels
    Bin1x4,
    /// Skip mode
    Skip,
}

impl From<BinArg> for BinMode {
    fn from(value: BinArg) -> Self {
        match value {
            BinArg::None => Self::NoBin,
            BinArg::Bin1x2 => Self::Bin1x2,
            BinArg::Bin1x3 => Self::Bin1x3,
            BinArg::Bin1x4 => Self::Bin1x4,
            BinArg::Skip => Self::Skip,
        }
    }
}

/// Acquisition modes.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy)]
pub enum WorkModeArg {
    /// Continuous video
    Video,
    /// One frame per external trigger
    Trigger,
}

impl From<WorkModeArg> for WorkMode {
    fn from(value: WorkModeArg) -> Self {
        match value {
            WorkModeArg::Video => Self::Video,
            WorkModeArg::Trigger => Self::ExternalTrigger,
        }
    }
}

/// Frame data delivered to the callback.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy)]
pub enum FrameTypeArg {
    /// Raw sensor data
    Raw,
    /// 24-bit bitmap data
    Dib,
}

impl From<FrameTypeArg> for FrameType {
    fn from(value: FrameTypeArg) -> Self {
        match value {
            FrameTypeArg::Raw => Self::Raw,
            FrameTypeArg::Dib => Self::Dib,
        }
    }
}

/// Sharpness levels.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy)]
pub enum SharpnessArg {
    /// No sharpening
    Normal,
    /// Light sharpening
    Sharp,
    /// Medium sharpening
    Sharper,
    /// Strong sharpening
    Sharpest,
}

impl From<SharpnessArg> for Sharpness {
    fn from(value: SharpnessArg) -> Self {
        match value {
            SharpnessArg::Normal => Self::Normal,
            SharpnessArg::Sharp => Self::Sharp,
            SharpnessArg::Sharper => Self::Sharper,
            SharpnessArg::Sharpest => Self::Sharpest,
        }
    }
}

/// Command-line arguments for the capture tool.
///
/// Every option can also be given through the environment variable named
/// next to it.
///
/// # Example
///
/// ```bash
/// bufccd-capture --resolution small --exposure-ms 20 --frames 10
/// ```
#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the vendor camera library (defaults to the platform library name)
    #[arg(long, env = "BUFCCD_SDK")]
    pub sdk: Option<PathBuf>,

    /// Camera number, starting at 1
    #[arg(short, long, env = "CAMERA", default_value = "1")]
    pub camera: u32,

    /// Resolution class
    #[arg(short, long, env = "RESOLUTION", default_value = "normal", value_enum)]
    pub resolution: ResolutionArg,

    /// Bin mode
    #[arg(long, env = "BIN", default_value = "none", value_enum)]
    pub bin: BinArg,

    /// ROI origin (x y)
    #[arg(
        long,
        env = "ROI",
        default_value = "0 0",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub roi: Vec<u32>,

    /// Exposure time in milliseconds
    #[arg(short, long, env = "EXPOSURE_MS", default_value = "5")]
    pub exposure_ms: u32,

    /// RGB gains (red green blue), each 0..=128
    #[arg(
        long,
        env = "GAINS",
        default_value = "14 14 14",
        value_delimiter = ' ',
        num_args = 3
    )]
    pub gains: Vec<u8>,

    /// Gamma, 0..=20 meaning 0.0 to 2.0
    #[arg(long, env = "GAMMA", default_value = "10")]
    pub gamma: u8,

    /// Contrast percent
    #[arg(long, env = "CONTRAST", default_value = "50")]
    pub contrast: u8,

    /// Brightness percent
    #[arg(long, env = "BRIGHTNESS", default_value = "50")]
    pub brightness: u8,

    /// Sharpness level
    #[arg(long, env = "SHARPNESS", default_value = "normal", value_enum)]
    pub sharpness: SharpnessArg,

    /// Monochrome output
    #[arg(long, env = "BLACK_WHITE")]
    pub black_white: bool,

    /// Mirror horizontally
    #[arg(long, env = "MIRROR")]
    pub mirror: bool,

    /// Flip vertically
    #[arg(long, env = "FLIP")]
    pub flip: bool,

    /// Acquisition mode
    #[arg(long, env = "WORK_MODE", default_value = "video", value_enum)]
    pub work_mode: WorkModeArg,

    /// Frame data type
    #[arg(long, env = "FRAME_TYPE", default_value = "dib", value_enum)]
    pub frame_type: FrameTypeArg,

    /// Use 12-bit sensor samples instead of 8-bit
    #[arg(long, env = "TWELVE_BIT")]
    pub twelve_bit: bool,

    /// Number of frames to grab, 0 for continuous capture
    #[arg(short, long, env = "FRAMES", default_value = "0")]
    pub frames: u32,

    /// Seconds to keep grabbing before shutting down
    #[arg(short, long, env = "DURATION", default_value = "10")]
    pub duration: u64,

    /// Show the factory control panel while grabbing
    #[arg(long, env = "FACTORY_PANEL")]
    pub factory_panel: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse arguments from the process command line and environment.
    pub fn load() -> Self {
        Self::parse()
    }

    /// ROI origin as `(x, y)`.
    pub fn roi(&self) -> (u32, u32) {
        match self.roi.as_slice() {
            [x, y] => (*x, *y),
            _ => (0, 0),
        }
    }

    pub fn gains(&self) -> Gains {
        match self.gains.as_slice() {
            [red, green, blue] => Gains {
                red: *red,
                green: *green,
                blue: *blue,
            },
            _ => Gains::default(),
        }
    }

    pub fn tone(&self) -> ToneSettings {
        ToneSettings {
            gamma: self.gamma,
            contrast: self.contrast,
            brightness: self.brightness,
            sharpness: self.sharpness.into(),
        }
    }

    pub const fn display(&self) -> DisplayMode {
        DisplayMode {
            black_white: self.black_white,
            horizontal_mirror: self.mirror,
            vertical_flip: self.flip,
        }
    }

    pub const fn bits(&self) -> CameraBits {
        if self.twelve_bit {
            CameraBits::Twelve
        } else {
            CameraBits::Eight
        }
    }

    pub const fn grab_count(&self) -> GrabCount {
        if self.frames == 0 {
            GrabCount::Infinite
        } else {
            GrabCount::Frames(self.frames)
        }
    }
}
