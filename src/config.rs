//! Image configuration and its validation.
//!
//! [`ConfigStore`] holds the desired configuration. Each `stage_*` method
//! validates its input, updates the stored value and returns what has to be
//! pushed to the engine. Staged values are kept even if the push later fails.

use crate::traits::{CameraError, Result};

/// Engine exposure tick length in microseconds.
pub const MICROS_PER_TICK: u32 = 50;

/// Shortest exposure: one tick.
pub const MIN_EXPOSURE_US: u32 = MICROS_PER_TICK;

/// Longest exposure: 200 s.
pub const MAX_EXPOSURE_US: u32 = 200_000_000;

/// Highest value of each RGB gain (actual gain is value / 8).
pub const MAX_GAIN: u8 = 128;

/// Highest gamma value (0..=20 means 0.0..=2.0).
pub const MAX_GAMMA: u8 = 20;

/// Highest contrast or brightness percentage.
pub const MAX_PERCENT: u8 = 100;

/// Engine-side frame buffers requested with every resolution change.
pub const ENGINE_BUFFER_COUNT: u32 = 4;

/// Resolution class, each with a fixed frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    /// 1392 x 256.
    Tiny = 0,
    /// 1392 x 344.
    Little = 1,
    /// 1392 x 520.
    Small = 2,
    /// 1392 x 1040.
    #[default]
    Normal = 3,
}

impl Resolution {
    /// All resolution classes.
    pub const ALL: [Self; 4] = [Self::Tiny, Self::Little, Self::Small, Self::Normal];

    /// Frame bounds `(max_x, max_y)` for this class.
    #[must_use]
    pub const fn max_xy(self) -> (u32, u32) {
        match self {
            Self::Tiny => (1392, 256),
            Self::Little => (1392, 344),
            Self::Small => (1392, 520),
            Self::Normal => (1392, 1040),
        }
    }
}

impl TryFrom<i32> for Resolution {
    type Error = CameraError;

    fn try_from(value: i32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|resolution| *resolution as i32 == value)
            .ok_or_else(|| CameraError::invalid("resolution", format!("{value} is not defined")))
    }
}

/// Bin mode, using the engine's codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinMode {
    /// Full resolution.
    #[default]
    NoBin = 0x00,
    /// 1:2 bin.
    Bin1x2 = 0x81,
    /// 1:3 bin.
    Bin1x3 = 0x82,
    /// 1:4 bin.
    Bin1x4 = 0x83,
    /// 1:4 skip.
    Skip = 0x03,
}

impl BinMode {
    /// The engine code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for BinMode {
    type Error = CameraError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(Self::NoBin),
            0x81 => Ok(Self::Bin1x2),
            0x82 => Ok(Self::Bin1x3),
            0x83 => Ok(Self::Bin1x4),
            0x03 => Ok(Self::Skip),
            _ => Err(CameraError::invalid(
                "bin mode",
                format!("{code:#04x} is not a bin mode"),
            )),
        }
    }
}

/// Sharpness level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum Sharpness {
    #[default]
    Normal = 0,
    Sharp = 1,
    Sharper = 2,
    Sharpest = 3,
}

/// RGB gains, each in `0..=128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Gains {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            red: 14,
            green: 14,
            blue: 14,
        }
    }
}

/// Gamma, contrast, brightness and sharpness, applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToneSettings {
    /// `0..=20`, meaning 0.0 to 2.0.
    pub gamma: u8,
    /// Percent.
    pub contrast: u8,
    /// Percent.
    pub brightness: u8,
    /// Sharpness level.
    pub sharpness: Sharpness,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            gamma: 10,
            contrast: 50,
            brightness: 50,
            sharpness: Sharpness::Normal,
        }
    }
}

/// Black-and-white, mirror and flip flags, applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DisplayMode {
    /// Monochrome output.
    pub black_white: bool,
    /// Mirror horizontally.
    pub horizontal_mirror: bool,
    /// Flip vertically.
    pub vertical_flip: bool,
}

/// Complete desired image configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    /// Resolution class.
    pub resolution: Resolution,
    /// Frame row size pushed with the resolution.
    pub row_size: u32,
    /// Frame column size pushed with the resolution.
    pub column_size: u32,
    /// Bin mode.
    pub bin: BinMode,
    /// ROI origin x.
    pub x_start: u32,
    /// ROI origin y.
    pub y_start: u32,
    /// RGB gains.
    pub gains: Gains,
    /// Exposure in microseconds.
    pub exposure_us: u32,
    /// Tone settings.
    pub tone: ToneSettings,
    /// Display flags.
    pub display: DisplayMode,
}

impl Default for ImageConfig {
    fn default() -> Self {
        let resolution = Resolution::default();
        let (row_size, column_size) = resolution.max_xy();
        Self {
            resolution,
            row_size,
            column_size,
            bin: BinMode::default(),
            x_start: 0,
            y_start: 0,
            gains: Gains::default(),
            exposure_us: 5_000,
            tone: ToneSettings::default(),
            display: DisplayMode::default(),
        }
    }
}

/// Exposure staged for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedExposure {
    /// Stored microsecond value.
    pub micros: u32,
    /// Native ticks to push.
    pub ticks: u32,
}

/// Validates and stages configuration changes.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config: ImageConfig,
    max_x: u32,
    max_y: u32,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// A store holding the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ImageConfig::default())
    }

    /// A store holding `config`; bounds follow its resolution class.
    #[must_use]
    pub fn with_config(config: ImageConfig) -> Self {
        let (max_x, max_y) = config.resolution.max_xy();
        Self {
            config,
            max_x,
            max_y,
        }
    }

    /// The current configuration.
    pub const fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Frame bounds `(max_x, max_y)` of the current resolution.
    pub const fn max_xy(&self) -> (u32, u32) {
        (self.max_x, self.max_y)
    }

    /// Exposure in microseconds.
    pub const fn exposure_us(&self) -> u32 {
        self.config.exposure_us
    }

    /// Update resolution class and bin mode, recomputing the bounds.
    ///
    /// An ROI origin outside the new bounds is clamped to the last valid
    /// row and column.
    pub fn stage_resolution(&mut self, resolution: Resolution, bin: BinMode) {
        let (max_x, max_y) = resolution.max_xy();
        self.max_x = max_x;
        self.max_y = max_y;
        self.config.resolution = resolution;
        self.config.row_size = max_x;
        self.config.column_size = max_y;
        self.config.bin = bin;
        self.config.x_start = self.config.x_start.min(max_x.saturating_sub(1));
        self.config.y_start = self.config.y_start.min(max_y.saturating_sub(1));
    }

    /// ROI origin `(x_start, y_start)`.
    pub const fn roi(&self) -> (u32, u32) {
        (self.config.x_start, self.config.y_start)
    }

    /// Like [`Self::stage_resolution`] for a raw class index. An undefined
    /// index is rejected and the bounds stay as they were.
    pub fn stage_resolution_index(&mut self, index: i32, bin: BinMode) -> Result<Resolution> {
        let resolution = Resolution::try_from(index)?;
        self.stage_resolution(resolution, bin);
        Ok(resolution)
    }

    /// Validate and store the ROI origin.
    pub fn stage_roi(&mut self, x_start: u32, y_start: u32) -> Result<()> {
        if x_start >= self.max_x {
            return Err(CameraError::invalid(
                "roi x start",
                format!("{x_start} is outside 0..{}", self.max_x),
            ));
        }
        if y_start >= self.max_y {
            return Err(CameraError::invalid(
                "roi y start",
                format!("{y_start} is outside 0..{}", self.max_y),
            ));
        }
        self.config.x_start = x_start;
        self.config.y_start = y_start;
        Ok(())
    }

    /// Validate and store RGB gains.
    pub fn stage_gains(&mut self, gains: Gains) -> Result<()> {
        for (name, value) in [
            ("red gain", gains.red),
            ("green gain", gains.green),
            ("blue gain", gains.blue),
        ] {
            if value > MAX_GAIN {
                return Err(CameraError::invalid(
                    name,
                    format!("{value} is outside 0..={MAX_GAIN}"),
                ));
            }
        }
        self.config.gains = gains;
        Ok(())
    }

    /// Store an exposure given in milliseconds.
    pub fn stage_exposure_ms(&mut self, millis: u32) -> Result<StagedExposure> {
        let micros = millis.checked_mul(1000).ok_or_else(|| {
            CameraError::invalid("exposure", format!("{millis} ms overflows microseconds"))
        })?;
        self.stage_exposure_us(micros)
    }

    /// Store an exposure given in microseconds. It must be a whole number
    /// of ticks.
    pub fn stage_exposure_us(&mut self, micros: u32) -> Result<StagedExposure> {
        if !(MIN_EXPOSURE_US..=MAX_EXPOSURE_US).contains(&micros) {
            return Err(CameraError::invalid(
                "exposure",
                format!("{micros} us is outside {MIN_EXPOSURE_US}..={MAX_EXPOSURE_US}"),
            ));
        }
        if micros % MICROS_PER_TICK != 0 {
            return Err(CameraError::invalid(
                "exposure",
                format!("{micros} us is not a multiple of {MICROS_PER_TICK} us"),
            ));
        }
        self.config.exposure_us = micros;
        Ok(StagedExposure {
            micros,
            ticks: micros / MICROS_PER_TICK,
        })
    }

    /// Validate and store tone settings.
    pub fn stage_tone(&mut self, tone: ToneSettings) -> Result<()> {
        if tone.gamma > MAX_GAMMA {
            return Err(CameraError::invalid(
                "gamma",
                format!("{} is outside 0..={MAX_GAMMA}", tone.gamma),
            ));
        }
        if tone.contrast > MAX_PERCENT {
            return Err(CameraError::invalid(
                "contrast",
                format!("{} is outside 0..={MAX_PERCENT}", tone.contrast),
            ));
        }
        if tone.brightness > MAX_PERCENT {
            return Err(CameraError::invalid(
                "brightness",
                format!("{} is outside 0..={MAX_PERCENT}", tone.brightness),
            ));
        }
        self.config.tone = tone;
        Ok(())
    }

    /// Store display flags. Every combination is valid.
    pub fn stage_display(&mut self, display: DisplayMode) {
        self.config.display = display;
    }
}
