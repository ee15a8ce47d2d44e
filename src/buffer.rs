//! Frame buffer ownership.

use tracing::debug;

use crate::traits::{CameraError, Result};

/// Dimensions a frame buffer is sized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Maximum frame width.
    pub max_x: u32,
    /// Maximum frame height.
    pub max_y: u32,
    /// Bytes per pixel.
    pub pixel_depth: usize,
}

impl FrameGeometry {
    /// Buffer size in bytes, or `None` on overflow.
    #[must_use]
    pub fn byte_len(&self) -> Option<usize> {
        usize::try_from(self.max_x)
            .ok()?
            .checked_mul(usize::try_from(self.max_y).ok()?)?
            .checked_mul(self.pixel_depth)
    }
}

/// Owns the single contiguous buffer frames are copied into.
///
/// The buffer is boxed so its address is stable while allocated.
#[derive(Debug, Default)]
pub struct FrameBufferManager {
    buffer: Option<Box<[u8]>>,
    geometry: Option<FrameGeometry>,
}

impl FrameBufferManager {
    /// A manager with nothing allocated.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: None,
            geometry: None,
        }
    }

    /// Allocate a zeroed buffer for `geometry`.
    ///
    /// A buffer already sized for the same geometry is kept; any other
    /// buffer is released first. Returns the buffer size in bytes.
    pub fn allocate(&mut self, geometry: FrameGeometry) -> Result<usize> {
        if self.geometry == Some(geometry) {
            if let Some(buffer) = &self.buffer {
                return Ok(buffer.len());
            }
        }
        self.free();

        let bytes = geometry
            .byte_len()
            .ok_or(CameraError::ResourceFailure { bytes: usize::MAX })?;
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(bytes)
            .map_err(|_| CameraError::ResourceFailure { bytes })?;
        memory.resize(bytes, 0);

        debug!(
            bytes,
            max_x = geometry.max_x,
            max_y = geometry.max_y,
            "frame buffer allocated"
        );
        self.buffer = Some(memory.into_boxed_slice());
        self.geometry = Some(geometry);
        Ok(bytes)
    }

    /// Reallocate if a buffer is held and `geometry` differs from its own.
    ///
    /// Nothing is allocated when no buffer is held.
    pub fn resize(&mut self, geometry: FrameGeometry) -> Result<()> {
        if self.buffer.is_some() && self.geometry != Some(geometry) {
            self.allocate(geometry)?;
        }
        Ok(())
    }

    /// Release the buffer. Freeing an empty manager is a no-op.
    ///
    /// Returns whether anything was released.
    pub fn free(&mut self) -> bool {
        self.geometry = None;
        self.buffer.take().is_some_and(|buffer| {
            debug!(bytes = buffer.len(), "frame buffer freed");
            true
        })
    }

    /// Whether a buffer is held.
    pub const fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    /// Size of the held buffer in bytes, 0 when none.
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, |buffer| buffer.len())
    }

    /// Whether no bytes are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geometry of the held buffer.
    pub const fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    /// Copy a frame into the buffer and borrow the written prefix.
    ///
    /// Returns `None` when nothing is allocated or the frame does not fit.
    pub fn store(&mut self, frame: &[u8]) -> Option<&[u8]> {
        let target = self.buffer.as_mut()?.get_mut(..frame.len())?;
        target.copy_from_slice(frame);
        Some(target)
    }
}
