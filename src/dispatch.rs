//! Frame dispatch toward the external consumer.
//!
//! The engine delivers frames one at a time on its delivery context. The
//! dispatcher copies each frame into the managed buffer, derives the average
//! intensity and hands both to the [`FrameConsumer`] before returning.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use tracing::{error, info, trace, warn};

use crate::buffer::FrameBufferManager;
use crate::traits::{FaultCallback, FrameCallback, FrameMetadata, GrabCount};

/// One delivered frame as seen by the consumer.
///
/// `pixels` borrows the frame buffer and cannot outlive the callback.
#[derive(Debug)]
pub struct FrameEvent<'a> {
    /// Engine metadata for this frame.
    pub metadata: FrameMetadata,
    /// Mean byte value over the frame.
    pub average: u32,
    /// Frame bytes, `rows * columns * pixel_depth` long.
    pub pixels: &'a [u8],
}

/// Receives frames and device faults.
///
/// Called on the engine's delivery context; implementations must not block.
pub trait FrameConsumer: Send {
    /// Handle one frame.
    fn on_frame(&mut self, event: &FrameEvent<'_>);

    /// The USB device reported a fault.
    fn on_device_fault(&mut self) {}
}

impl<F> FrameConsumer for F
where
    F: FnMut(&FrameEvent<'_>) + Send,
{
    fn on_frame(&mut self, event: &FrameEvent<'_>) {
        self(event);
    }
}

/// Average byte value of `pixels` using integer division. 0 when empty.
#[must_use]
pub fn average_intensity(pixels: &[u8]) -> u32 {
    if pixels.is_empty() {
        return 0;
    }
    let sum: u64 = pixels.iter().map(|&byte| u64::from(byte)).sum();
    let count = pixels.len() as u64;
    u32::try_from(sum / count).unwrap_or(u32::MAX)
}

/// Counters kept across a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames handed to the consumer.
    pub delivered: u64,
    /// Frames discarded before reaching the consumer.
    pub dropped: u64,
    /// Average intensity of the last delivered frame.
    pub last_average: Option<u32>,
    /// A finite grab has delivered every frame it asked for. The engine has
    /// stopped on its own; the session still has to call `stop_grab`.
    pub budget_exhausted: bool,
}

/// Turns engine frame notifications into [`FrameEvent`]s.
pub struct FrameDispatcher {
    consumer: Option<Box<dyn FrameConsumer>>,
    buffer: FrameBufferManager,
    pixel_depth: usize,
    budget: GrabCount,
    grabbed: u64,
    stats: DispatchStats,
}

impl std::fmt::Debug for FrameDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDispatcher")
            .field("has_consumer", &self.consumer.is_some())
            .field("buffer", &self.buffer)
            .field("pixel_depth", &self.pixel_depth)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDispatcher {
    /// A dispatcher with no consumer and no buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            consumer: None,
            buffer: FrameBufferManager::new(),
            pixel_depth: 3,
            budget: GrabCount::Infinite,
            grabbed: 0,
            stats: DispatchStats {
                delivered: 0,
                dropped: 0,
                last_average: None,
                budget_exhausted: false,
            },
        }
    }

    /// Replace the consumer.
    pub fn set_consumer(&mut self, consumer: Option<Box<dyn FrameConsumer>>) {
        self.consumer = consumer;
    }

    /// The managed frame buffer.
    pub const fn buffer(&self) -> &FrameBufferManager {
        &self.buffer
    }

    /// The managed frame buffer, mutably.
    pub fn buffer_mut(&mut self) -> &mut FrameBufferManager {
        &mut self.buffer
    }

    /// Session counters.
    pub const fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Prepare for a new grab.
    pub fn begin_grab(&mut self, pixel_depth: usize, budget: GrabCount) {
        self.pixel_depth = pixel_depth;
        self.budget = budget;
        self.grabbed = 0;
        self.stats.budget_exhausted = false;
    }

    /// Handle one engine frame notification.
    pub fn dispatch(&mut self, metadata: &FrameMetadata, frame: &[u8]) {
        let Some(expected) = metadata.frame_len(self.pixel_depth) else {
            self.drop_frame(metadata, "frame size overflows");
            return;
        };
        let Some(delivered) = frame.get(..expected) else {
            self.drop_frame(metadata, "frame shorter than rows x columns x depth");
            return;
        };
        let Some(pixels) = self.buffer.store(delivered) else {
            self.drop_frame(metadata, "frame does not fit the frame buffer");
            return;
        };

        let average = average_intensity(pixels);
        trace!(
            camera = metadata.camera_id,
            timestamp = metadata.timestamp,
            average,
            "frame"
        );
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.on_frame(&FrameEvent {
                metadata: *metadata,
                average,
                pixels,
            });
        }

        self.stats.delivered += 1;
        self.stats.last_average = Some(average);
        self.grabbed += 1;
        if let GrabCount::Frames(budget) = self.budget {
            if self.grabbed == u64::from(budget) {
                self.stats.budget_exhausted = true;
                info!(frames = budget, "frame budget exhausted, stop_grab still required");
            }
        }
    }

    /// Forward a device fault.
    pub fn fault(&mut self) {
        error!("camera reported a USB device fault");
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.on_device_fault();
        }
    }

    fn drop_frame(&mut self, metadata: &FrameMetadata, reason: &str) {
        self.stats.dropped += 1;
        warn!(
            camera = metadata.camera_id,
            rows = metadata.rows,
            columns = metadata.columns,
            reason,
            "frame dropped"
        );
    }
}

/// Dispatcher shared between a session and the callbacks it installs.
pub type SharedDispatcher = Arc<Mutex<FrameDispatcher>>;

/// Build the frame callback handed to the engine.
///
/// Delivery never blocks: if the dispatcher is busy (an overlapping or
/// reentrant delivery) the frame is dropped with a warning.
pub fn frame_callback(dispatcher: &SharedDispatcher) -> FrameCallback {
    let dispatcher = Arc::clone(dispatcher);
    Box::new(move |metadata, frame| match dispatcher.try_lock() {
        Ok(mut guard) => guard.dispatch(metadata, frame),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().dispatch(metadata, frame),
        Err(TryLockError::WouldBlock) => {
            warn!(camera = metadata.camera_id, "dispatcher busy, frame dropped");
        }
    })
}

/// Build the device fault callback handed to the engine.
pub fn fault_callback(dispatcher: &SharedDispatcher) -> FaultCallback {
    let dispatcher = Arc::clone(dispatcher);
    Box::new(move || {
        dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fault();
    })
}
