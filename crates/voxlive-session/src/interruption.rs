use std::sync::Arc;
use voxlive_audio::PlaybackScheduler;

/// Barge-in handling: silences queued model speech when the user talks over it.
pub struct InterruptionController {
    scheduler: Arc<PlaybackScheduler>,
}

impl InterruptionController {
    pub fn new(scheduler: Arc<PlaybackScheduler>) -> Self {
        Self { scheduler }
    }

    /// Flush the playback timeline. Returns the number of cancelled buffers.
    pub fn interrupt(&self) -> usize {
        let cancelled = self.scheduler.flush();
        tracing::info!(cancelled, "playback interrupted");
        cancelled
    }
}
