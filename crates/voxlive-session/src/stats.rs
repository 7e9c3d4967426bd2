use std::sync::atomic::{AtomicU64, Ordering};
use voxlive_core::StatsSnapshot;

/// Per-session counters, updated from the session task and read by the UI.
#[derive(Debug, Default)]
pub struct SessionStats {
    chunks_sent: AtomicU64,
    bytes_sent: AtomicU64,
    audio_chunks_received: AtomicU64,
    malformed_dropped: AtomicU64,
    interruptions: AtomicU64,
    turns_completed: AtomicU64,
}

impl SessionStats {
    pub fn record_chunk_sent(&self, bytes: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_audio_received(&self) {
        self.audio_chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_turn(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.chunks_sent,
            &self.bytes_sent,
            &self.audio_chunks_received,
            &self.malformed_dropped,
            &self.interruptions,
            &self.turns_completed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            audio_chunks_received: self.audio_chunks_received.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
        }
    }
}
