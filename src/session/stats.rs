use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use super::events::ConnectionStatus;

/// Statistics about the current (or last) session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Lifecycle state
    pub status: ConnectionStatus,

    /// When the last start began
    pub started_at: Option<DateTime<Utc>>,

    /// Microphone frames handed to the live session
    pub frames_sent: u64,

    /// Inbound audio chunks scheduled for playback
    pub chunks_scheduled: u64,

    /// Inbound audio chunks that played to the end
    pub chunks_played: u64,

    /// Inbound audio chunks skipped because they failed to decode
    pub decode_errors: u64,

    /// Whether model audio is pending
    pub speaking: bool,
}

/// Counters shared between the core and its tasks
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub started_at: Mutex<Option<DateTime<Utc>>>,
    pub frames_sent: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub chunks_played: AtomicU64,
    pub decode_errors: AtomicU64,
    pub speaking: AtomicBool,
}

impl SessionCounters {
    pub fn reset(&self) {
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        self.frames_sent.store(0, Ordering::SeqCst);
        self.chunks_scheduled.store(0, Ordering::SeqCst);
        self.chunks_played.store(0, Ordering::SeqCst);
        self.decode_errors.store(0, Ordering::SeqCst);
        self.speaking.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self, status: ConnectionStatus) -> SessionStats {
        SessionStats {
            status,
            started_at: *self.started_at.lock().unwrap_or_else(|e| e.into_inner()),
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::SeqCst),
            chunks_played: self.chunks_played.load(Ordering::SeqCst),
            decode_errors: self.decode_errors.load(Ordering::SeqCst),
            speaking: self.speaking.load(Ordering::SeqCst),
        }
    }
}
