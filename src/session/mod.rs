//! Audio session management
//!
//! This module provides the `SessionCore` abstraction that manages:
//! - Microphone capture forwarded to the live model
//! - Gapless playback of the model's audio with barge-in
//! - Demultiplexing of transcription and lifecycle events
//! - Teardown of every acquired resource on stop or failure

mod config;
mod events;
pub mod playback;
mod session;
mod stats;

pub use config::{SessionConfig, MODEL_NAME, SYSTEM_INSTRUCTION, VOICE_NAME};
pub use events::{ConnectionStatus, SessionEvent, Speaker};
pub use playback::PlaybackScheduler;
pub use session::SessionCore;
pub use stats::SessionStats;
