pub mod audio;
pub mod coach;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod session;
pub mod transcript;
pub mod usage;

pub use audio::{
    AudioBackendFactory, AudioBuffer, AudioDevices, AudioFile, AudioFrame, AudioOutput,
    AudioSource, CaptureBackend, CaptureConfig, SystemDevices, VirtualClock, VirtualOutput,
};
pub use coach::{Coach, CoachStatus};
pub use config::Config;
pub use error::{CoachError, DecodeError, SessionError};
pub use http::{create_router, AppState};
pub use live::{GeminiLiveConnector, LiveConnector, LiveEvent, LiveSession};
pub use session::{ConnectionStatus, SessionConfig, SessionCore, SessionEvent, SessionStats, Speaker};
pub use transcript::{TranscriptEntry, TranscriptStore};
pub use usage::{UsageGate, UsageLimits, UserStats};
