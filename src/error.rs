use thiserror::Error;

/// Failure to turn an inbound payload into playable audio.
///
/// Scoped to a single chunk: the session logs it and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("PCM payload of {len} bytes is not a multiple of {frame_bytes} ({channels} channel(s) x 2 bytes)")]
    MisalignedPcm {
        len: usize,
        channels: u16,
        frame_bytes: usize,
    },

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),
}

/// Errors surfaced by the session core to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Credential or configuration missing before anything was acquired.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Microphone or output device unavailable, or permission denied.
    #[error("audio device error: {0}")]
    Device(String),

    /// The remote session could not be opened.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport failure after the session was open. Intentionally opaque.
    #[error("the live session reported a protocol error")]
    Protocol,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("a session is already active on this instance")]
    AlreadyActive,

    /// `stop()` was called while `start()` was still in flight.
    #[error("session start was cancelled")]
    Cancelled,
}

/// Errors from the coach controller wrapping a session core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoachError {
    /// The usage limit for the current tier is reached.
    #[error("usage limit reached, upgrade required")]
    PaymentRequired,

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SessionError {
    /// Whether this error happened while a session was being set up.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            SessionError::Configuration(_) | SessionError::Device(_) | SessionError::Connection(_)
        )
    }
}
