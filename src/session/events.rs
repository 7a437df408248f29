use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Lifecycle of a session core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Active,
    Error,
}

/// Who a transcription fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// Notifications from a running session to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A fragment of either side's speech
    Transcription { speaker: Speaker, text: String },
    /// The model finished its turn
    TurnComplete,
    /// Model audio started (true) or drained / was cut off (false)
    Speaking(bool),
    /// Asynchronous failure after start returned
    Error(SessionError),
    /// Remote side ended the session normally
    Closed,
}
