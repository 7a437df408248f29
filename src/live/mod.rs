//! Duplex connection to the remote conversational model
//!
//! The session core depends only on [`LiveConnector`] and [`LiveSession`];
//! [`GeminiLiveConnector`] is the WebSocket implementation used in
//! production. Tests substitute their own connector.

mod client;
pub mod messages;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use client::{GeminiLiveConnector, GEMINI_LIVE_WS_URL};
pub use messages::{MediaBlob, ResponseModality, ServerContent, ServerMessage};

/// Everything needed to open one session
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Model id without the `models/` prefix
    pub model: String,
    pub api_key: String,
    pub response_modality: ResponseModality,
    pub input_transcription: bool,
    pub output_transcription: bool,
    /// Prebuilt voice name
    pub voice: String,
    pub system_instruction: String,
}

/// Asynchronous hooks of an open (or opening) session.
///
/// The events channel is handed to the connector before the connection is
/// awaited, so messages may arrive before `connect` returns.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Open,
    Message(ServerMessage),
    /// Transport failure after open. Detail is for logs only.
    Error(String),
    Close { reason: Option<String> },
}

/// Handle onto an open session
#[async_trait::async_trait]
pub trait LiveSession: Send + Sync {
    /// Send one realtime media chunk
    async fn send_realtime_input(&self, media: MediaBlob) -> Result<()>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Opens live sessions
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<LiveEvent>,
    ) -> Result<Arc<dyn LiveSession>>;
}
