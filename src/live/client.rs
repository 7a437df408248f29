use anyhow::{anyhow, bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::messages::{
    parse_server_message, AudioTranscriptionConfig, Content, GenerationConfig, MediaBlob,
    PrebuiltVoiceConfig, RealtimeInputMessage, Setup, SetupMessage, SpeechConfig,
    TextPart, VoiceConfig,
};
use super::{ConnectRequest, LiveConnector, LiveEvent, LiveSession};

/// Gemini Live WebSocket endpoint
pub const GEMINI_LIVE_WS_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outbound {
    Media(MediaBlob),
    Close,
}

/// Opens sessions against the Gemini Live API
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
    /// Upper bound for socket open + setup handshake
    connect_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
        }
    }
}

impl Default for GeminiLiveConnector {
    fn default() -> Self {
        Self::new(GEMINI_LIVE_WS_URL, Duration::from_secs(15))
    }
}

pub(crate) fn build_setup_message(request: &ConnectRequest) -> SetupMessage {
    let model = if request.model.starts_with("models/") {
        request.model.clone()
    } else {
        format!("models/{}", request.model)
    };

    SetupMessage {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![request.response_modality],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: request.voice.clone(),
                        },
                    },
                }),
            },
            system_instruction: (!request.system_instruction.is_empty()).then(|| Content {
                parts: vec![TextPart {
                    text: request.system_instruction.clone(),
                }],
            }),
            input_audio_transcription: request
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: request
                .output_transcription
                .then(AudioTranscriptionConfig::default),
        },
    }
}

/// JSON body of a frame, if it has one. The server sends JSON in binary
/// frames as well as text frames.
fn frame_json(msg: &WsMessage) -> Option<&str> {
    match msg {
        WsMessage::Text(text) => Some(text.as_str()),
        WsMessage::Binary(data) if data.first() == Some(&b'{') => std::str::from_utf8(data).ok(),
        _ => None,
    }
}

async fn open_and_setup(
    url: &str,
    request: &ConnectRequest,
    events: &mpsc::UnboundedSender<LiveEvent>,
) -> Result<WsStream> {
    let (mut ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .context("Failed to connect to Gemini Live")?;

    let setup = serde_json::to_string(&build_setup_message(request))?;
    ws.send(WsMessage::Text(setup.into()))
        .await
        .context("Failed to send setup message")?;

    while let Some(frame) = ws.next().await {
        let frame = frame.context("WebSocket error before setupComplete")?;
        if let WsMessage::Close(close) = &frame {
            bail!("Connection closed before setupComplete: {:?}", close);
        }

        let Some(text) = frame_json(&frame) else {
            continue;
        };
        match parse_server_message(text) {
            Ok(msg) if msg.is_setup_complete() => return Ok(ws),
            Ok(msg) => {
                if let Some(err) = &msg.error {
                    bail!("Server rejected setup: {}", err.message);
                }
                // Content racing the setup ack still goes to the session
                let _ = events.send(LiveEvent::Message(msg));
            }
            Err(e) => debug!("Ignoring unparsable frame during setup: {}", e),
        }
    }

    bail!("Stream ended before setupComplete")
}

#[async_trait::async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<LiveEvent>,
    ) -> Result<Arc<dyn LiveSession>> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}?key={}", self.endpoint, request.api_key);

        info!(
            session_id = %session_id,
            model = %request.model,
            voice = %request.voice,
            "Connecting to Gemini Live"
        );

        let ws = tokio::time::timeout(self.connect_timeout, open_and_setup(&url, &request, &events))
            .await
            .map_err(|_| {
                anyhow!(
                    "Gemini Live setup timed out after {:?}",
                    self.connect_timeout
                )
            })??;

        info!(session_id = %session_id, "Gemini Live setup complete");
        let _ = events.send(LiveEvent::Open);

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(outbound_loop(outbound_rx, sink, events.clone(), session_id.clone()));
        tokio::spawn(inbound_loop(stream, events, session_id.clone()));

        Ok(Arc::new(GeminiLiveSession {
            outbound_tx,
            closed: AtomicBool::new(false),
            session_id,
        }))
    }
}

/// An open Gemini Live connection
pub struct GeminiLiveSession {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
    session_id: String,
}

#[async_trait::async_trait]
impl LiveSession for GeminiLiveSession {
    async fn send_realtime_input(&self, media: MediaBlob) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("Session is closed");
        }
        self.outbound_tx
            .send(Outbound::Media(media))
            .map_err(|_| anyhow!("Outbound channel closed"))
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(session_id = %self.session_id, "Closing Gemini Live session");
        // Loop already gone means the socket is already down
        let _ = self.outbound_tx.send(Outbound::Close);
        Ok(())
    }
}

async fn outbound_loop(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    mut sink: SplitSink<WsStream, WsMessage>,
    events: mpsc::UnboundedSender<LiveEvent>,
    session_id: String,
) {
    let mut chunks: u64 = 0;

    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Media(blob) => {
                chunks += 1;
                let json = match serde_json::to_string(&RealtimeInputMessage::media(blob)) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(session_id = %session_id, error = %e, "Failed to serialize audio chunk");
                        continue;
                    }
                };

                if chunks == 1 || chunks % 50 == 0 {
                    info!(
                        session_id = %session_id,
                        chunk = chunks,
                        json_len = json.len(),
                        "Sending audio chunk to Gemini"
                    );
                }

                if let Err(e) = sink.send(WsMessage::Text(json.into())).await {
                    warn!(session_id = %session_id, "WebSocket send failed, closing outbound loop");
                    let _ = events.send(LiveEvent::Error(e.to_string()));
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    debug!(session_id = %session_id, chunks, "Outbound loop terminated");
}

async fn inbound_loop(
    mut stream: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<LiveEvent>,
    session_id: String,
) {
    let mut messages: u64 = 0;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Gemini Live transport error");
                let _ = events.send(LiveEvent::Error(e.to_string()));
                return;
            }
        };

        if let WsMessage::Close(close) = &frame {
            let reason = close.as_ref().map(|c| c.reason.as_str().to_string());
            info!(session_id = %session_id, reason = ?reason, "Gemini Live closed by server");
            let _ = events.send(LiveEvent::Close { reason });
            return;
        }

        let Some(text) = frame_json(&frame) else {
            continue;
        };

        match parse_server_message(text) {
            Ok(msg) => {
                messages += 1;
                if let Some(err) = &msg.error {
                    error!(session_id = %session_id, message = %err.message, "Gemini Live server error");
                    let _ = events.send(LiveEvent::Error(err.message.clone()));
                    continue;
                }
                if events.send(LiveEvent::Message(msg)).is_err() {
                    debug!(session_id = %session_id, "Event receiver dropped, closing inbound loop");
                    return;
                }
            }
            Err(e) => warn!(session_id = %session_id, error = %e, "Unparsable server message"),
        }
    }

    debug!(session_id = %session_id, messages, "Inbound stream ended");
    let _ = events.send(LiveEvent::Close { reason: None });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::ResponseModality;

    fn request() -> ConnectRequest {
        ConnectRequest {
            model: "gemini-test".into(),
            api_key: "key".into(),
            response_modality: ResponseModality::Audio,
            input_transcription: true,
            output_transcription: false,
            voice: "Kore".into(),
            system_instruction: String::new(),
        }
    }

    #[test]
    fn setup_prefixes_model_and_honours_flags() {
        let json = serde_json::to_value(build_setup_message(&request())).unwrap();
        assert_eq!(json["setup"]["model"], "models/gemini-test");
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"].get("outputAudioTranscription").is_none());
        assert!(json["setup"].get("systemInstruction").is_none());
    }

    #[test]
    fn binary_frames_with_json_are_read() {
        let frame = WsMessage::Binary(br#"{"setupComplete":{}}"#.to_vec().into());
        assert_eq!(frame_json(&frame), Some(r#"{"setupComplete":{}}"#));

        let audio = WsMessage::Binary(vec![0u8, 1, 2].into());
        assert_eq!(frame_json(&audio), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_to_connect() {
        let connector = GeminiLiveConnector::new("ws://127.0.0.1:9", Duration::from_secs(2));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(connector.connect(request(), tx).await.is_err());
    }
}
