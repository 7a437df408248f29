//! Gemini Live (BidiGenerateContent) wire types
//!
//! Only the subset a voice session uses: the setup frame, realtime audio
//! input, and the `serverContent` facets the session demultiplexes.

use serde::{Deserialize, Serialize};

// ===== Outbound =====

/// What the model should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// First frame on a new connection
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified, e.g. `models/gemini-2.5-flash-native-audio-preview-12-2025`
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Presence enables transcription; the server takes no options.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioTranscriptionConfig {}

/// Base64 payload plus MIME type, the unit of `sendRealtimeInput`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaBlob>,
}

impl RealtimeInputMessage {
    pub fn media(blob: MediaBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![blob],
            },
        }
    }
}

// ===== Inbound =====

/// One inbound frame. Every field is optional; several may be set at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ServerError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    #[serde(default)]
    pub message: String,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Message carrying only `serverContent`
    pub fn content(content: ServerContent) -> Self {
        Self {
            server_content: Some(content),
            ..Default::default()
        }
    }
}

impl ServerContent {
    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete == Some(true)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted == Some(true)
    }

    /// Base64 audio of every part that carries non-empty inline data, in order
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .map(|inline| inline.data.as_str())
            .filter(|data| !data.is_empty())
    }
}

/// Parse a frame body into a server message
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_serializes_with_transcription_flags() {
        let setup = SetupMessage {
            setup: Setup {
                model: "models/test-model".into(),
                generation_config: GenerationConfig {
                    response_modalities: vec![ResponseModality::Audio],
                    speech_config: Some(SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: "Kore".into(),
                            },
                        },
                    }),
                },
                system_instruction: Some(Content {
                    parts: vec![TextPart { text: "be brief".into() }],
                }),
                input_audio_transcription: Some(AudioTranscriptionConfig::default()),
                output_audio_transcription: Some(AudioTranscriptionConfig::default()),
            },
        };

        let json = serde_json::to_value(&setup).unwrap();
        assert_eq!(json["setup"]["model"], "models/test-model");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn realtime_input_wire_shape() {
        let msg = RealtimeInputMessage::media(MediaBlob {
            mime_type: "audio/pcm;rate=16000".into(),
            data: "AAA=".into(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"realtimeInput":{"mediaChunks":[{"mimeType":"audio/pcm;rate=16000","data":"AAA="}]}}"#
        );
    }

    #[test]
    fn parses_all_facets_of_one_message() {
        let raw = r#"{
            "serverContent": {
                "outputTranscription": {"text": "Hi"},
                "inputTranscription": {"text": "Hello"},
                "turnComplete": true,
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "ignored"},
                    {"inlineData": {"data": "BBBB"}}
                ]},
                "interrupted": true
            }
        }"#;

        let msg = parse_server_message(raw).unwrap();
        let content = msg.server_content.unwrap();
        assert_eq!(content.output_transcription.as_ref().unwrap().text, "Hi");
        assert_eq!(content.input_transcription.as_ref().unwrap().text, "Hello");
        assert!(content.is_turn_complete());
        assert!(content.is_interrupted());
        assert_eq!(content.audio_payloads().collect::<Vec<_>>(), vec!["AAAA", "BBBB"]);
    }

    #[test]
    fn empty_inline_data_carries_no_audio() {
        let raw = r#"{"serverContent": {"modelTurn": {"parts": [
            {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": ""}},
            {"inlineData": {"data": "CCCC"}}
        ]}}}"#;

        let content = parse_server_message(raw).unwrap().server_content.unwrap();
        assert_eq!(content.audio_payloads().collect::<Vec<_>>(), vec!["CCCC"]);
    }

    #[test]
    fn setup_complete_and_unknown_fields() {
        let msg = parse_server_message(r#"{"setupComplete": {}, "usageMetadata": {"x": 1}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.server_content.is_none());
    }
}
