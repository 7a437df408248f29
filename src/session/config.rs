use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SessionError;
use crate::live::{ConnectRequest, ResponseModality};

/// Default live model
pub const MODEL_NAME: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Professional female-sounding prebuilt voice
pub const VOICE_NAME: &str = "Kore";

/// Persona and conversation policy for the interview coach
pub const SYSTEM_INSTRUCTION: &str = r#"
You are "Thandar", a professional female career coach and job interviewer from Myanmar.
Your goal is to help candidates prepare for job interviews through real-time voice sessions.

VOICE INTERACTION RULES:
1. Speak exclusively in Myanmar (Burmese). Use English only for specific technical terms (e.g., "Software Engineer", "Cloud Computing").
2. Be CONCISE. Long monologues are hard to follow in audio. Keep your responses under 2-3 sentences unless giving detailed feedback.
3. Start by warmly greeting the user: "မင်္ဂလာပါ၊ ကျွန်မနာမည် သန္တာပါ။ ဒီနေ့ ဘယ်လိုအလုပ်အကိုင်အတွက် အင်တာဗျူးလေ့ကျင့်ချင်ပါသလဲ?"
4. Listen carefully. If the user stops talking, wait a moment, then ask the next follow-up question.
5. Provide constructive, encouraging feedback in a professional yet friendly "Big Sister" (Akama) tone.
6. Focus on the STAR method (Situation, Task, Action, Result) when helping users structure their answers.

SESSION STRUCTURE:
- Intro: Greet and ask for the target job role.
- Mock Interview: 3-5 core questions (Tell me about yourself, Strengths, Situational).
- Feedback: Summarize what they did well and what to improve in the Myanmar context.
"#;

/// Immutable model/persona configuration for a session core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Live model identifier
    pub model: String,

    /// Prebuilt voice the model answers with
    pub voice: String,

    /// Persona and policy text sent with the setup frame
    pub system_instruction: String,

    /// Credential for the live service
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Bound on opening the remote session
    /// Default: 15 seconds
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: MODEL_NAME.to_string(),
            voice: VOICE_NAME.to_string(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            api_key: None,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl SessionConfig {
    /// Fails before anything is acquired if the session cannot be opened.
    pub fn validate(&self) -> Result<&str, SessionError> {
        let key = self
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SessionError::Configuration("API key is not set".into()))?;

        if self.model.trim().is_empty() {
            return Err(SessionError::Configuration("model identifier is empty".into()));
        }

        Ok(key)
    }

    /// Open request: audio responses, transcription in both directions
    pub fn connect_request(&self, api_key: &str) -> ConnectRequest {
        ConnectRequest {
            model: self.model.clone(),
            api_key: api_key.to_string(),
            response_modality: ResponseModality::Audio,
            input_transcription: true,
            output_transcription: true,
            voice: self.voice.clone(),
            system_instruction: self.system_instruction.clone(),
        }
    }
}
