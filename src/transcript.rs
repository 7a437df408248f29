use serde::{Deserialize, Serialize};

use crate::session::{SessionEvent, Speaker};

/// One transcript turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Speaker,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(role: Speaker, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Ordered conversation transcript.
///
/// Consecutive fragments from the same speaker are concatenated into one
/// entry. A fragment from the other speaker, or the first fragment after a
/// turn-complete marker, opens a new entry.
#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    entries: Vec<TranscriptEntry>,
    turn_closed: bool,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: &str) {
        if text.is_empty() {
            return;
        }

        match self.entries.last_mut() {
            Some(last) if last.role == speaker && !self.turn_closed => last.text.push_str(text),
            _ => self.entries.push(TranscriptEntry::new(speaker, text)),
        }
        self.turn_closed = false;
    }

    /// Close the current entry at a turn boundary
    pub fn turn_complete(&mut self) {
        self.turn_closed = true;
    }

    /// Fold a session event into the transcript. Returns true if it changed.
    pub fn apply(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Transcription { speaker, text } => {
                self.push(*speaker, text);
                !text.is_empty()
            }
            SessionEvent::TurnComplete => {
                self.turn_complete();
                false
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.turn_closed = false;
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
