// Output audio context: a clock plus voices scheduled against it.
//
// `SessionCore` only talks to the `AudioOutput` trait. Each scheduled buffer
// becomes a voice; when a voice finishes playing naturally its id is sent on
// the `ended` channel handed to the output at construction. Stopping a voice
// explicitly does not produce an ended notification.

use anyhow::{bail, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::pcm::AudioBuffer;

/// Handle to one scheduled buffer
pub type VoiceId = u64;

/// A playback context with its own monotonic clock.
pub trait AudioOutput: Send {
    /// Output clock position in seconds
    fn current_time(&self) -> f64;

    /// Leave the (possibly) suspended initial state
    fn resume(&mut self) -> Result<()>;

    /// Play `buffer` starting at clock time `start_at`
    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) -> Result<VoiceId>;

    /// Silence a voice immediately. Unknown ids are ignored.
    fn stop_voice(&mut self, id: VoiceId);

    /// Release the context. Safe to call more than once. May block while
    /// the device shuts down.
    fn close(&mut self) -> Result<()>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// A voice as recorded by the virtual output
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledVoice {
    pub id: VoiceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledVoice {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    now: f64,
    resumed: bool,
    closed: bool,
    next_id: VoiceId,
    active: Vec<ScheduledVoice>,
    history: Vec<ScheduledVoice>,
    stopped: Vec<VoiceId>,
}

/// Output with a manually driven clock.
///
/// Used for headless sessions and tests: nothing is audible, time moves
/// only when [`VirtualClock::advance`] is called.
pub struct VirtualOutput {
    state: Arc<Mutex<VirtualState>>,
}

/// Test-side handle onto a [`VirtualOutput`]
#[derive(Clone)]
pub struct VirtualClock {
    state: Arc<Mutex<VirtualState>>,
    ended_tx: mpsc::UnboundedSender<VoiceId>,
}

fn lock(state: &Mutex<VirtualState>) -> MutexGuard<'_, VirtualState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl VirtualOutput {
    pub fn new(ended_tx: mpsc::UnboundedSender<VoiceId>) -> (Self, VirtualClock) {
        let state = Arc::new(Mutex::new(VirtualState::default()));
        let clock = VirtualClock {
            state: Arc::clone(&state),
            ended_tx,
        };
        (Self { state }, clock)
    }
}

impl AudioOutput for VirtualOutput {
    fn current_time(&self) -> f64 {
        lock(&self.state).now
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            bail!("Output context is closed");
        }
        state.resumed = true;
        Ok(())
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) -> Result<VoiceId> {
        let mut state = lock(&self.state);
        if state.closed {
            bail!("Output context is closed");
        }

        let id = state.next_id;
        state.next_id += 1;

        let voice = ScheduledVoice {
            id,
            start_at,
            duration: buffer.duration(),
        };
        state.active.push(voice.clone());
        state.history.push(voice);
        Ok(id)
    }

    fn stop_voice(&mut self, id: VoiceId) {
        let mut state = lock(&self.state);
        let before = state.active.len();
        state.active.retain(|v| v.id != id);
        if state.active.len() != before {
            state.stopped.push(id);
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.closed = true;
        state.active.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "virtual"
    }
}

impl VirtualClock {
    /// Move the clock forward and report voices that finished.
    ///
    /// A suspended or closed context does not advance.
    pub fn advance(&self, secs: f64) -> Vec<VoiceId> {
        let mut state = lock(&self.state);
        if !state.resumed || state.closed {
            return Vec::new();
        }
        state.now += secs;

        let now = state.now;
        let mut ended: Vec<ScheduledVoice> = Vec::new();
        state.active.retain(|v| {
            // Small tolerance so sums of f64 durations land on the boundary
            if v.end_at() <= now + 1e-9 {
                ended.push(v.clone());
                false
            } else {
                true
            }
        });
        drop(state);

        ended.sort_by(|a, b| a.end_at().total_cmp(&b.end_at()));
        let ids: Vec<VoiceId> = ended.iter().map(|v| v.id).collect();
        for id in &ids {
            let _ = self.ended_tx.send(*id);
        }
        ids
    }

    pub fn now(&self) -> f64 {
        lock(&self.state).now
    }

    pub fn is_resumed(&self) -> bool {
        lock(&self.state).resumed
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Every voice ever scheduled, in scheduling order
    pub fn scheduled(&self) -> Vec<ScheduledVoice> {
        lock(&self.state).history.clone()
    }

    /// Voices scheduled and neither finished nor stopped
    pub fn active(&self) -> Vec<ScheduledVoice> {
        lock(&self.state).active.clone()
    }

    /// Voices cut off by `stop_voice`
    pub fn stopped(&self) -> Vec<VoiceId> {
        lock(&self.state).stopped.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(secs: f64) -> AudioBuffer {
        let frames = (secs * 24_000.0) as usize;
        AudioBuffer {
            sample_rate: 24_000,
            channels: vec![vec![0.0; frames]],
        }
    }

    #[test]
    fn suspended_clock_does_not_advance() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_output, clock) = VirtualOutput::new(tx);
        clock.advance(1.0);
        assert_eq!(clock.now(), 0.0);
    }

    #[test]
    fn advance_reports_finished_voices_in_end_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut output, clock) = VirtualOutput::new(tx);
        output.resume().unwrap();

        let a = output.schedule(buffer(0.5), 0.0).unwrap();
        let b = output.schedule(buffer(0.25), 0.5).unwrap();

        assert_eq!(clock.advance(0.5), vec![a]);
        assert_eq!(clock.advance(0.25), vec![b]);
        assert_eq!(rx.try_recv().unwrap(), a);
        assert_eq!(rx.try_recv().unwrap(), b);
        assert!(clock.active().is_empty());
    }

    #[test]
    fn stopped_voice_never_ends() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut output, clock) = VirtualOutput::new(tx);
        output.resume().unwrap();

        let id = output.schedule(buffer(0.1), 0.0).unwrap();
        output.stop_voice(id);
        output.stop_voice(id);

        assert!(clock.advance(1.0).is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(clock.stopped(), vec![id]);
    }

    #[test]
    fn closed_output_rejects_schedule() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut output, clock) = VirtualOutput::new(tx);
        output.close().unwrap();
        output.close().unwrap();
        assert!(clock.is_closed());
        assert!(output.schedule(buffer(0.1), 0.0).is_err());
    }
}
