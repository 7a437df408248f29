use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;

use crate::audio::output::{AudioOutput, VoiceId};
use crate::audio::pcm::AudioBuffer;

/// Gapless scheduler for inbound model audio.
///
/// Each buffer starts where the previous one ends, or immediately when the
/// output clock has already moved past that point. Buffers that have been
/// scheduled and not yet finished are tracked so they can be cut off on
/// barge-in.
///
/// `is_speaking()` is true exactly when the pending set is non-empty. The
/// mutating methods return `Some(new_value)` when that flag flips.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    pending: HashSet<VoiceId>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `buffer` right after the last scheduled one.
    ///
    /// Speaking is signalled as soon as the buffer is scheduled, not when it
    /// becomes audible.
    pub fn schedule(
        &mut self,
        output: &mut dyn AudioOutput,
        buffer: AudioBuffer,
    ) -> Result<Option<bool>> {
        let start_at = self.next_start_time.max(output.current_time());
        let duration = buffer.duration();

        let id = output.schedule(buffer, start_at)?;
        self.next_start_time = start_at + duration;

        let was_speaking = self.is_speaking();
        self.pending.insert(id);
        debug!(voice = id, start_at, duration, "Scheduled playback chunk");

        Ok((!was_speaking).then_some(true))
    }

    /// A voice finished on its own. Ids not in the pending set are ignored.
    pub fn on_ended(&mut self, id: VoiceId) -> Option<bool> {
        if self.pending.remove(&id) && self.pending.is_empty() {
            Some(false)
        } else {
            None
        }
    }

    /// Barge-in: silence everything now and rewind the schedule.
    ///
    /// Safe with nothing pending. Speaking is always false afterwards.
    pub fn interrupt(&mut self, output: &mut dyn AudioOutput) {
        for id in self.pending.drain() {
            output.stop_voice(id);
        }
        self.next_start_time = 0.0;
    }

    /// Forget pending voices without touching an output (the output is gone)
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_start_time = 0.0;
    }

    pub fn is_speaking(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::VirtualOutput;
    use tokio::sync::mpsc;

    fn chunk(secs: f64) -> AudioBuffer {
        AudioBuffer {
            sample_rate: 24_000,
            channels: vec![vec![0.0; (secs * 24_000.0) as usize]],
        }
    }

    #[test]
    fn back_to_back_chunks_are_gapless() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut output, clock) = VirtualOutput::new(tx);
        output.resume().unwrap();
        let mut scheduler = PlaybackScheduler::new();

        assert_eq!(scheduler.schedule(&mut output, chunk(0.5)).unwrap(), Some(true));
        assert_eq!(scheduler.schedule(&mut output, chunk(0.25)).unwrap(), None);
        assert_eq!(scheduler.schedule(&mut output, chunk(1.0)).unwrap(), None);

        let starts: Vec<f64> = clock.scheduled().iter().map(|v| v.start_at).collect();
        assert_eq!(starts, vec![0.0, 0.5, 0.75]);
        assert_eq!(scheduler.next_start_time(), 1.75);
    }

    #[test]
    fn late_chunk_starts_at_clock_time() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut output, clock) = VirtualOutput::new(tx);
        output.resume().unwrap();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.schedule(&mut output, chunk(0.5)).unwrap();
        for id in clock.advance(2.0) {
            scheduler.on_ended(id);
        }
        assert!(!scheduler.is_speaking());

        scheduler.schedule(&mut output, chunk(0.5)).unwrap();
        assert_eq!(clock.scheduled()[1].start_at, 2.0);
    }

    #[test]
    fn speaking_ends_with_last_pending_voice() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut output, _clock) = VirtualOutput::new(tx);
        let mut scheduler = PlaybackScheduler::new();

        scheduler.schedule(&mut output, chunk(0.1)).unwrap();
        scheduler.schedule(&mut output, chunk(0.1)).unwrap();

        assert_eq!(scheduler.on_ended(0), None);
        assert_eq!(scheduler.on_ended(42), None);
        assert_eq!(scheduler.on_ended(1), Some(false));
        assert_eq!(scheduler.on_ended(1), None);
    }

    #[test]
    fn interrupt_stops_pending_and_rewinds() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut output, clock) = VirtualOutput::new(tx);
        let mut scheduler = PlaybackScheduler::new();

        scheduler.schedule(&mut output, chunk(0.5)).unwrap();
        scheduler.schedule(&mut output, chunk(0.5)).unwrap();
        scheduler.interrupt(&mut output);

        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.next_start_time(), 0.0);
        assert_eq!(clock.stopped().len(), 2);
        assert!(clock.active().is_empty());
    }

    #[test]
    fn interrupt_when_idle_is_a_no_op() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut output, _clock) = VirtualOutput::new(tx);
        let mut scheduler = PlaybackScheduler::new();

        scheduler.interrupt(&mut output);
        scheduler.interrupt(&mut output);

        assert!(!scheduler.is_speaking());
        assert_eq!(scheduler.next_start_time(), 0.0);
    }
}
