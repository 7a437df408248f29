use super::backend::AudioFrame;

/// Turns arbitrarily sized device callbacks into fixed-size mono frames.
///
/// Input is interleaved f32 at the device's native rate and channel count.
/// Output frames are `frame_size` samples of mono audio at `target_rate`,
/// numbered in capture order.
pub struct FrameAssembler {
    src_rate: u32,
    src_channels: usize,
    target_rate: u32,
    frame_size: usize,
    /// Mono source samples not yet consumed by the resampler
    src: Vec<f32>,
    /// Fractional read position into `src`
    src_pos: f64,
    /// Resampled samples waiting to fill a frame
    pending: Vec<f32>,
    sequence: u64,
}

impl FrameAssembler {
    pub fn new(src_rate: u32, src_channels: u16, target_rate: u32, frame_size: usize) -> Self {
        Self {
            src_rate: src_rate.max(1),
            src_channels: (src_channels as usize).max(1),
            target_rate: target_rate.max(1),
            frame_size: frame_size.max(1),
            src: Vec::new(),
            src_pos: 0.0,
            pending: Vec::with_capacity(frame_size),
            sequence: 0,
        }
    }

    /// Push one device callback worth of interleaved samples.
    ///
    /// Returns every frame completed by this push, oldest first.
    pub fn push_interleaved(&mut self, data: &[f32]) -> Vec<AudioFrame> {
        let channels = self.src_channels;
        self.src.extend(
            data.chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
        self.resample();
        self.drain_frames()
    }

    /// Number of frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }

    fn resample(&mut self) {
        if self.src_rate == self.target_rate {
            self.pending.append(&mut self.src);
            return;
        }

        let step = self.src_rate as f64 / self.target_rate as f64;
        while self.src_pos + 1.0 < self.src.len() as f64 {
            let idx = self.src_pos.floor() as usize;
            let frac = (self.src_pos - idx as f64) as f32;
            let a = self.src[idx];
            let b = self.src[idx + 1];
            self.pending.push(a + (b - a) * frac);
            self.src_pos += step;
        }

        let consumed = (self.src_pos.floor() as usize).min(self.src.len());
        self.src.drain(..consumed);
        self.src_pos -= consumed as f64;
    }

    fn drain_frames(&mut self) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let samples: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            let timestamp_ms =
                self.sequence * self.frame_size as u64 * 1000 / self.target_rate as u64;
            frames.push(AudioFrame {
                samples,
                sample_rate: self.target_rate,
                sequence: self.sequence,
                timestamp_ms,
            });
            self.sequence += 1;
        }
        frames
    }
}
