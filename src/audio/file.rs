use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backend::{AudioFrame, CaptureBackend, CaptureConfig};
use super::pcm::resample_linear;

/// A WAV file loaded fully into memory as normalized f32
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.channels == 0 {
            bail!("WAV file declares 0 channels");
        }

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix to mono and resample to `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let channels = self.channels as usize;
        let mono: Vec<f32> = if channels == 1 {
            self.samples.clone()
        } else {
            self.samples
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        resample_linear(&mono, self.sample_rate, target_rate)
    }
}

/// Capture backend that replays a WAV file at real-time pace.
///
/// Frames are paced at one frame duration apart so the remote side sees the
/// same cadence a microphone would produce. The final partial frame is padded
/// with silence. The channel closes once the file is exhausted.
pub struct FileBackend {
    path: PathBuf,
    config: CaptureConfig,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    capturing: Arc<AtomicBool>,
}

impl FileBackend {
    pub fn new(path: PathBuf, config: CaptureConfig) -> Self {
        Self {
            path,
            config,
            cancel: CancellationToken::new(),
            task: None,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("File open task failed")??;

        let rate = self.config.target_sample_rate;
        let frame_size = self.config.frame_size.max(1);
        let samples = file.to_mono(rate);

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();

        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let frame_duration = Duration::from_secs_f64(frame_size as f64 / rate.max(1) as f64);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration);
            for (sequence, chunk) in samples.chunks(frame_size).enumerate() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let mut frame_samples = chunk.to_vec();
                frame_samples.resize(frame_size, 0.0);

                let frame = AudioFrame {
                    samples: frame_samples,
                    sample_rate: rate,
                    sequence: sequence as u64,
                    timestamp_ms: sequence as u64 * frame_size as u64 * 1000 / rate.max(1) as u64,
                };

                if tx.send(frame).await.is_err() {
                    debug!("File capture receiver dropped");
                    break;
                }
            }
            capturing.store(false, Ordering::SeqCst);
            debug!("File capture finished");
        });

        self.task = Some(task);
        info!("File capture started: {}", file.path);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await.context("File capture task panicked")?;
        }
        self.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_mono_averages_and_resamples() {
        let file = AudioFile {
            path: "mem".into(),
            duration_seconds: 0.0,
            sample_rate: 32_000,
            channels: 2,
            samples: vec![1.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.2, 0.2],
        };
        let mono = file.to_mono(16_000);
        assert_eq!(mono.len(), 2);
        assert_eq!(mono[0], 0.5);
    }
}
