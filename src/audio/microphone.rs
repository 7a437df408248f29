// Microphone capture through cpal
//
// `cpal::Stream` is not `Send` on every platform, so the stream is built,
// played and dropped on a dedicated thread. The device callback feeds a
// FrameAssembler and forwards finished frames with `try_send`: when the
// session is not keeping up the frame is dropped rather than queued.

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, CaptureBackend, CaptureConfig};
use super::framer::FrameAssembler;

/// Microphone backend
///
/// Holds the input device exclusively between `start` and `stop`.
pub struct MicrophoneBackend {
    config: CaptureConfig,
    /// Set before the device is released; the callback becomes a no-op
    closing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    capturing: bool,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            closing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread: None,
            capturing: false,
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            bail!("Already capturing");
        }

        let (frames_tx, frames_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<(u32, u16)>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let closing = Arc::new(AtomicBool::new(false));
        self.closing = Arc::clone(&closing);

        let config = self.config.clone();
        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match open_input_stream(&config, frames_tx, closing) {
                    Ok((stream, rate, channels)) => {
                        let _ = init_tx.send(Ok((rate, channels)));
                        stream
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                // Park until stop() signals or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn capture thread")?;

        let init = tokio::task::spawn_blocking(move || init_rx.recv())
            .await
            .context("Capture init task failed")?
            .context("Capture thread exited before reporting")?;

        match init {
            Ok((rate, channels)) => {
                info!(
                    "Microphone capture started: device {}Hz/{}ch -> {}Hz mono, {} samples/frame",
                    rate, channels, self.config.target_sample_rate, self.config.frame_size
                );
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                self.capturing = true;
                Ok(frames_rx)
            }
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .context("Capture stop task failed")?
                .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?;
            info!("Microphone released");
        }

        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn select_input_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    if let Some(wanted) = name {
        let found = host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
        if let Some(device) = found {
            return Ok(device);
        }
        warn!("Input device {:?} not found, using default", wanted);
    }

    host.default_input_device()
        .context("No input device available")
}

fn open_input_stream(
    config: &CaptureConfig,
    frames_tx: mpsc::Sender<AudioFrame>,
    closing: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32, u16)> {
    let host = cpal::default_host();
    let device = select_input_device(&host, config.device_name.as_deref())?;

    let supported = device
        .default_input_config()
        .context("Failed to query input config (microphone permission denied?)")?;

    let rate = supported.sample_rate().0;
    let channels = supported.channels();
    if channels == 0 {
        bail!("Input device reports 0 channels");
    }

    let stream_config: cpal::StreamConfig = supported.config();
    let framer = FrameAssembler::new(rate, channels, config.target_sample_rate, config.frame_size);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, framer, frames_tx, closing)?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, framer, frames_tx, closing)?
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, framer, frames_tx, closing)?
        }
        other => bail!("Unsupported input sample format: {:?}", other),
    };

    stream.play().context("Failed to start input stream")?;

    Ok((stream, rate, channels))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut framer: FrameAssembler,
    frames_tx: mpsc::Sender<AudioFrame>,
    closing: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let mut dropped: u64 = 0;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if closing.load(Ordering::Relaxed) {
                    return;
                }

                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));

                for frame in framer.push_interleaved(&scratch) {
                    match frames_tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            dropped += 1;
                            if dropped == 1 || dropped % 50 == 0 {
                                debug!(dropped, "Capture channel full, dropping frame");
                            }
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            },
            |err| warn!("cpal input stream error: {}", err),
            None,
        )
        .context("Failed to build input stream")?;

    Ok(stream)
}
