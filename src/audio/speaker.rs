// Speaker output through cpal.
//
// The device callback is the clock: it counts frames written while the
// context is running and mixes every voice whose window overlaps the block.
// Voices are resampled to the device rate when scheduled so the callback
// only sums and copies.

use anyhow::{bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Sample;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::output::{AudioOutput, VoiceId};
use super::pcm::{resample_linear, AudioBuffer};

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

struct MixState {
    /// Frames rendered while running; the context clock
    frames_played: u64,
    running: bool,
    closed: bool,
    next_id: VoiceId,
    voices: Vec<Voice>,
}

fn lock(state: &Mutex<MixState>) -> MutexGuard<'_, MixState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Default output device, driven from a dedicated thread
pub struct SpeakerOutput {
    state: Arc<Mutex<MixState>>,
    device_rate: u32,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SpeakerOutput {
    /// Open the output device. Blocks until the stream is built.
    ///
    /// The context starts suspended; call `resume` before scheduling.
    pub fn open(device_name: Option<String>, ended_tx: mpsc::UnboundedSender<VoiceId>) -> Result<Self> {
        let state = Arc::new(Mutex::new(MixState {
            frames_played: 0,
            running: false,
            closed: false,
            next_id: 0,
            voices: Vec::new(),
        }));

        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("speaker-output".into())
            .spawn(move || {
                let (stream, rate) =
                    match open_output_stream(device_name.as_deref(), thread_state, ended_tx) {
                        Ok(opened) => opened,
                        Err(e) => {
                            let _ = init_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = init_tx.send(Ok(rate));

                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn output thread")?;

        let device_rate = match init_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                bail!("Output thread exited before reporting");
            }
        };

        info!("Speaker output opened at {}Hz", device_rate);

        Ok(Self {
            state,
            device_rate,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

impl AudioOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        lock(&self.state).frames_played as f64 / self.device_rate as f64
    }

    fn resume(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            bail!("Output context is closed");
        }
        state.running = true;
        Ok(())
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) -> Result<VoiceId> {
        let samples = resample_linear(&buffer.to_mono(), buffer.sample_rate, self.device_rate);
        let start_frame = (start_at.max(0.0) * self.device_rate as f64).round() as u64;

        let mut state = lock(&self.state);
        if state.closed {
            bail!("Output context is closed");
        }
        let id = state.next_id;
        state.next_id += 1;
        state.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(id)
    }

    fn stop_voice(&mut self, id: VoiceId) {
        lock(&self.state).voices.retain(|v| v.id != id);
    }

    fn close(&mut self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            state.closed = true;
            state.running = false;
            state.voices.clear();
        }

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| anyhow::anyhow!("Output thread panicked"))?;
            info!("Speaker output closed");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "speaker"
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn open_output_stream(
    device_name: Option<&str>,
    state: Arc<Mutex<MixState>>,
    ended_tx: mpsc::UnboundedSender<VoiceId>,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();

    let named = match device_name {
        Some(wanted) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
        None => None,
    };
    let device = match named {
        Some(device) => device,
        None => host
            .default_output_device()
            .context("No output device available")?,
    };

    let supported = device
        .default_output_config()
        .context("Failed to query output config")?;
    let rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let stream_config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &stream_config, channels, state, ended_tx)?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &stream_config, channels, state, ended_tx)?
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &stream_config, channels, state, ended_tx)?
        }
        other => bail!("Unsupported output sample format: {:?}", other),
    };

    stream.play().context("Failed to start output stream")?;
    Ok((stream, rate))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    state: Arc<Mutex<MixState>>,
    ended_tx: mpsc::UnboundedSender<VoiceId>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = channels.max(1);
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut state = lock(&state);
                let frames = data.len() / channels;

                if !state.running {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0f32);
                    }
                    return;
                }

                let base = state.frames_played;
                for (i, frame) in data.chunks_mut(channels).enumerate() {
                    let t = base + i as u64;
                    let mut mixed = 0.0f32;
                    for voice in &state.voices {
                        if t >= voice.start_frame {
                            if let Some(s) = voice.samples.get((t - voice.start_frame) as usize) {
                                mixed += *s;
                            }
                        }
                    }
                    let value = T::from_sample(mixed.clamp(-1.0, 1.0));
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }

                state.frames_played = base + frames as u64;
                let played = state.frames_played;
                state.voices.retain(|v| {
                    let finished = v.start_frame + v.samples.len() as u64 <= played;
                    if finished {
                        let _ = ended_tx.send(v.id);
                    }
                    !finished
                });
            },
            |err| warn!("cpal output stream error: {}", err),
            None,
        )
        .context("Failed to build output stream")?;

    Ok(stream)
}
