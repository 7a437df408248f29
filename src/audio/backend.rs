use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

use super::pcm::INPUT_SAMPLE_RATE;

/// Samples per captured frame (mono)
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// One fixed-size block of captured microphone audio
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples, normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Capture order, starting at 0
    pub sequence: u64,
    /// Offset in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Rate frames are delivered at (resampled if the device differs)
    pub target_sample_rate: u32,
    /// Samples per delivered frame
    pub frame_size: usize,
    /// Frames buffered between the device and the session before dropping.
    /// Kept small so capture never runs more than a frame or two ahead.
    pub channel_capacity: usize,
    /// Input device name (None = system default)
    pub device_name: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: INPUT_SAMPLE_RATE, // 16kHz for the live model
            frame_size: CAPTURE_FRAME_SIZE,
            channel_capacity: 4,
            device_name: None,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal input stream on a dedicated thread
/// - File: WAV file streamed at real-time pace (headless runs, tests)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire the device and start capturing
    ///
    /// Returns a channel receiver that yields frames in capture order
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Release the device. Must be safe to call more than once.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Capture backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for the given source
    pub fn create(source: AudioSource, config: CaptureConfig) -> Result<Box<dyn CaptureBackend>> {
        match source {
            AudioSource::Microphone => {
                let backend = super::microphone::MicrophoneBackend::new(config);
                Ok(Box::new(backend))
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::new(path, config);
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input (all platforms)
    Microphone,
    /// WAV file input (headless sessions, testing)
    File(PathBuf),
}
