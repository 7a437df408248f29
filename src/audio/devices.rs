use anyhow::{Context, Result};
use tokio::sync::mpsc;

use super::backend::{AudioBackendFactory, AudioSource, CaptureBackend, CaptureConfig};
use super::output::{AudioOutput, VoiceId};
use super::speaker::SpeakerOutput;

/// Where a session gets its input and output contexts from.
///
/// Every call returns a fresh handle; the session owns it until stop.
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Input capture (not yet started)
    fn open_microphone(&self) -> Result<Box<dyn CaptureBackend>>;

    /// Output context (still suspended). Natural end of each voice is
    /// reported on `ended_tx`.
    async fn open_output(
        &self,
        ended_tx: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Box<dyn AudioOutput>>;
}

/// Host audio: the configured capture source and the speaker
#[derive(Debug, Clone)]
pub struct SystemDevices {
    pub source: AudioSource,
    pub capture: CaptureConfig,
    pub output_device: Option<String>,
}

impl SystemDevices {
    pub fn new(source: AudioSource, capture: CaptureConfig, output_device: Option<String>) -> Self {
        Self {
            source,
            capture,
            output_device,
        }
    }
}

#[async_trait::async_trait]
impl AudioDevices for SystemDevices {
    fn open_microphone(&self) -> Result<Box<dyn CaptureBackend>> {
        AudioBackendFactory::create(self.source.clone(), self.capture.clone())
    }

    async fn open_output(
        &self,
        ended_tx: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        let device = self.output_device.clone();
        let output = tokio::task::spawn_blocking(move || SpeakerOutput::open(device, ended_tx))
            .await
            .context("Output open task failed")??;
        Ok(Box::new(output))
    }
}
