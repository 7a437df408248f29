// Shared in-test stand-ins for the microphone, the output device and the
// live service. Each records what was acquired and released so tests can
// assert nothing leaks.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thandar_coach::audio::pcm::AudioBuffer;
use thandar_coach::audio::{
    AudioDevices, AudioFrame, AudioOutput, CaptureBackend, VirtualClock, VirtualOutput, VoiceId,
};
use thandar_coach::live::messages::{InlineData, ModelTurn, Part, ServerContent, Transcription};
use thandar_coach::live::{ConnectRequest, LiveConnector, LiveEvent, LiveSession, MediaBlob};
use thandar_coach::live::ServerMessage;
use thandar_coach::SessionConfig;
use tokio::sync::mpsc;

// ============================================================================
// Devices
// ============================================================================

#[derive(Default)]
pub struct DeviceTracker {
    pub mic_opened: AtomicUsize,
    pub mic_started: AtomicUsize,
    pub mic_stops: AtomicUsize,
    pub outputs: Mutex<Vec<VirtualClock>>,
    pub frames_tx: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl DeviceTracker {
    pub fn mic_stops(&self) -> usize {
        self.mic_stops.load(Ordering::SeqCst)
    }

    pub fn mic_started(&self) -> usize {
        self.mic_started.load(Ordering::SeqCst)
    }

    /// Output contexts created and not closed
    pub fn open_outputs(&self) -> usize {
        self.outputs
            .lock()
            .unwrap()
            .iter()
            .filter(|clock| !clock.is_closed())
            .count()
    }

    pub fn outputs_created(&self) -> usize {
        self.outputs.lock().unwrap().len()
    }

    /// Clock of the most recently opened output
    pub fn clock(&self) -> VirtualClock {
        self.outputs.lock().unwrap().last().cloned().expect("no output opened")
    }

    /// Push one captured frame into the running session
    pub async fn capture(&self, samples: Vec<f32>, sequence: u64) {
        let tx = self.frames_tx.lock().unwrap().clone().expect("microphone not started");
        tx.send(AudioFrame {
            samples,
            sample_rate: 16_000,
            sequence,
            timestamp_ms: sequence * 256,
        })
        .await
        .unwrap();
    }
}

pub struct MockCapture {
    tracker: Arc<DeviceTracker>,
    capturing: bool,
}

#[async_trait::async_trait]
impl CaptureBackend for MockCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(16);
        *self.tracker.frames_tx.lock().unwrap() = Some(tx);
        self.tracker.mic_started.fetch_add(1, Ordering::SeqCst);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.tracker.mic_stops.fetch_add(1, Ordering::SeqCst);
        self.tracker.frames_tx.lock().unwrap().take();
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "mock-mic"
    }
}

#[derive(Default)]
pub struct MockDevices {
    pub tracker: Arc<DeviceTracker>,
    /// Refuse microphone access with this message
    pub deny_microphone: Option<String>,
    /// Block the closing thread this long, like a device join
    pub close_delay: Option<Duration>,
}

impl MockDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn denying(message: &str) -> Arc<Self> {
        Arc::new(Self {
            deny_microphone: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub fn slow_closing(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            close_delay: Some(delay),
            ..Self::default()
        })
    }
}

/// Virtual output whose close blocks the calling thread
pub struct SlowCloseOutput {
    inner: VirtualOutput,
    delay: Duration,
}

impl AudioOutput for SlowCloseOutput {
    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    fn resume(&mut self) -> Result<()> {
        self.inner.resume()
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_at: f64) -> Result<VoiceId> {
        self.inner.schedule(buffer, start_at)
    }

    fn stop_voice(&mut self, id: VoiceId) {
        self.inner.stop_voice(id)
    }

    fn close(&mut self) -> Result<()> {
        std::thread::sleep(self.delay);
        self.inner.close()
    }

    fn name(&self) -> &str {
        "slow-virtual"
    }
}

#[async_trait::async_trait]
impl AudioDevices for MockDevices {
    fn open_microphone(&self) -> Result<Box<dyn CaptureBackend>> {
        if let Some(message) = &self.deny_microphone {
            bail!("{}", message);
        }
        self.tracker.mic_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCapture {
            tracker: Arc::clone(&self.tracker),
            capturing: false,
        }))
    }

    async fn open_output(
        &self,
        ended_tx: mpsc::UnboundedSender<VoiceId>,
    ) -> Result<Box<dyn AudioOutput>> {
        let (output, clock) = VirtualOutput::new(ended_tx);
        self.tracker.outputs.lock().unwrap().push(clock);
        match self.close_delay {
            Some(delay) => Ok(Box::new(SlowCloseOutput {
                inner: output,
                delay,
            })),
            None => Ok(Box::new(output)),
        }
    }
}

// ============================================================================
// Live service
// ============================================================================

#[derive(Default)]
pub struct MockLiveSession {
    pub sent: Mutex<Vec<MediaBlob>>,
    pub closes: AtomicUsize,
}

impl MockLiveSession {
    pub fn sent(&self) -> Vec<MediaBlob> {
        self.sent.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LiveSession for MockLiveSession {
    async fn send_realtime_input(&self, media: MediaBlob) -> Result<()> {
        self.sent.lock().unwrap().push(media);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConnectMode {
    Succeed,
    Refuse,
    /// Never resolves
    Hang,
    /// Resolves successfully after a delay
    Delay(Duration),
}

pub struct MockConnector {
    mode: ConnectMode,
    pub connects: AtomicUsize,
    pub requests: Mutex<Vec<ConnectRequest>>,
    pub sessions: Mutex<Vec<Arc<MockLiveSession>>>,
    events: Mutex<Option<mpsc::UnboundedSender<LiveEvent>>>,
}

impl MockConnector {
    pub fn new(mode: ConnectMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            connects: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    pub fn session(&self) -> Arc<MockLiveSession> {
        self.sessions.lock().unwrap().last().cloned().expect("no session opened")
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Deliver an event as the remote side would
    pub fn emit(&self, event: LiveEvent) {
        let tx = self.events.lock().unwrap().clone().expect("connect was never called");
        let _ = tx.send(event);
    }

    pub fn deliver(&self, content: ServerContent) {
        self.emit(LiveEvent::Message(ServerMessage::content(content)));
    }
}

#[async_trait::async_trait]
impl LiveConnector for MockConnector {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<LiveEvent>,
    ) -> Result<Arc<dyn LiveSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        *self.events.lock().unwrap() = Some(events.clone());

        match self.mode {
            ConnectMode::Succeed => {}
            ConnectMode::Refuse => bail!("connection refused"),
            ConnectMode::Hang => std::future::pending::<()>().await,
            ConnectMode::Delay(delay) => tokio::time::sleep(delay).await,
        }

        let session = Arc::new(MockLiveSession::default());
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        let _ = events.send(LiveEvent::Open);
        Ok(session)
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn test_config() -> SessionConfig {
    SessionConfig {
        api_key: Some("test-key".to_string()),
        connect_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

pub fn transcription(text: &str) -> Option<Transcription> {
    Some(Transcription {
        text: text.to_string(),
    })
}

/// Content carrying one audio chunk of `samples` mono samples at 24 kHz
pub fn audio_content(samples: usize) -> ServerContent {
    audio_content_from(&vec![0.25; samples])
}

pub fn audio_content_from(samples: &[f32]) -> ServerContent {
    ServerContent {
        model_turn: Some(ModelTurn {
            parts: vec![Part {
                inline_data: Some(InlineData {
                    data: thandar_coach::audio::pcm::encode_samples(samples),
                    mime_type: Some("audio/pcm;rate=24000".to_string()),
                }),
                text: None,
            }],
        }),
        ..ServerContent::default()
    }
}

/// Let spawned session tasks drain their queues
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
