use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::{ConnectionStatus, SessionEvent, Speaker};
use super::playback::PlaybackScheduler;
use super::stats::{SessionCounters, SessionStats};
use crate::audio::backend::{AudioFrame, CaptureBackend};
use crate::audio::devices::AudioDevices;
use crate::audio::output::{AudioOutput, VoiceId};
use crate::audio::pcm::{
    decode_base64, encode_samples, raw_pcm_to_audio_buffer, INPUT_MIME_TYPE, OUTPUT_SAMPLE_RATE,
};
use crate::error::SessionError;
use crate::live::{LiveConnector, LiveEvent, LiveSession, MediaBlob, ServerContent};

#[derive(Default)]
struct Playback {
    output: Option<Box<dyn AudioOutput>>,
    scheduler: PlaybackScheduler,
}

type SharedPlayback = Arc<StdMutex<Playback>>;
type ActiveSlot = Arc<Mutex<Option<ActiveSession>>>;

fn lock_playback(playback: &StdMutex<Playback>) -> MutexGuard<'_, Playback> {
    playback.lock().unwrap_or_else(|e| e.into_inner())
}

fn device_error(e: anyhow::Error) -> SessionError {
    SessionError::Device(format!("{:#}", e))
}

/// Everything one start..stop cycle owns
struct ActiveSession {
    /// Closing flag: cancelled before any resource is released
    cancel: CancellationToken,
    capture: Option<Box<dyn CaptureBackend>>,
    playback: SharedPlayback,
    live: Option<Arc<dyn LiveSession>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    /// Release every resource, best effort, in order: pending voices,
    /// microphone, output context, remote session.
    async fn teardown(mut self) {
        self.cancel.cancel();

        {
            let mut playback = lock_playback(&self.playback);
            let Playback { output, scheduler } = &mut *playback;
            match output.as_mut() {
                Some(output) => scheduler.interrupt(output.as_mut()),
                None => scheduler.reset(),
            }
        }

        if let Some(capture) = self.capture.take() {
            release_capture(capture).await;
        }

        let output = lock_playback(&self.playback).output.take();
        if let Some(output) = output {
            close_output(output).await;
        }

        if let Some(live) = self.live.take() {
            if let Err(e) = live.close().await {
                warn!("Failed to close live session: {:#}", e);
            }
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("Session task panicked: {}", e);
                }
            }
        }
    }
}

async fn release_capture(mut capture: Box<dyn CaptureBackend>) {
    if let Err(e) = capture.stop().await {
        warn!("Failed to release {} capture: {:#}", capture.name(), e);
    }
}

/// Closing may join a device thread, so it runs on the blocking pool
async fn close_output(mut output: Box<dyn AudioOutput>) {
    let closed = tokio::task::spawn_blocking(move || {
        let result = output.close();
        (output.name().to_string(), result)
    })
    .await;

    match closed {
        Ok((_, Ok(()))) => {}
        Ok((name, Err(e))) => warn!("Failed to close {} output: {:#}", name, e),
        Err(e) => error!("Output close task failed: {}", e),
    }
}

/// The audio session manager.
///
/// Owns the microphone, the output context and the remote session for the
/// duration of one `start`..`stop` cycle and guarantees all three are
/// released on every path. At most one session is active per instance.
pub struct SessionCore {
    config: SessionConfig,
    connector: Arc<dyn LiveConnector>,
    devices: Arc<dyn AudioDevices>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    counters: Arc<SessionCounters>,
    active: ActiveSlot,
}

impl SessionCore {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn LiveConnector>,
        devices: Arc<dyn AudioDevices>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Idle);
        Self {
            config,
            connector,
            devices,
            status: Arc::new(status),
            counters: Arc::new(SessionCounters::default()),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn is_speaking(&self) -> bool {
        self.counters.speaking.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot(self.status())
    }

    /// Whether resources are currently held (set between start and stop)
    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Where the next inbound chunk would be scheduled; 0 when idle
    pub async fn next_start_time(&self) -> f64 {
        match self.active.lock().await.as_ref() {
            Some(session) => lock_playback(&session.playback).scheduler.next_start_time(),
            None => 0.0,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// Open a session: microphone, output context, then the remote session.
    ///
    /// Events for the running session arrive on `events`. On any failure
    /// everything acquired so far is released before the error returns.
    pub async fn start(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), SessionError> {
        let cancel = CancellationToken::new();
        let playback: SharedPlayback = Arc::new(StdMutex::new(Playback::default()));

        let api_key = {
            let mut active = self.active.lock().await;
            if active.is_some() {
                warn!("Session already active");
                return Err(SessionError::AlreadyActive);
            }

            let api_key = match self.config.validate() {
                Ok(key) => key.to_string(),
                Err(e) => {
                    error!("Session configuration invalid: {}", e);
                    self.set_status(ConnectionStatus::Error);
                    return Err(e);
                }
            };

            *active = Some(ActiveSession {
                cancel: cancel.clone(),
                capture: None,
                playback: Arc::clone(&playback),
                live: None,
                tasks: Vec::new(),
            });
            api_key
        };

        self.counters.reset();
        self.set_status(ConnectionStatus::Connecting);
        info!(model = %self.config.model, voice = %self.config.voice, "Starting session");

        match self.setup(&cancel, &api_key, playback, events).await {
            Ok(()) => {
                let active = self.active.lock().await;
                if cancel.is_cancelled() {
                    return Err(SessionError::Cancelled);
                }
                self.set_status(ConnectionStatus::Active);
                drop(active);
                info!("Session active");
                Ok(())
            }
            Err(SessionError::Cancelled) => {
                info!("Session start cancelled by stop");
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                error!("Session setup failed: {}", e);
                if self.teardown_if_current(&cancel).await {
                    self.set_status(ConnectionStatus::Error);
                }
                Err(e)
            }
        }
    }

    /// Tear down the session. Idempotent and safe from any state.
    pub async fn stop(&self) {
        let session = {
            let mut active = self.active.lock().await;
            let session = active.take();
            if let Some(session) = &session {
                session.cancel.cancel();
            }
            session
        };

        if let Some(session) = session {
            info!("Stopping session");
            session.teardown().await;
            info!("Session stopped");
        }

        self.counters.speaking.store(false, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Idle);
    }

    async fn teardown_if_current(&self, cancel: &CancellationToken) -> bool {
        let session = {
            let mut active = self.active.lock().await;
            if cancel.is_cancelled() {
                None
            } else {
                let session = active.take();
                if let Some(session) = &session {
                    session.cancel.cancel();
                }
                session
            }
        };

        match session {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => false,
        }
    }

    /// Hand `value` to the current session unless stop has begun, in which
    /// case it is returned so the caller can release it.
    async fn adopt<T>(
        &self,
        cancel: &CancellationToken,
        value: T,
        store: impl FnOnce(&mut ActiveSession, T),
    ) -> Result<(), T> {
        let mut active = self.active.lock().await;
        if cancel.is_cancelled() {
            return Err(value);
        }
        match active.as_mut() {
            Some(session) => {
                store(session, value);
                Ok(())
            }
            None => Err(value),
        }
    }

    async fn setup(
        &self,
        cancel: &CancellationToken,
        api_key: &str,
        playback: SharedPlayback,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), SessionError> {
        // Microphone
        let mut capture = self.devices.open_microphone().map_err(device_error)?;
        let frames = capture.start().await.map_err(device_error)?;
        info!(backend = capture.name(), "Microphone acquired");
        if let Err(capture) = self
            .adopt(cancel, capture, |s, c| s.capture = Some(c))
            .await
        {
            release_capture(capture).await;
            return Err(SessionError::Cancelled);
        }

        // Output context
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mut output = self
            .devices
            .open_output(ended_tx)
            .await
            .map_err(device_error)?;
        if let Err(e) = output.resume() {
            close_output(output).await;
            return Err(device_error(e));
        }
        info!(backend = output.name(), "Output context ready");
        if let Err(output) = self
            .adopt(cancel, output, |s, o| {
                lock_playback(&s.playback).output = Some(o)
            })
            .await
        {
            close_output(output).await;
            return Err(SessionError::Cancelled);
        }

        // Hooks are live before the connection is awaited
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        let (handle_tx, handle_rx) = watch::channel::<Option<Arc<dyn LiveSession>>>(None);

        let actor = SessionActor {
            cancel: cancel.clone(),
            events,
            playback,
            status: Arc::clone(&self.status),
            counters: Arc::clone(&self.counters),
            active: Arc::downgrade(&self.active),
        };
        let tasks = vec![
            tokio::spawn(actor.run(live_rx, ended_rx)),
            tokio::spawn(run_uplink(
                frames,
                handle_rx,
                cancel.clone(),
                Arc::clone(&self.counters),
            )),
        ];
        if let Err(tasks) = self.adopt(cancel, tasks, |s, t| s.tasks.extend(t)).await {
            for task in tasks {
                let _ = task.await;
            }
            return Err(SessionError::Cancelled);
        }

        // Remote session
        let request = self.config.connect_request(api_key);
        let timeout = self.config.connect_timeout;
        let live = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            result = tokio::time::timeout(timeout, self.connector.connect(request, live_tx)) => {
                match result {
                    Ok(Ok(live)) => live,
                    Ok(Err(e)) => return Err(SessionError::Connection(format!("{:#}", e))),
                    Err(_) => {
                        return Err(SessionError::Connection(format!(
                            "no response within {:?}",
                            timeout
                        )))
                    }
                }
            }
        };

        if let Err(live) = self
            .adopt(cancel, Arc::clone(&live), |s, l| s.live = Some(l))
            .await
        {
            if let Err(e) = live.close().await {
                warn!("Failed to close live session: {:#}", e);
            }
            return Err(SessionError::Cancelled);
        }

        let _ = handle_tx.send(Some(live));
        Ok(())
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        if let Ok(active) = self.active.try_lock() {
            if let Some(session) = active.as_ref() {
                session.cancel.cancel();
            }
        }
    }
}

/// Forward captured frames, in capture order, once the remote handle exists.
async fn run_uplink(
    mut frames: mpsc::Receiver<AudioFrame>,
    mut handle_rx: watch::Receiver<Option<Arc<dyn LiveSession>>>,
    cancel: CancellationToken,
    counters: Arc<SessionCounters>,
) {
    let live = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        resolved = handle_rx.wait_for(Option::is_some) => resolved.ok().and_then(|h| (*h).clone()),
    };
    let Some(live) = live else {
        debug!("Uplink ended before the live session opened");
        return;
    };

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let blob = MediaBlob {
            mime_type: INPUT_MIME_TYPE.to_string(),
            data: encode_samples(&frame.samples),
        };

        // Skipped, not queued, once closing has begun
        if cancel.is_cancelled() {
            break;
        }

        match live.send_realtime_input(blob).await {
            Ok(()) => {
                let sent = counters.frames_sent.fetch_add(1, Ordering::SeqCst) + 1;
                if sent == 1 || sent % 50 == 0 {
                    debug!(frames = sent, "Forwarded microphone frames");
                }
            }
            Err(e) => debug!(sequence = frame.sequence, "Dropped outbound frame: {:#}", e),
        }
    }

    debug!("Uplink stopped");
}

/// Serializes every inbound event source of one session: remote messages
/// and end-of-playback notifications.
struct SessionActor {
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<SessionEvent>,
    playback: SharedPlayback,
    status: Arc<watch::Sender<ConnectionStatus>>,
    counters: Arc<SessionCounters>,
    active: Weak<Mutex<Option<ActiveSession>>>,
}

impl SessionActor {
    async fn run(
        self,
        mut live_rx: mpsc::UnboundedReceiver<LiveEvent>,
        mut ended_rx: mpsc::UnboundedReceiver<VoiceId>,
    ) {
        let mut live_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = live_rx.recv(), if live_open => match event {
                    Some(event) => self.on_live_event(event),
                    None => live_open = false,
                },
                Some(id) = ended_rx.recv() => self.on_ended(id),
            }
        }
        debug!("Session actor stopped");
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_speaking(&self, speaking: bool) {
        self.counters.speaking.store(speaking, Ordering::SeqCst);
        self.emit(SessionEvent::Speaking(speaking));
    }

    fn on_live_event(&self, event: LiveEvent) {
        if self.cancel.is_cancelled() {
            return;
        }

        match event {
            LiveEvent::Open => info!("Live session open"),
            LiveEvent::Message(msg) => {
                if let Some(content) = msg.server_content {
                    self.on_content(content);
                }
            }
            LiveEvent::Error(detail) => {
                error!(error = %detail, "Live session error");
                self.end_session(
                    ConnectionStatus::Error,
                    SessionEvent::Error(SessionError::Protocol),
                );
            }
            LiveEvent::Close { reason } => {
                info!(reason = ?reason, "Live session closed by remote");
                self.end_session(ConnectionStatus::Idle, SessionEvent::Closed);
            }
        }
    }

    /// Release the session from the remote side, then report `event`.
    ///
    /// Runs on its own task since teardown joins this actor. The slot stays
    /// locked until the status is final, so a racing `stop` or `start` sees
    /// either the whole session or none of it.
    fn end_session(&self, status: ConnectionStatus, event: SessionEvent) {
        let Some(active) = self.active.upgrade() else {
            return;
        };
        let cancel = self.cancel.clone();
        let status_tx = Arc::clone(&self.status);
        let counters = Arc::clone(&self.counters);
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut slot = active.lock().await;
            if cancel.is_cancelled() {
                return;
            }
            let Some(session) = slot.take() else {
                return;
            };
            session.teardown().await;
            counters.speaking.store(false, Ordering::SeqCst);
            status_tx.send_replace(status);
            drop(slot);

            info!(status = ?status, "Session released after remote end");
            let _ = events.send(event);
        });
    }

    /// All facets of one message are handled, in this order.
    fn on_content(&self, content: ServerContent) {
        if let Some(t) = &content.output_transcription {
            if !t.text.is_empty() {
                self.emit(SessionEvent::Transcription {
                    speaker: Speaker::Assistant,
                    text: t.text.clone(),
                });
            }
        }

        if let Some(t) = &content.input_transcription {
            if !t.text.is_empty() {
                self.emit(SessionEvent::Transcription {
                    speaker: Speaker::User,
                    text: t.text.clone(),
                });
            }
        }

        if content.is_turn_complete() {
            self.emit(SessionEvent::TurnComplete);
        }

        for payload in content.audio_payloads() {
            self.play_chunk(payload);
        }

        if content.is_interrupted() {
            self.interrupt();
        }
    }

    fn play_chunk(&self, payload: &str) {
        let buffer = match decode_base64(payload)
            .and_then(|bytes| raw_pcm_to_audio_buffer(&bytes, OUTPUT_SAMPLE_RATE, 1))
        {
            Ok(buffer) => buffer,
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::SeqCst);
                warn!(error = %e, "Skipping undecodable audio chunk");
                return;
            }
        };

        let mut playback = lock_playback(&self.playback);
        let Playback { output, scheduler } = &mut *playback;
        let Some(output) = output.as_mut() else {
            return;
        };

        match scheduler.schedule(output.as_mut(), buffer) {
            Ok(change) => {
                self.counters.chunks_scheduled.fetch_add(1, Ordering::SeqCst);
                if let Some(speaking) = change {
                    self.set_speaking(speaking);
                }
            }
            Err(e) => warn!("Failed to schedule audio chunk: {:#}", e),
        }
    }

    fn interrupt(&self) {
        {
            let mut playback = lock_playback(&self.playback);
            let Playback { output, scheduler } = &mut *playback;
            match output.as_mut() {
                Some(output) => scheduler.interrupt(output.as_mut()),
                None => scheduler.reset(),
            }
        }
        debug!("Playback interrupted");
        self.set_speaking(false);
    }

    fn on_ended(&self, id: VoiceId) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.counters.chunks_played.fetch_add(1, Ordering::SeqCst);
        let change = lock_playback(&self.playback).scheduler.on_ended(id);
        if let Some(speaking) = change {
            self.set_speaking(speaking);
        }
    }
}
