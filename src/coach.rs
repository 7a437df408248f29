// The interview coach: a session core plus the transcript, the speaking
// indicator, the usage gate and user-facing error text.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{CoachError, SessionError};
use crate::session::{ConnectionStatus, SessionCore, SessionEvent, SessionStats};
use crate::transcript::{TranscriptEntry, TranscriptStore};
use crate::usage::{UsageGate, UsageReport};

/// Shown when a session could not be opened
pub const CONNECTION_ERROR_MESSAGE: &str = "ချိတ်ဆက်မှု အမှားအယွင်းရှိနေပါသည်။";

/// Shown for microphone failures and errors on a running session
pub const MICROPHONE_ERROR_MESSAGE: &str =
    "မိုက်ခရိုဖုန်း ချိတ်ဆက်မှု အဆင်မပြေပါ။ ပြန်လည်ကြိုးစားပေးပါ။";

/// Localized recovery text for a session error
pub fn error_message(err: &SessionError) -> &'static str {
    match err {
        SessionError::Device(_) | SessionError::Protocol => MICROPHONE_ERROR_MESSAGE,
        _ => CONNECTION_ERROR_MESSAGE,
    }
}

/// What the user sees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachStatus {
    pub status: ConnectionStatus,
    pub speaking: bool,
    pub error: Option<String>,
    pub payment_required: bool,
    pub stats: SessionStats,
}

#[derive(Debug, Clone)]
struct CoachState {
    status: ConnectionStatus,
    speaking: bool,
    error: Option<String>,
    payment_required: bool,
}

struct CoachInner {
    core: SessionCore,
    transcript: RwLock<TranscriptStore>,
    usage: Mutex<UsageGate>,
    state: RwLock<CoachState>,
    /// Cancels the usage ticker of the running session
    run: Mutex<Option<CancellationToken>>,
    /// Held for the whole of one `start`
    starting: Mutex<()>,
    tick: Duration,
}

/// Start/stop controller with usage enforcement
#[derive(Clone)]
pub struct Coach {
    inner: Arc<CoachInner>,
}

impl Coach {
    pub fn new(core: SessionCore, usage: UsageGate) -> Self {
        Self::with_tick(core, usage, Duration::from_secs(1))
    }

    /// Usage is charged every `tick` while a session is active
    pub fn with_tick(core: SessionCore, usage: UsageGate, tick: Duration) -> Self {
        Self {
            inner: Arc::new(CoachInner {
                core,
                transcript: RwLock::new(TranscriptStore::new()),
                usage: Mutex::new(usage),
                state: RwLock::new(CoachState {
                    status: ConnectionStatus::Idle,
                    speaking: false,
                    error: None,
                    payment_required: false,
                }),
                run: Mutex::new(None),
                starting: Mutex::new(()),
                tick,
            }),
        }
    }

    pub fn core(&self) -> &SessionCore {
        &self.inner.core
    }

    /// Start a voice session unless the usage limit is reached
    pub async fn start(&self) -> Result<(), CoachError> {
        let inner = &self.inner;

        // A concurrent start owns the displayed status until it returns
        let Ok(_starting) = inner.starting.try_lock() else {
            return Err(SessionError::AlreadyActive.into());
        };

        if inner.usage.lock().await.is_exhausted() {
            info!("Usage limit reached, refusing to start");
            inner.state.write().await.payment_required = true;
            return Err(CoachError::PaymentRequired);
        }

        // Leave the running session's status alone
        if inner.core.is_active().await {
            return Err(SessionError::AlreadyActive.into());
        }

        {
            let mut state = inner.state.write().await;
            state.error = None;
            state.status = ConnectionStatus::Connecting;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_event_pump(Arc::clone(inner), events_rx));

        match inner.core.start(events_tx).await {
            Ok(()) => {
                let mut state = inner.state.write().await;
                // A remote close or error may already have been handled
                if state.status == ConnectionStatus::Connecting {
                    state.status = ConnectionStatus::Active;
                    let token = CancellationToken::new();
                    *inner.run.lock().await = Some(token.clone());
                    tokio::spawn(run_usage_ticker(Arc::clone(inner), token));
                }
                Ok(())
            }
            Err(SessionError::AlreadyActive) => Err(SessionError::AlreadyActive.into()),
            Err(e) => {
                error!("Failed to start session: {}", e);
                let mut state = inner.state.write().await;
                if e == SessionError::Cancelled {
                    state.status = ConnectionStatus::Idle;
                } else {
                    state.status = ConnectionStatus::Error;
                    state.error = Some(error_message(&e).to_string());
                }
                Err(e.into())
            }
        }
    }

    /// Stop the session (if any). Idempotent.
    pub async fn stop(&self) {
        self.inner.halt().await;
    }

    pub async fn status(&self) -> CoachStatus {
        let state = self.inner.state.read().await.clone();
        CoachStatus {
            status: state.status,
            speaking: state.speaking,
            error: state.error,
            payment_required: state.payment_required,
            stats: self.inner.core.stats(),
        }
    }

    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.inner.transcript.read().await.entries().to_vec()
    }

    pub async fn clear_transcript(&self) {
        self.inner.transcript.write().await.clear();
    }

    pub async fn usage(&self) -> UsageReport {
        self.inner.usage.lock().await.report()
    }

    /// Mark the account paid and clear the payment prompt
    pub async fn upgrade(&self) -> anyhow::Result<UsageReport> {
        let report = {
            let mut usage = self.inner.usage.lock().await;
            usage.upgrade()?;
            usage.report()
        };
        self.inner.state.write().await.payment_required = false;
        Ok(report)
    }
}

impl CoachInner {
    /// Release the session without touching the displayed status
    async fn release(&self) {
        if let Some(token) = self.run.lock().await.take() {
            token.cancel();
        }
        self.core.stop().await;
    }

    async fn halt(&self) {
        self.release().await;
        let mut state = self.state.write().await;
        state.status = ConnectionStatus::Idle;
        state.speaking = false;
    }
}

async fn run_event_pump(inner: Arc<CoachInner>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            SessionEvent::Transcription { .. } | SessionEvent::TurnComplete => {
                inner.transcript.write().await.apply(&event);
            }
            SessionEvent::Speaking(speaking) => {
                inner.state.write().await.speaking = *speaking;
            }
            SessionEvent::Error(e) => {
                warn!("Session error: {}", e);
                {
                    let mut state = inner.state.write().await;
                    state.status = ConnectionStatus::Error;
                    state.error = Some(error_message(e).to_string());
                    state.speaking = false;
                }
                inner.release().await;
            }
            SessionEvent::Closed => {
                info!("Session closed by remote");
                inner.halt().await;
            }
        }
    }
}

async fn run_usage_ticker(inner: Arc<CoachInner>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.tick);
    ticker.tick().await;
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let reached = {
            let mut usage = inner.usage.lock().await;
            if token.is_cancelled() {
                break;
            }
            match usage.record(elapsed) {
                Ok(reached) => reached,
                Err(e) => {
                    warn!("Failed to persist usage: {:#}", e);
                    usage.is_exhausted()
                }
            }
        };

        if reached {
            info!("Usage limit reached, stopping session");
            inner.state.write().await.payment_required = true;
            inner.halt().await;
            break;
        }
    }
}
