use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thandar_coach::{
    create_router, AppState, AudioSource, Coach, Config, ConnectionStatus, GeminiLiveConnector,
    SessionCore, Speaker, SystemDevices, TranscriptEntry, UsageGate,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "thandar-coach")]
#[command(about = "Voice interview coach backed by a live speech model")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/thandar-coach")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Hold a session in the terminal until Ctrl-C
    Talk {
        /// Stream a WAV file instead of the microphone
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show remaining practice time
    Usage,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Thandar Coach v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match args.command {
        Command::Serve => serve(&cfg).await,
        Command::Talk { input } => {
            let source = input.map_or(AudioSource::Microphone, AudioSource::File);
            talk(&cfg, source).await
        }
        Command::Usage => {
            let usage = UsageGate::load(cfg.usage_stats_path(), cfg.usage_limits())?;
            let report = usage.report();
            println!(
                "{} remaining ({} tier{})",
                report.remaining,
                if report.is_paid { "paid" } else { "free trial" },
                if report.exhausted { ", limit reached" } else { "" }
            );
            Ok(())
        }
    }
}

fn build_coach(cfg: &Config, source: AudioSource) -> Result<Coach> {
    let connector = GeminiLiveConnector::new(
        cfg.live.endpoint.clone(),
        Duration::from_secs(cfg.live.connect_timeout_secs),
    );
    let devices = SystemDevices::new(source, cfg.capture_config(), cfg.audio.output_device.clone());
    let core = SessionCore::new(cfg.session_config(), Arc::new(connector), Arc::new(devices));

    let stats_path = cfg.usage_stats_path();
    let usage = UsageGate::load(&stats_path, cfg.usage_limits())
        .with_context(|| format!("Failed to load usage from {}", stats_path.display()))?;

    Ok(Coach::new(core, usage))
}

async fn serve(cfg: &Config) -> Result<()> {
    let coach = build_coach(cfg, AudioSource::Microphone)?;
    let app = create_router(AppState::new(coach.clone()));

    let addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
            coach.stop().await;
        })
        .await?;

    Ok(())
}

async fn talk(cfg: &Config, source: AudioSource) -> Result<()> {
    let coach = build_coach(cfg, source)?;

    if let Err(e) = coach.start().await {
        let status = coach.status().await;
        if let Some(message) = status.error {
            eprintln!("{}", message);
        }
        return Err(e.into());
    }
    println!("Session started. Press Ctrl-C to finish.");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut printer = TranscriptPrinter::default();

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = ticker.tick() => {}
        }

        printer.print(&coach.transcript().await)?;

        let status = coach.status().await;
        if status.payment_required {
            println!("\nPractice time used up. Upgrade to continue.");
            break;
        }
        match status.status {
            ConnectionStatus::Active | ConnectionStatus::Connecting => {}
            ConnectionStatus::Error => {
                println!("\n{}", status.error.unwrap_or_default());
                break;
            }
            ConnectionStatus::Idle => {
                println!("\nSession ended.");
                break;
            }
        }
    }

    coach.stop().await;
    printer.print(&coach.transcript().await)?;
    println!();

    let stats = coach.status().await.stats;
    info!(
        frames_sent = stats.frames_sent,
        chunks_played = stats.chunks_played,
        "Session finished"
    );
    println!("{} remaining", coach.usage().await.remaining);
    Ok(())
}

/// Streams transcript growth to stdout; only the last entry ever grows.
#[derive(Default)]
struct TranscriptPrinter {
    entries: usize,
    last_len: usize,
}

impl TranscriptPrinter {
    fn print(&mut self, transcript: &[TranscriptEntry]) -> Result<()> {
        let mut out = std::io::stdout().lock();

        for (i, entry) in transcript.iter().enumerate().skip(self.entries.saturating_sub(1)) {
            if i + 1 > self.entries {
                let who = match entry.role {
                    Speaker::User => "You",
                    Speaker::Assistant => "Thandar",
                };
                write!(out, "\n{}: {}", who, entry.text)?;
                self.entries = i + 1;
            } else if entry.text.len() > self.last_len {
                write!(out, "{}", &entry.text[self.last_len..])?;
            }
            self.last_len = entry.text.len();
        }

        out.flush()?;
        Ok(())
    }
}
