use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{CaptureConfig, CAPTURE_FRAME_SIZE};
use crate::live::GEMINI_LIVE_WS_URL;
use crate::session::{SessionConfig, MODEL_NAME, SYSTEM_INSTRUCTION, VOICE_NAME};
use crate::usage::{UsageLimits, FREE_TRIAL_LIMIT_MS, PAID_TIME_LIMIT_MS};

/// Environment variables checked for the API key when the file has none
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub usage: UsageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "thandar-coach".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket endpoint of the live service
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    /// Overrides the built-in coach persona
    pub system_instruction: Option<String>,
    pub connect_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_LIVE_WS_URL.to_string(),
            model: MODEL_NAME.to_string(),
            voice: VOICE_NAME.to_string(),
            system_instruction: None,
            connect_timeout_secs: 15,
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Input device name (unset = system default)
    pub input_device: Option<String>,
    /// Output device name (unset = system default)
    pub output_device: Option<String>,
    /// Samples per uplink frame
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: CAPTURE_FRAME_SIZE,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Where the usage record is kept; `~` is expanded
    pub stats_path: String,
    pub free_trial_minutes: u64,
    pub paid_minutes: u64,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            stats_path: "~/.thandar-coach/user-stats.json".to_string(),
            free_trial_minutes: FREE_TRIAL_LIMIT_MS / 60_000,
            paid_minutes: PAID_TIME_LIMIT_MS / 60_000,
        }
    }
}

impl Config {
    /// Load `path` (any extension the config crate understands, optional)
    /// with `THANDAR__SECTION__KEY` environment overrides on top.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("THANDAR")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let mut cfg: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        if cfg.live.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            cfg.live.api_key = api_key_from_env(|var| std::env::var(var).ok());
        }

        Ok(cfg)
    }

    /// Address for the HTTP API, e.g. `127.0.0.1:3000`
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.live.model.clone(),
            voice: self.live.voice.clone(),
            system_instruction: self
                .live
                .system_instruction
                .clone()
                .unwrap_or_else(|| SYSTEM_INSTRUCTION.to_string()),
            api_key: self.live.api_key.clone(),
            connect_timeout: Duration::from_secs(self.live.connect_timeout_secs),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            frame_size: self.audio.frame_size,
            device_name: self.audio.input_device.clone(),
            ..CaptureConfig::default()
        }
    }

    pub fn usage_limits(&self) -> UsageLimits {
        UsageLimits {
            free_trial_ms: self.usage.free_trial_minutes * 60_000,
            paid_ms: self.usage.paid_minutes * 60_000,
        }
    }

    pub fn usage_stats_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.usage.stats_path).into_owned())
    }
}

/// First non-blank key among `API_KEY_VARS`
fn api_key_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS
        .iter()
        .find_map(|var| lookup(var).filter(|k| !k.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("does/not/exist/thandar-coach").unwrap();
        assert_eq!(cfg.service.http.port, 3000);
        assert_eq!(cfg.live.model, MODEL_NAME);
        assert_eq!(cfg.audio.frame_size, CAPTURE_FRAME_SIZE);
        assert_eq!(cfg.usage_limits(), UsageLimits::default());
    }

    #[test]
    fn blank_api_key_variable_does_not_hide_the_next() {
        let key = api_key_from_env(|var| match var {
            "GEMINI_API_KEY" => Some("  ".to_string()),
            "API_KEY" => Some("fallback-key".to_string()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("fallback-key"));

        let key = api_key_from_env(|var| (var == "GEMINI_API_KEY").then(|| "primary".to_string()));
        assert_eq!(key.as_deref(), Some("primary"));

        assert_eq!(api_key_from_env(|_| Some(String::new())), None);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coach.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[service.http]
port = 8088

[live]
voice = "Puck"
connect_timeout_secs = 5
api_key = "from-file"

[audio]
frame_size = 2048

[usage]
stats_path = "~/coach/stats.json"
free_trial_minutes = 1
"#
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.http_addr(), "127.0.0.1:8088");

        let session = cfg.session_config();
        assert_eq!(session.voice, "Puck");
        assert_eq!(session.model, MODEL_NAME);
        assert_eq!(session.api_key.as_deref(), Some("from-file"));
        assert_eq!(session.connect_timeout, Duration::from_secs(5));
        assert_eq!(session.system_instruction, SYSTEM_INSTRUCTION);

        assert_eq!(cfg.capture_config().frame_size, 2048);
        assert_eq!(cfg.usage_limits().free_trial_ms, 60_000);
        assert!(!cfg.usage_stats_path().to_string_lossy().starts_with('~'));
    }
}
