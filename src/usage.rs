use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Free trial: 3 minutes
pub const FREE_TRIAL_LIMIT_MS: u64 = 3 * 60 * 1000;

/// Paid tier adds 5 hours on top of the trial
pub const PAID_TIME_LIMIT_MS: u64 = 5 * 60 * 60 * 1000;

/// Persisted usage record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub accumulated_time_ms: u64,
    pub is_paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<String>,
}

/// Tier limits in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageLimits {
    pub free_trial_ms: u64,
    pub paid_ms: u64,
}

impl Default for UsageLimits {
    fn default() -> Self {
        Self {
            free_trial_ms: FREE_TRIAL_LIMIT_MS,
            paid_ms: PAID_TIME_LIMIT_MS,
        }
    }
}

/// Snapshot for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub accumulated_time_ms: u64,
    pub is_paid: bool,
    pub limit_ms: u64,
    pub remaining_ms: u64,
    /// e.g. "2m 41s"
    pub remaining: String,
    pub exhausted: bool,
}

/// Tracks session time against the trial / paid limits and persists it.
///
/// The gate knows nothing about sessions; the caller feeds it wall-clock
/// deltas while a session is active and stops the session when told the
/// limit was reached.
#[derive(Debug)]
pub struct UsageGate {
    path: Option<PathBuf>,
    limits: UsageLimits,
    stats: UserStats,
}

impl UsageGate {
    /// Load from `path`. A missing file starts a fresh trial; an unreadable
    /// one is logged and replaced.
    pub fn load(path: impl AsRef<Path>, limits: UsageLimits) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let stats = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<UserStats>(&raw) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!("Ignoring corrupt usage file {}: {}", path.display(), e);
                    UserStats::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No usage file at {}, starting trial", path.display());
                UserStats::default()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read usage file {}", path.display()))
            }
        };

        Ok(Self {
            path: Some(path),
            limits,
            stats,
        })
    }

    /// Not persisted
    pub fn in_memory(limits: UsageLimits) -> Self {
        Self {
            path: None,
            limits,
            stats: UserStats::default(),
        }
    }

    pub fn stats(&self) -> &UserStats {
        &self.stats
    }

    pub fn limit_ms(&self) -> u64 {
        if self.stats.is_paid {
            self.limits.free_trial_ms + self.limits.paid_ms
        } else {
            self.limits.free_trial_ms
        }
    }

    pub fn remaining_ms(&self) -> u64 {
        self.limit_ms().saturating_sub(self.stats.accumulated_time_ms)
    }

    pub fn is_exhausted(&self) -> bool {
        self.stats.accumulated_time_ms >= self.limit_ms()
    }

    /// Remaining time as "{minutes}m {seconds}s"
    pub fn format_remaining(&self) -> String {
        let remaining = self.remaining_ms();
        format!("{}m {}s", remaining / 60_000, (remaining % 60_000) / 1000)
    }

    pub fn report(&self) -> UsageReport {
        UsageReport {
            accumulated_time_ms: self.stats.accumulated_time_ms,
            is_paid: self.stats.is_paid,
            limit_ms: self.limit_ms(),
            remaining_ms: self.remaining_ms(),
            remaining: self.format_remaining(),
            exhausted: self.is_exhausted(),
        }
    }

    /// Add active session time and persist. Returns true once the limit is
    /// reached.
    pub fn record(&mut self, elapsed: Duration) -> Result<bool> {
        self.stats.accumulated_time_ms = self
            .stats
            .accumulated_time_ms
            .saturating_add(elapsed.as_millis() as u64);
        self.save()?;
        Ok(self.is_exhausted())
    }

    /// Mark the account paid
    pub fn upgrade(&mut self) -> Result<()> {
        self.stats.is_paid = true;
        if self.stats.registration_date.is_none() {
            self.stats.registration_date = Some(Utc::now().to_rfc3339());
        }
        self.save()?;
        info!("Account upgraded, {} remaining", self.format_remaining());
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create usage directory {}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(&self.stats)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write usage file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_limit_and_formatting() {
        let mut gate = UsageGate::in_memory(UsageLimits::default());
        assert_eq!(gate.format_remaining(), "3m 0s");

        gate.record(Duration::from_millis(19_500)).unwrap();
        assert_eq!(gate.format_remaining(), "2m 40s");
        assert!(!gate.is_exhausted());

        assert!(gate.record(Duration::from_secs(200)).unwrap());
        assert_eq!(gate.remaining_ms(), 0);
        assert_eq!(gate.format_remaining(), "0m 0s");
    }

    #[test]
    fn upgrade_extends_limit() {
        let mut gate = UsageGate::in_memory(UsageLimits::default());
        gate.record(Duration::from_secs(180)).unwrap();
        assert!(gate.is_exhausted());

        gate.upgrade().unwrap();
        assert!(!gate.is_exhausted());
        assert_eq!(gate.remaining_ms(), PAID_TIME_LIMIT_MS);
        assert!(gate.stats().registration_date.is_some());
    }

    #[test]
    fn stats_use_camel_case_on_disk() {
        let stats = UserStats {
            accumulated_time_ms: 1200,
            is_paid: true,
            registration_date: None,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert_eq!(json, r#"{"accumulatedTimeMs":1200,"isPaid":true}"#);
    }
}
