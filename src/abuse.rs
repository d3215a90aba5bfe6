//! Offline scan of the attempt log for abusive clients.
//! Used by: main (scan subcommand), server (periodic task).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::audit::{AttemptStore, IpSummary};
use crate::clock::Clock;
use crate::error::Result;

pub const MAX_LOOKBACK_HOURS: i64 = 366 * 24;
pub const MAX_INTERVAL_SECONDS: u64 = 366 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub lookback_hours: i64,
    pub min_attempts: u64,
    pub min_failures: u64,
    /// Period of the in-server scan; 0 disables it.
    pub interval_seconds: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            min_attempts: 50,
            min_failures: 40,
            interval_seconds: 24 * 3600,
        }
    }
}

pub struct AbuseScanner {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
}

impl AbuseScanner {
    pub fn new(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// IPs whose attempts in the lookback window exceed both thresholds,
    /// most failures first.
    pub fn scan(&self, config: &ScanConfig) -> Result<Vec<IpSummary>> {
        let since = self.clock.now() - Duration::hours(config.lookback_hours.clamp(0, MAX_LOOKBACK_HOURS));
        let mut flagged: Vec<IpSummary> = self
            .store
            .summarize_by_ip(since)?
            .into_iter()
            .filter(|s| s.total_attempts > config.min_attempts && s.failed_attempts > config.min_failures)
            .collect();
        flagged.sort_by(|a, b| {
            b.failed_attempts
                .cmp(&a.failed_attempts)
                .then_with(|| a.ip.cmp(&b.ip))
        });
        Ok(flagged)
    }
}

/// Runs [`AbuseScanner::scan`] every `config.interval_seconds`, logging each flagged IP.
pub async fn run_periodic(scanner: AbuseScanner, config: ScanConfig) {
    if config.interval_seconds == 0 {
        return;
    }
    let period = StdDuration::from_secs(config.interval_seconds.min(MAX_INTERVAL_SECONDS));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match scanner.scan(&config) {
            Ok(flagged) => {
                for s in &flagged {
                    tracing::warn!(
                        ip = %s.ip,
                        total_attempts = s.total_attempts,
                        failed_attempts = s.failed_attempts,
                        "suspicious view count activity"
                    );
                }
                tracing::info!(flagged = flagged.len(), "abuse scan complete");
            }
            Err(e) => tracing::error!(error = %e, "abuse scan failed"),
        }
    }
}
