//! Runtime configuration: JSON file with environment overrides.
//! Used by: main, state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::abuse::{ScanConfig, MAX_INTERVAL_SECONDS, MAX_LOOKBACK_HOURS};
use crate::bot::BotConfig;
use crate::dedup;
use crate::error::{Error, Result};
use crate::ratelimit::{LimiterConfig, MAX_WINDOW_SECONDS};

const DEFAULT_PATH: &str = "viewguard.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DB_PATH: &str = "viewguard.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: String,
    pub global_limit: LimiterConfig,
    pub view_limit: LimiterConfig,
    pub auth_limit: LimiterConfig,
    pub bot: BotConfig,
    pub dedup_ttl_seconds: u64,
    pub max_payload_bytes: usize,
    pub scan: ScanConfig,
    pub backend_deadline_ms: u64,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_proxy_headers: bool,
    pub session_cookie: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.into(),
            db_path: DEFAULT_DB_PATH.into(),
            global_limit: LimiterConfig::global(),
            view_limit: LimiterConfig::view_count(),
            auth_limit: LimiterConfig::session_issue(),
            bot: BotConfig::default(),
            dedup_ttl_seconds: dedup::DEFAULT_TTL_SECONDS,
            max_payload_bytes: 100,
            scan: ScanConfig::default(),
            backend_deadline_ms: 250,
            trust_proxy_headers: false,
            session_cookie: "sessionid".into(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Config(format!("{path}: {e}")))
    }

    /// Reads `VIEWGUARD_CONFIG` (or `viewguard.json`), then applies env overrides.
    /// A missing file means defaults; an unreadable or malformed one is an error.
    pub fn load() -> Result<Self> {
        let path = std::env::var("VIEWGUARD_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.into());
        let mut config = match Self::from_file(&path) {
            Ok(c) => c,
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path, "no config file, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(db) = std::env::var("VIEWGUARD_DB") {
            config.db_path = db;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_cookie.is_empty() {
            return Err(Error::Config("session_cookie must not be empty".into()));
        }
        for limiter in [&self.global_limit, &self.view_limit, &self.auth_limit] {
            if limiter.cache_key_prefix.is_empty() {
                return Err(Error::Config("limiter cache_key_prefix must not be empty".into()));
            }
            if limiter.window_seconds > MAX_WINDOW_SECONDS {
                return Err(Error::Config(format!(
                    "limiter window_seconds must be at most {MAX_WINDOW_SECONDS}"
                )));
            }
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.scan.lookback_hours) {
            return Err(Error::Config(format!(
                "scan.lookback_hours must be between 1 and {MAX_LOOKBACK_HOURS}"
            )));
        }
        if self.scan.interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(Error::Config(format!(
                "scan.interval_seconds must be at most {MAX_INTERVAL_SECONDS}"
            )));
        }
        if self.backend_deadline_ms == 0 {
            return Err(Error::Config("backend_deadline_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn backend_deadline(&self) -> Duration {
        Duration::from_millis(self.backend_deadline_ms)
    }
}
