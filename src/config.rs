use std::time::Duration;

use serde::Deserialize;

/// Runtime settings of the treasury ledger.
///
/// Loaded from `TREASURY_*` environment variables, e.g. `TREASURY_LOCK_TIMEOUT_MS`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    /// How long a writer waits for a currency chain before giving up.
    pub lock_timeout_ms: u64,
    /// Upper bound for the page size of movement listings.
    pub max_page_size: usize,
    /// Prefix added to the concept of a movement once it has been reversed.
    pub reversal_marker: String,
    /// Fallback log filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            max_page_size: 100,
            reversal_marker: "[REVERSED] ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl TreasuryConfig {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("TREASURY").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max;
        self
    }

    pub fn with_reversal_marker(mut self, marker: impl Into<String>) -> Self {
        self.reversal_marker = marker.into();
        self
    }
}
