//! Configuration module
//!
//! Coordinator configuration is constructed once at process start (from the
//! environment or defaults) and passed by reference into the components that
//! need it. There is no hidden static state.

use std::env;
use std::time::Duration;

const DEFAULT_RETRY_DELAY_MS: u64 = 30_000;
const DEFAULT_SMALL_DELAY_MS: u64 = 10;
const DEFAULT_DRIFT_MARGIN_SECS: u64 = 30 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_INITIAL_SWEEP_DELAY_SECS: u64 = 15;
const DEFAULT_MAX_UNPIN_CONCURRENCY: usize = 1000;
const DEFAULT_POOL_TIMEOUT_SECS: u64 = 90;
const DEFAULT_POOL_MANAGER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_NAMESPACE_TIMEOUT_SECS: u64 = 60;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Pin coordinator configuration.
#[derive(Clone, Debug)]
pub struct PinManagerConfig {
    pub database_url: String,
    /// Maximum pin lifetime in milliseconds; requested lifetimes are clamped
    /// to this. `-1` means no limit.
    pub max_lifetime_ms: i64,
    /// Backoff after structural remote failures (no route, pool disabled).
    pub retry_delay: Duration,
    /// Backoff after transient remote failures that should be retried
    /// almost immediately; the small delay prevents tight retry loops.
    pub small_delay: Duration,
    /// Safety margin added to the pool-side sticky expiry so the flag
    /// slightly outlives the logical pin despite clock drift.
    pub clock_drift_margin: Duration,
    /// Interval between sweeper runs (both expiration and unpin sweeps).
    pub sweep_interval: Duration,
    /// Delay before the first sweep, letting the system settle post-startup.
    pub initial_sweep_delay: Duration,
    /// Maximum concurrent in-flight clear-sticky requests per unpin sweep.
    pub max_unpin_concurrency: usize,
    /// Per-request timeout for pool sticky-flag commands.
    pub pool_timeout: Duration,
    /// Per-request timeout for pool selection. Selection may trigger a
    /// stage from archive, so this is deliberately generous.
    pub pool_manager_timeout: Duration,
    /// Per-request timeout for namespace attribute lookups.
    pub namespace_timeout: Duration,
    /// Stage-permission rules, semicolon separated (see [`crate::stage`]).
    /// Empty means staging is denied for everyone.
    pub stage_rules: String,
    /// When true, staging is allowed for all requesters and `stage_rules`
    /// is ignored.
    pub stage_allow_all: bool,
}

impl Default for PinManagerConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_lifetime_ms: -1,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            small_delay: Duration::from_millis(DEFAULT_SMALL_DELAY_MS),
            clock_drift_margin: Duration::from_secs(DEFAULT_DRIFT_MARGIN_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            initial_sweep_delay: Duration::from_secs(DEFAULT_INITIAL_SWEEP_DELAY_SECS),
            max_unpin_concurrency: DEFAULT_MAX_UNPIN_CONCURRENCY,
            pool_timeout: Duration::from_secs(DEFAULT_POOL_TIMEOUT_SECS),
            pool_manager_timeout: Duration::from_secs(DEFAULT_POOL_MANAGER_TIMEOUT_SECS),
            namespace_timeout: Duration::from_secs(DEFAULT_NAMESPACE_TIMEOUT_SECS),
            stage_rules: String::new(),
            stage_allow_all: false,
        }
    }
}

impl PinManagerConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env::var("DATABASE_URL").unwrap_or_default(),
            max_lifetime_ms: env_parse("PIN_MAX_LIFETIME_MS", -1),
            retry_delay: Duration::from_millis(env_parse(
                "PIN_RETRY_DELAY_MS",
                DEFAULT_RETRY_DELAY_MS,
            )),
            small_delay: Duration::from_millis(env_parse(
                "PIN_SMALL_DELAY_MS",
                DEFAULT_SMALL_DELAY_MS,
            )),
            clock_drift_margin: Duration::from_secs(env_parse(
                "PIN_DRIFT_MARGIN_SECS",
                DEFAULT_DRIFT_MARGIN_SECS,
            )),
            sweep_interval: Duration::from_secs(env_parse(
                "PIN_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            initial_sweep_delay: Duration::from_secs(env_parse(
                "PIN_INITIAL_SWEEP_DELAY_SECS",
                DEFAULT_INITIAL_SWEEP_DELAY_SECS,
            )),
            max_unpin_concurrency: env_parse(
                "PIN_MAX_UNPIN_CONCURRENCY",
                DEFAULT_MAX_UNPIN_CONCURRENCY,
            ),
            pool_timeout: Duration::from_secs(env_parse(
                "PIN_POOL_TIMEOUT_SECS",
                DEFAULT_POOL_TIMEOUT_SECS,
            )),
            pool_manager_timeout: Duration::from_secs(env_parse(
                "PIN_POOL_MANAGER_TIMEOUT_SECS",
                DEFAULT_POOL_MANAGER_TIMEOUT_SECS,
            )),
            namespace_timeout: Duration::from_secs(env_parse(
                "PIN_NAMESPACE_TIMEOUT_SECS",
                DEFAULT_NAMESPACE_TIMEOUT_SECS,
            )),
            stage_rules: env::var("PIN_STAGE_RULES").unwrap_or_default(),
            stage_allow_all: env_parse("PIN_STAGE_ALLOW_ALL", false),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_lifetime_ms < -1 {
            anyhow::bail!("PIN_MAX_LIFETIME_MS must be -1 (unlimited) or non-negative");
        }
        if self.max_unpin_concurrency == 0 {
            anyhow::bail!("PIN_MAX_UNPIN_CONCURRENCY must be at least 1");
        }
        if self.sweep_interval.is_zero() {
            anyhow::bail!("PIN_SWEEP_INTERVAL_SECS must be at least 1");
        }
        Ok(())
    }

    /// Clamp a requested lifetime (milliseconds, `-1` = infinite) to the
    /// configured maximum.
    pub fn clamp_lifetime(&self, requested_ms: i64) -> i64 {
        if self.max_lifetime_ms == -1 {
            requested_ms
        } else if requested_ms == -1 {
            self.max_lifetime_ms
        } else {
            requested_ms.min(self.max_lifetime_ms)
        }
    }
}
