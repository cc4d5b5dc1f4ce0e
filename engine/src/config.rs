//! Engine configuration
//!
//! All knobs are environment-driven with sensible defaults, so a deployment
//! can tune them without code changes.

/// Get an environment variable with a default value
///
/// # Example
/// ```
/// use cadence_engine::config::env;
///
/// let concurrency: usize = env("AUTOMATION_WORKER_CONCURRENCY", 4);
/// ```
pub fn env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an optional environment variable
pub fn env_optional<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Automation engine configuration
///
/// # Environment Variables
///
/// - `AUTOMATION_WORKER_CONCURRENCY` - Max step jobs executed concurrently (default: 4)
/// - `AUTOMATION_MAX_ATTEMPTS` - Max delivery attempts per step job (default: 3)
/// - `AUTOMATION_RETRY_BACKOFF_MS` - Linear backoff per failed attempt in milliseconds (default: 5000)
/// - `AUTOMATION_SWEEP_INTERVAL_SECS` - Due-step sweep interval in seconds (default: 300)
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Max concurrent step executions in the job runtime
    pub worker_concurrency: usize,
    /// Max delivery attempts per step job
    pub max_attempts: u32,
    /// Linear backoff per failed attempt, in milliseconds
    pub retry_backoff_ms: u64,
    /// Sweep interval for the due-step sweeper, in seconds
    pub sweep_interval_secs: u64,
}

impl AutomationConfig {
    /// Build config from environment variables
    pub fn from_env() -> Self {
        Self {
            worker_concurrency: env("AUTOMATION_WORKER_CONCURRENCY", 4usize),
            max_attempts: env("AUTOMATION_MAX_ATTEMPTS", 3u32),
            retry_backoff_ms: env("AUTOMATION_RETRY_BACKOFF_MS", 5000u64),
            sweep_interval_secs: env("AUTOMATION_SWEEP_INTERVAL_SECS", 300u64),
        }
    }
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
