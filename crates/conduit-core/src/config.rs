//! Typed runtime configuration, assembled from environment variables at startup.
//!
//! Every knob named in the external-interfaces contract gets a field here with a documented
//! default; a malformed value fails [`RuntimeConfig::from_env`] at startup instead of surfacing
//! as a confusing runtime error on first use.

use std::time::Duration;

/// Process-wide configuration. Construct once at startup via [`RuntimeConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Connection string for the session store backend. Accepts a filesystem path for the
    /// bundled SQLite engine (the only backend this runtime implements) or, in principle, a
    /// network DSN for a future engine swap.
    pub db_url: String,
    pub llm_model: String,
    /// `false` selects immediate persistence (the default, see SPEC_FULL.md §4.2).
    pub use_event_driven_persistence: bool,
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub ws_heartbeat_interval: Duration,
    pub internal_api_key: Option<String>,
    pub approval_default_timeout: Duration,
    pub orchestrator_max_iterations: usize,
    pub log_level: String,
    pub session_retention_ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_url: "conduit.db".to_string(),
            llm_model: "gpt-4o".to_string(),
            use_event_driven_persistence: false,
            max_concurrent_requests: 64,
            request_timeout: Duration::from_secs(60),
            ws_heartbeat_interval: Duration::from_secs(30),
            internal_api_key: None,
            approval_default_timeout: Duration::from_secs(300),
            orchestrator_max_iterations: 10,
            log_level: "info".to_string(),
            session_retention_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables, falling back to defaults for anything
    /// unset. Returns an error describing which variable failed to parse, rather than panicking.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            db_url: env_or("DB_URL", defaults.db_url),
            llm_model: env_or("LLM_MODEL", defaults.llm_model),
            use_event_driven_persistence: env_bool(
                "USE_EVENT_DRIVEN_PERSISTENCE",
                defaults.use_event_driven_persistence,
            )?,
            max_concurrent_requests: env_usize(
                "MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )?,
            request_timeout: env_secs("REQUEST_TIMEOUT", defaults.request_timeout)?,
            ws_heartbeat_interval: env_secs(
                "WS_HEARTBEAT_INTERVAL",
                defaults.ws_heartbeat_interval,
            )?,
            internal_api_key: std::env::var("INTERNAL_API_KEY").ok(),
            approval_default_timeout: env_secs(
                "APPROVAL_DEFAULT_TIMEOUT_SECONDS",
                defaults.approval_default_timeout,
            )?,
            orchestrator_max_iterations: env_usize(
                "ORCHESTRATOR_MAX_ITERATIONS",
                defaults.orchestrator_max_iterations,
            )?,
            log_level: env_or("LOG_LEVEL", defaults.log_level),
            session_retention_ttl: defaults.session_retention_ttl,
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<bool>()
            .map_err(|e| anyhow::anyhow!("{key} must be a bool: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_usize(key: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<usize>()
            .map_err(|e| anyhow::anyhow!("{key} must be a non-negative integer: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: Duration) -> anyhow::Result<Duration> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| anyhow::anyhow!("{key} must be an integer number of seconds: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_immediate_persistence() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.use_event_driven_persistence);
        assert_eq!(cfg.approval_default_timeout, Duration::from_secs(300));
    }
}
