//! Engine configuration.

use std::time::Duration;

/// Tunables for the dispatcher and the per-message execution loop.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrently active per-message pipelines.
    pub max_workers: usize,
    /// Fixed pause between frontier-descent iterations.
    pub step_delay: Duration,
    /// Timeout applied to each individual capability call.
    pub capability_timeout: Duration,
    /// How many similar prior results to retrieve per execution attempt.
    pub similar_context_k: usize,
    /// Port for the dashboard snapshot server.
    pub dashboard_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            step_delay: Duration::from_secs(1),
            capability_timeout: Duration::from_secs(120),
            similar_context_k: 5,
            dashboard_port: 8080,
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_workers = std::env::var("TASKWEAVE_MAX_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_workers);

        let step_delay = std::env::var("TASKWEAVE_STEP_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.step_delay);

        let capability_timeout = std::env::var("TASKWEAVE_CAPABILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.capability_timeout);

        let similar_context_k = std::env::var("TASKWEAVE_CONTEXT_K")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.similar_context_k);

        let dashboard_port = std::env::var("TASKWEAVE_DASHBOARD_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.dashboard_port);

        Self {
            max_workers,
            step_delay,
            capability_timeout,
            similar_context_k,
            dashboard_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.max_workers >= 1);
        assert_eq!(cfg.similar_context_k, 5);
        assert_eq!(cfg.step_delay, Duration::from_secs(1));
    }
}
