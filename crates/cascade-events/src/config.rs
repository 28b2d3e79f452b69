//! Configuration for the event engine.
//!
//! Three layers, in priority order: compiled defaults, an optional
//! JSON file, and `CASCADE_*` environment overrides for the knobs
//! operators actually turn.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EventsError, Result};

/// Bus tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum events dispatched concurrently. One event's entire
    /// handler fan-out runs inside a single slot.
    pub max_concurrent_events: usize,
    /// Terminal events retained in the history ring.
    pub history_limit: usize,
    /// Poll interval for `wait_for_event` and shutdown draining.
    pub poll_interval_ms: u64,
    /// Bound on the shutdown drain. `None` waits forever.
    pub drain_timeout_ms: Option<u64>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_concurrent_events: 8,
            history_limit: 1000,
            poll_interval_ms: 100,
            drain_timeout_ms: Some(30_000),
        }
    }
}

impl BusConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Drain timeout as a [`Duration`], if bounded.
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

/// Persistence tuning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path for the SQLite fallback. `None` keeps it in-memory.
    pub sqlite_path: Option<PathBuf>,
    /// Cap on the global recent-events index (oldest trimmed).
    pub recent_index_limit: usize,
}

impl StoreConfig {
    /// Default recent-index cap.
    pub const DEFAULT_RECENT_INDEX_LIMIT: usize = 10_000;

    /// The configured cap, falling back to the default when unset.
    #[must_use]
    pub fn recent_index_limit(&self) -> usize {
        if self.recent_index_limit == 0 {
            Self::DEFAULT_RECENT_INDEX_LIMIT
        } else {
            self.recent_index_limit
        }
    }
}

/// Orchestrator feature toggles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Store events best-effort after bus admission.
    pub persistence_enabled: bool,
    /// Resolve lineage before publication.
    pub tracking_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: true,
            tracking_enabled: true,
        }
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Bus tuning.
    pub bus: BusConfig,
    /// Persistence tuning.
    pub store: StoreConfig,
    /// Orchestrator toggles.
    pub orchestrator: OrchestratorConfig,
}

impl CascadeConfig {
    /// Load from a JSON file, then apply env overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| EventsError::Persistence {
            store: "config",
            message: format!("read {}: {e}", path.display()),
        })?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Compiled defaults with env overrides applied.
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `CASCADE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse("CASCADE_MAX_CONCURRENT_EVENTS") {
            self.bus.max_concurrent_events = n;
        }
        if let Some(n) = env_parse("CASCADE_HISTORY_LIMIT") {
            self.bus.history_limit = n;
        }
        if let Some(n) = env_parse("CASCADE_DRAIN_TIMEOUT_MS") {
            self.bus.drain_timeout_ms = Some(n);
        }
        if let Ok(path) = std::env::var("CASCADE_SQLITE_PATH") {
            if !path.is_empty() {
                self.store.sqlite_path = Some(PathBuf::from(path));
            }
        }
        if let Some(enabled) = env_parse("CASCADE_PERSISTENCE_ENABLED") {
            self.orchestrator.persistence_enabled = enabled;
        }
        if let Some(enabled) = env_parse("CASCADE_TRACKING_ENABLED") {
            self.orchestrator.tracking_enabled = enabled;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, raw, "ignoring unparseable env override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = CascadeConfig::default();
        assert_eq!(c.bus.max_concurrent_events, 8);
        assert_eq!(c.bus.history_limit, 1000);
        assert_eq!(c.bus.drain_timeout(), Some(Duration::from_secs(30)));
        assert!(c.orchestrator.persistence_enabled);
        assert!(c.orchestrator.tracking_enabled);
        assert!(c.store.sqlite_path.is_none());
    }

    #[test]
    fn zero_recent_limit_falls_back_to_default() {
        let c = StoreConfig::default();
        assert_eq!(
            c.recent_index_limit(),
            StoreConfig::DEFAULT_RECENT_INDEX_LIMIT
        );
    }

    #[test]
    fn json_round_trip() {
        let c = CascadeConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: CascadeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bus.max_concurrent_events, c.bus.max_concurrent_events);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: CascadeConfig =
            serde_json::from_str(r#"{"bus": {"history_limit": 5}}"#).unwrap();
        assert_eq!(parsed.bus.history_limit, 5);
        assert_eq!(parsed.bus.max_concurrent_events, 8);
        assert!(parsed.orchestrator.persistence_enabled);
    }
}
