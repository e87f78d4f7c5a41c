//! Clone orchestration configuration from environment variables.

use std::time::Duration;

use crate::error::CloneError;

const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 1;
const DEFAULT_DB_PATH: &str = "./clone_state.db";
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 60;

/// Configuration for clone orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneConfig {
    /// Feature flag gating new clones (env: ENABLE_DB_CLONE, default: false).
    pub enable_db_clone: bool,
    /// Reconciliation sweep cadence in seconds (env: CLONE_RECONCILE_INTERVAL_SECS, default: 1).
    pub reconcile_interval_secs: u64,
    /// Path to the SQLite clone state database (env: CLONE_STATE_DB_PATH).
    pub db_path: String,
    /// Deadline for boundary requests that carry none (env: CLONE_RPC_TIMEOUT_SECS, default: 60).
    pub rpc_timeout_secs: u64,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            enable_db_clone: false,
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            db_path: DEFAULT_DB_PATH.to_string(),
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
        }
    }
}

impl CloneConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, CloneError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CloneError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enable_db_clone = lookup("ENABLE_DB_CLONE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let reconcile_interval_secs: u64 = lookup("CLONE_RECONCILE_INTERVAL_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS);
        if reconcile_interval_secs == 0 {
            return Err(CloneError::Configuration(
                "CLONE_RECONCILE_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        let db_path = lookup("CLONE_STATE_DB_PATH")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let rpc_timeout_secs: u64 = lookup("CLONE_RPC_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RPC_TIMEOUT_SECS);

        Ok(Self {
            enable_db_clone,
            reconcile_interval_secs,
            db_path,
            rpc_timeout_secs,
        })
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CloneConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CloneConfig::default());
        assert!(!config.enable_db_clone);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = CloneConfig::from_lookup(lookup(&[
            ("ENABLE_DB_CLONE", "1"),
            ("CLONE_RECONCILE_INTERVAL_SECS", "5"),
            ("CLONE_STATE_DB_PATH", "/data/clones.db"),
            ("CLONE_RPC_TIMEOUT_SECS", "not-a-number"),
        ]))
        .unwrap();
        assert!(config.enable_db_clone);
        assert_eq!(config.reconcile_interval(), Duration::from_secs(5));
        assert_eq!(config.db_path, "/data/clones.db");
        assert_eq!(config.rpc_timeout_secs, 60);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = CloneConfig::from_lookup(lookup(&[("CLONE_RECONCILE_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, CloneError::Configuration(_)));
    }
}
