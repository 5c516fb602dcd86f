//! Environment-backed configuration source
//!
//! Values come from `CONDUCTOR_*` environment variables (with `.env`
//! loading at construction) plus runtime overrides. Overrides notify the
//! daemon loop so dependent services can react.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};

use crate::traits::{ConfigChange, ConfigSource};

/// Prefix for environment variable lookups
const ENV_PREFIX: &str = "CONDUCTOR";

/// Real configuration source implementation
pub struct RealConfigSource {
    /// Runtime overrides, consulted before the environment
    overrides: Mutex<HashMap<String, String>>,
    change_tx: mpsc::Sender<ConfigChange>,
    /// Change receiver handed to the daemon on first take
    change_rx: Mutex<Option<mpsc::Receiver<ConfigChange>>>,
}

impl RealConfigSource {
    pub fn new() -> Self {
        dotenv::dotenv().ok();
        let (change_tx, change_rx) = mpsc::channel(16);
        Self {
            overrides: Mutex::new(HashMap::new()),
            change_tx,
            change_rx: Mutex::new(Some(change_rx)),
        }
    }

    /// Set a runtime override and notify the daemon loop
    pub async fn set(&self, key: &str, value: &str) {
        self.overrides
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        let _ = self
            .change_tx
            .send(ConfigChange {
                key: key.to_string(),
            })
            .await;
    }

    /// Map a dotted key to its environment variable name.
    ///
    /// `health.check_interval` becomes `CONDUCTOR_HEALTH_CHECK_INTERVAL`.
    fn env_name(key: &str) -> String {
        format!("{ENV_PREFIX}_{}", key.replace('.', "_").to_uppercase())
    }
}

impl Default for RealConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigSource for RealConfigSource {
    async fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.lock().await.get(key) {
            return Some(value.clone());
        }
        std::env::var(Self::env_name(key)).ok()
    }

    async fn take_change_stream(&self) -> Option<mpsc::Receiver<ConfigChange>> {
        self.change_rx.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_name_mapping() {
        assert_eq!(
            RealConfigSource::env_name("health.check_interval"),
            "CONDUCTOR_HEALTH_CHECK_INTERVAL"
        );
        assert_eq!(RealConfigSource::env_name("auth_token"), "CONDUCTOR_AUTH_TOKEN");
    }

    #[tokio::test]
    async fn test_override_wins_and_notifies() {
        let config = RealConfigSource::new();
        let mut changes = config.take_change_stream().await.unwrap();

        config.set("health.max_failures", "5").await;
        assert_eq!(
            config.get("health.max_failures").await.as_deref(),
            Some("5")
        );

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, "health.max_failures");
    }

    #[tokio::test]
    async fn test_get_falls_back_to_environment() {
        // process-global mutation, hence the unsafe block
        unsafe { std::env::set_var("CONDUCTOR_FALLBACK_PROBE", "env-value") };
        let config = RealConfigSource::new();
        assert_eq!(
            config.get("fallback_probe").await.as_deref(),
            Some("env-value")
        );
        assert_eq!(config.get("missing_key").await, None);
    }
}
