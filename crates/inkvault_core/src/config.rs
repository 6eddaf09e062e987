//! Configuration for the sync core.
//!
//! Persisted as TOML under a single store key. Every field has a default,
//! so a missing or partial config record always yields a usable value.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{CONFIG_KEY, KeyValueStore};

/// User-configurable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the remote container all synced drawings live in
    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Days between asset-collection passes
    #[serde(default = "default_cleanup_interval_days")]
    pub asset_cleanup_interval_days: i64,

    /// Whether a detected content change also uploads to the provider
    #[serde(default = "default_upload_on_change")]
    pub upload_on_change: bool,
}

fn default_container_name() -> String {
    "inkvault".to_string()
}

fn default_cleanup_interval_days() -> i64 {
    3
}

fn default_upload_on_change() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            container_name: default_container_name(),
            asset_cleanup_interval_days: default_cleanup_interval_days(),
            upload_on_change: default_upload_on_change(),
        }
    }
}

impl Config {
    /// Load the config from the store, falling back to defaults when none
    /// was persisted.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        match store.get(CONFIG_KEY)? {
            None => Ok(Self::default()),
            Some(raw) => Ok(toml::from_str(&raw)?),
        }
    }

    /// Persist the config as TOML.
    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(CONFIG_KEY, &toml::to_string(self)?)
    }
}
