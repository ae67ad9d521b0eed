//! Per-vault sync configuration.

use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use quire_types::DeviceId;
use serde::{Deserialize, Serialize};

/// Default timeout for a single push or pull call (ms).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default upper bound on pull pages fetched in one cycle.
pub const DEFAULT_MAX_PULL_PAGES: u32 = 50;

/// Configuration for one vault's sync engine.
///
/// Owned by the engine once constructed. The engine only ever writes
/// `last_sync_sequence` (after an acknowledged pull) and the enabled flag
/// (via [`crate::SyncEngine::set_enabled`]); everything else is the host's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub server_url: String,
    /// Stable per installation.
    pub device_id: DeviceId,
    pub enabled_at: Option<DateTime<Utc>>,
    /// Highest remote sequence number fully applied locally.
    pub last_sync_sequence: u64,
    /// Period of the automatic sync timer; 0 turns the timer off.
    pub sync_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub max_pull_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_url: String::new(),
            device_id: DeviceId::new(),
            enabled_at: None,
            last_sync_sequence: 0,
            sync_interval_ms: 0,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_pull_pages: DEFAULT_MAX_PULL_PAGES,
        }
    }
}

impl SyncConfig {
    /// An enabled config for `server_url`, stamped as enabled now.
    pub fn new(server_url: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            server_url: server_url.into(),
            device_id,
            enabled_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Parses a config previously written by [`SyncConfig::to_json`].
    /// Missing fields take their defaults.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
