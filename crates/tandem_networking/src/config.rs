//! # Network Configuration
//!
//! ```toml
//! default_room = "lobby"
//!
//! [ownership]
//! rerequest_frames = 120
//!
//! [sync]
//! send_interval_frames = 2
//! blend_seconds = 0.15
//! remote_timeout_seconds = 10.0
//! ```
//!
//! Every field has a default, so a partial file (or none) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tandem_core::ConfigError;
use tandem_shared::constants::{
    BLEND_SECONDS, OWNERSHIP_REREQUEST_FRAMES, POSITION_THRESHOLD, REMOTE_TIMEOUT_SECONDS,
    ROTATION_THRESHOLD, SEND_INTERVAL_FRAMES, STALE_PAYLOAD_MS,
};

/// Connection and sync settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Room joined automatically once the transport opens. Empty means none.
    pub default_room: String,
    /// Ownership protocol settings
    pub ownership: OwnershipConfig,
    /// Sync component settings
    pub sync: SyncConfig,
}

/// Ownership protocol settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipConfig {
    /// Frames between two claim re-requests of a per-user record that is
    /// not owned locally.
    pub rerequest_frames: u32,
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self { rerequest_frames: OWNERSHIP_REREQUEST_FRAMES }
    }
}

/// Sync component settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Frames between two pose sends.
    pub send_interval_frames: u32,
    /// Receiver blend window in seconds.
    pub blend_seconds: f32,
    /// Minimum movement before a pose is re-sent.
    pub position_threshold: f32,
    /// Minimum rotation (radians) before a pose is re-sent.
    pub rotation_threshold: f32,
    /// Send an unchanged pose after this long, in seconds.
    pub keepalive_seconds: f32,
    /// Remove remote mirrors after this long without an update, in seconds.
    pub remote_timeout_seconds: f32,
    /// Discard payloads older than this, in milliseconds.
    pub stale_after_ms: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send_interval_frames: SEND_INTERVAL_FRAMES,
            blend_seconds: BLEND_SECONDS,
            position_threshold: POSITION_THRESHOLD,
            rotation_threshold: ROTATION_THRESHOLD,
            keepalive_seconds: REMOTE_TIMEOUT_SECONDS * 0.5,
            remote_timeout_seconds: REMOTE_TIMEOUT_SECONDS,
            stale_after_ms: STALE_PAYLOAD_MS,
        }
    }
}

impl NetworkConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Room to join on open, if any.
    #[must_use]
    pub fn auto_join_room(&self) -> Option<&str> {
        (!self.default_room.is_empty()).then_some(self.default_room.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_override_defaults() {
        let config = NetworkConfig::from_toml_str(
            "default_room = \"X\"\n[sync]\nsend_interval_frames = 5\n",
        )
        .unwrap();
        assert_eq!(config.auto_join_room(), Some("X"));
        assert_eq!(config.sync.send_interval_frames, 5);
        assert!((config.sync.blend_seconds - BLEND_SECONDS).abs() < f32::EPSILON);
        assert_eq!(config.ownership.rerequest_frames, OWNERSHIP_REREQUEST_FRAMES);
    }

    #[test]
    fn test_keepalive_is_half_the_timeout() {
        let sync = SyncConfig::default();
        assert!((sync.keepalive_seconds * 2.0 - sync.remote_timeout_seconds).abs() < f32::EPSILON);
        assert_eq!(NetworkConfig::default().auto_join_room(), None);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            NetworkConfig::from_toml_str("[sync]\nblend_seconds = \"slow\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
