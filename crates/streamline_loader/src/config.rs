//! # Loader Configuration
//!
//! Loaded once at startup, from code or from a TOML file:
//!
//! ```toml
//! staging_buffer_size = 8388608   # bytes per resource set
//! buffer_count = 2                # resource sets in the ring
//! large_upload_policy = "split"   # or "dedicated_buffer"
//! fence_timeout_ms = 10000
//! fence_poll_interval_us = 500
//! default_alignment = 4
//! ```
//!
//! Every field is optional; missing fields keep their defaults.

use crate::error::{LoaderError, LoaderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest staging ring a resource set may have, in bytes.
pub const MIN_STAGING_BUFFER_SIZE: u64 = 32;

/// What to do with an upload larger than a whole staging ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LargeUploadPolicy {
    /// Copy it in ring-sized chunks, one submission per chunk.
    #[default]
    Split,
    /// Stage it in one temporary buffer sized exactly to the upload.
    DedicatedBuffer,
}

/// Configuration for [`crate::ResourceLoader`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Size of each resource set's staging ring in bytes.
    pub staging_buffer_size: u64,
    /// Number of resource sets rotated through.
    pub buffer_count: usize,
    /// Handling of uploads larger than one staging ring.
    pub large_upload_policy: LargeUploadPolicy,
    /// Longest the streamer waits on one fence before declaring the device
    /// lost (ms).
    pub fence_timeout_ms: u64,
    /// How often the streamer polls in-flight fences while idle (µs).
    pub fence_poll_interval_us: u64,
    /// Staging alignment used when a request does not specify one.
    pub default_alignment: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            staging_buffer_size: 8 * 1024 * 1024,
            buffer_count: 2,
            large_upload_policy: LargeUploadPolicy::Split,
            fence_timeout_ms: 10_000,
            fence_poll_interval_us: 500,
            default_alignment: 4,
        }
    }
}

impl LoaderConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidConfig`] on malformed TOML, unknown
    /// keys, or values that fail [`LoaderConfig::validate`].
    pub fn from_toml_str(text: &str) -> LoaderResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| LoaderError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidConfig`] if the file cannot be read or
    /// does not hold a valid config.
    pub fn from_toml_file(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> LoaderResult<()> {
        if self.staging_buffer_size < MIN_STAGING_BUFFER_SIZE {
            return Err(LoaderError::InvalidConfig(format!(
                "staging_buffer_size must be at least {MIN_STAGING_BUFFER_SIZE} bytes, got {}",
                self.staging_buffer_size
            )));
        }
        if self.buffer_count == 0 {
            return Err(LoaderError::InvalidConfig(
                "buffer_count must be at least 1".to_string(),
            ));
        }
        if self.fence_timeout_ms == 0 {
            return Err(LoaderError::InvalidConfig(
                "fence_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.fence_poll_interval_us == 0 {
            return Err(LoaderError::InvalidConfig(
                "fence_poll_interval_us must be non-zero".to_string(),
            ));
        }
        if self.default_alignment > self.staging_buffer_size {
            return Err(LoaderError::InvalidConfig(format!(
                "default_alignment {} exceeds staging_buffer_size {}",
                self.default_alignment, self.staging_buffer_size
            )));
        }
        Ok(())
    }

    /// Sets the staging ring size.
    #[must_use]
    pub const fn with_staging_buffer_size(mut self, bytes: u64) -> Self {
        self.staging_buffer_size = bytes;
        self
    }

    /// Sets the number of resource sets.
    #[must_use]
    pub const fn with_buffer_count(mut self, count: usize) -> Self {
        self.buffer_count = count;
        self
    }

    /// Sets the large upload policy.
    #[must_use]
    pub const fn with_large_upload_policy(mut self, policy: LargeUploadPolicy) -> Self {
        self.large_upload_policy = policy;
        self
    }

    /// Sets the fence timeout.
    #[must_use]
    pub const fn with_fence_timeout_ms(mut self, ms: u64) -> Self {
        self.fence_timeout_ms = ms;
        self
    }

    /// Sets the idle fence poll interval.
    #[must_use]
    pub const fn with_fence_poll_interval_us(mut self, us: u64) -> Self {
        self.fence_poll_interval_us = us;
        self
    }

    /// Fence timeout as a [`Duration`].
    #[must_use]
    pub const fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// Fence poll interval as a [`Duration`].
    #[must_use]
    pub const fn fence_poll_interval(&self) -> Duration {
        Duration::from_micros(self.fence_poll_interval_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.staging_buffer_size, 8 * 1024 * 1024);
        assert_eq!(config.buffer_count, 2);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LoaderConfig::from_toml_str(
            r#"
            staging_buffer_size = 256
            large_upload_policy = "dedicated_buffer"
            "#,
        )
        .unwrap();

        assert_eq!(config.staging_buffer_size, 256);
        assert_eq!(config.large_upload_policy, LargeUploadPolicy::DedicatedBuffer);
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.fence_poll_interval(), Duration::from_micros(500));
    }

    #[test]
    fn test_rejects_small_staging_ring() {
        let err = LoaderConfig::from_toml_str("staging_buffer_size = 16").unwrap_err();
        assert!(matches!(err, LoaderError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_zero_sets_and_unknown_keys() {
        assert!(LoaderConfig::default().with_buffer_count(0).validate().is_err());
        assert!(LoaderConfig::default()
            .with_fence_poll_interval_us(0)
            .validate()
            .is_err());
        assert!(LoaderConfig::from_toml_str("ring_size = 4").is_err());
        assert!(LoaderConfig::from_toml_str("buffer_count = \"two\"").is_err());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = LoaderConfig::default()
            .with_staging_buffer_size(4096)
            .with_buffer_count(3);
        let path = std::env::temp_dir().join(format!(
            "streamline_loader_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = LoaderConfig::from_toml_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_file() {
        let err = LoaderConfig::from_toml_file("/nonexistent/streamline.toml").unwrap_err();
        assert!(matches!(err, LoaderError::InvalidConfig(_)));
    }
}
