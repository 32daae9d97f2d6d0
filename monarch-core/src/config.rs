// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every process of one deployment must agree on the prefixes, so any
//! invalid field results in a HardValidationError that prevents startup.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HardValidationError, MonarchError, MonarchResult};
use crate::shm::SharedRegion;
use crate::types::ResourcePrefix;

const MIN_POLL_INTERVAL_MS: u64 = 10;
const MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// Raw instance configuration (before validation).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInstanceConfig {
    #[serde(default = "default_region_prefix")]
    region_prefix: String,
    #[serde(default = "default_lock_prefix")]
    lock_prefix: String,
    #[serde(default = "default_region_size")]
    region_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_window_title")]
    window_title: Option<String>,
}

fn default_region_prefix() -> String {
    "MonarchSharedMem".to_string()
}

fn default_lock_prefix() -> String {
    "MonarchSharedMemMutex".to_string()
}

fn default_region_size() -> usize {
    SharedRegion::DEFAULT_SIZE
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_window_title() -> Option<String> {
    Some("Monarch".to_string())
}

impl Default for RawInstanceConfig {
    fn default() -> Self {
        Self {
            region_prefix: default_region_prefix(),
            lock_prefix: default_lock_prefix(),
            region_size: default_region_size(),
            poll_interval_ms: default_poll_interval_ms(),
            window_title: default_window_title(),
        }
    }
}

/// Raw session configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSessionConfig {
    #[serde(default)]
    command: Vec<String>,
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    instance: RawInstanceConfig,
    #[serde(default)]
    session: RawSessionConfig,
}

/// Validated coordination settings.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub region_prefix: ResourcePrefix,
    pub lock_prefix: ResourcePrefix,
    pub region_size: usize,
    pub poll_interval: Duration,
    /// Title of the window a follower raises instead of signaling.
    /// `None` disables the fast path.
    pub window_title: Option<String>,
}

/// What the leader launches for each session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub command: Vec<String>,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub instance: InstanceConfig,
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        let raw = RawConfig::default();
        Self {
            instance: InstanceConfig {
                region_prefix: ResourcePrefix::new_unchecked(raw.instance.region_prefix),
                lock_prefix: ResourcePrefix::new_unchecked(raw.instance.lock_prefix),
                region_size: raw.instance.region_size,
                poll_interval: Duration::from_millis(raw.instance.poll_interval_ms),
                window_title: raw.instance.window_title,
            },
            session: SessionConfig::default(),
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> MonarchResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MonarchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MonarchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    /// An empty document yields the defaults.
    pub fn load_string(content: &str) -> MonarchResult<Config> {
        let raw: RawConfig = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| MonarchError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?
        };

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> MonarchResult<Config> {
        let instance = Self::validate_instance(raw.instance)?;

        if raw.session.command.first().is_some_and(|c| c.is_empty()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "session.command",
                value: String::new(),
                reason: "Program name cannot be empty".to_string(),
            }
            .into());
        }

        Ok(Config {
            instance,
            session: SessionConfig {
                command: raw.session.command,
            },
        })
    }

    fn validate_instance(raw: RawInstanceConfig) -> MonarchResult<InstanceConfig> {
        let region_prefix = ResourcePrefix::new("region_prefix", raw.region_prefix)?;
        let lock_prefix = ResourcePrefix::new("lock_prefix", raw.lock_prefix)?;

        if region_prefix == lock_prefix {
            return Err(HardValidationError::PrefixCollision {
                prefix: region_prefix.to_string(),
            }
            .into());
        }

        if !(SharedRegion::MIN_SIZE..=SharedRegion::MAX_SIZE).contains(&raw.region_size) {
            return Err(HardValidationError::RegionSizeOutOfBounds {
                size: raw.region_size,
                min: SharedRegion::MIN_SIZE,
                max: SharedRegion::MAX_SIZE,
            }
            .into());
        }

        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&raw.poll_interval_ms) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "poll_interval_ms",
                value: raw.poll_interval_ms.to_string(),
                reason: format!(
                    "Must be between {} and {} ms",
                    MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS
                ),
            }
            .into());
        }

        Ok(InstanceConfig {
            region_prefix,
            lock_prefix,
            region_size: raw.region_size,
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            window_title: raw.window_title.filter(|t| !t.is_empty()),
        })
    }
}
