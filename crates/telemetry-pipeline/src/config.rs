// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline and buffer settings.
//!
//! Both structs carry their defaults through [`Default`]; `from_env` reads
//! overrides from `{PREFIX}_*` environment variables and leaves anything
//! unset at its default.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::compression::Compression;
use crate::errors::ConfigError;

pub const DEFAULT_MAX_BACKLOG: usize = 1000;
pub const DEFAULT_MAX_WINDOW_COUNT: usize = 1000;
pub const DEFAULT_WINDOW_SIZE: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_PENDING_BATCHES: usize = 3;
pub const DEFAULT_BUFFER_CAPACITY_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Capacity of the ingest queue. Posts beyond it are dropped.
    pub max_backlog: usize,
    /// A window closes as soon as it holds this many records.
    pub max_window_count: usize,
    /// A non-empty window closes at the latest this long after the previous close.
    pub window_size: Duration,
    /// Closed batches allowed to wait for the publish stage before the
    /// batcher itself blocks.
    pub max_pending_batches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_backlog: DEFAULT_MAX_BACKLOG,
            max_window_count: DEFAULT_MAX_WINDOW_COUNT,
            window_size: DEFAULT_WINDOW_SIZE,
            max_pending_batches: DEFAULT_MAX_PENDING_BATCHES,
        }
    }
}

impl PipelineConfig {
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            max_backlog: read(&lookup, prefix, "MAX_BACKLOG")?.unwrap_or(defaults.max_backlog),
            max_window_count: read(&lookup, prefix, "MAX_WINDOW_COUNT")?
                .unwrap_or(defaults.max_window_count),
            window_size: read(&lookup, prefix, "WINDOW_SIZE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.window_size),
            max_pending_batches: read(&lookup, prefix, "MAX_PENDING_BATCHES")?
                .unwrap_or(defaults.max_pending_batches),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_backlog == 0 {
            return Err(ConfigError::Zero("max_backlog"));
        }
        if self.max_window_count == 0 {
            return Err(ConfigError::Zero("max_window_count"));
        }
        if self.window_size.is_zero() {
            return Err(ConfigError::Zero("window_size"));
        }
        if self.max_pending_batches == 0 {
            return Err(ConfigError::Zero("max_pending_batches"));
        }
        Ok(())
    }

    /// Batches are always published one at a time so they reach the sink in
    /// the order their windows closed.
    #[must_use]
    pub const fn max_publish_concurrency(&self) -> usize {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub capacity_bytes: usize,
    /// The background timer writes out a non-empty buffer at this interval.
    pub flush_interval: Duration,
    pub compression: Compression,
    pub max_write_attempts: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_BUFFER_CAPACITY_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            compression: Compression::None,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
        }
    }
}

impl BufferConfig {
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| env::var(key).ok())
    }

    /// `{P}_USE_COMPRESSION=true` enables gzip unless `{P}_COMPRESSION`
    /// names another codec.
    pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let use_compression = read_bool(&lookup, prefix, "USE_COMPRESSION")?.unwrap_or(false);
        let compression = if use_compression {
            match read::<Compression, _>(&lookup, prefix, "COMPRESSION")? {
                Some(Compression::None) | None => Compression::Gzip,
                Some(codec) => codec,
            }
        } else {
            Compression::None
        };

        let config = Self {
            capacity_bytes: read(&lookup, prefix, "BUFFER_CAPACITY_BYTES")?
                .unwrap_or(defaults.capacity_bytes),
            flush_interval: read(&lookup, prefix, "FLUSH_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            compression,
            max_write_attempts: read(&lookup, prefix, "MAX_WRITE_ATTEMPTS")?
                .unwrap_or(defaults.max_write_attempts),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity_bytes == 0 {
            return Err(ConfigError::Zero("capacity_bytes"));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Zero("flush_interval"));
        }
        if self.max_write_attempts == 0 {
            return Err(ConfigError::Zero("max_write_attempts"));
        }
        Ok(())
    }

    #[must_use]
    pub fn use_compression(&self) -> bool {
        self.compression.is_enabled()
    }
}

fn read<T, F>(lookup: &F, prefix: &str, name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{prefix}_{name}");
    match lookup(&key) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => Err(ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

fn read_bool<F>(lookup: &F, prefix: &str, name: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let key = format!("{prefix}_{name}");
    match lookup(&key) {
        None => Ok(None),
        Some(value) => match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup("TP", lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.max_backlog, 1000);
        assert_eq!(config.max_window_count, 1000);
        assert_eq!(config.window_size, Duration::from_secs(10));
        assert_eq!(config.max_pending_batches, 3);
        assert_eq!(config.max_publish_concurrency(), 1);

        let buffer = BufferConfig::from_lookup("TP", lookup(&[])).unwrap();
        assert_eq!(buffer.capacity_bytes, 4 * 1024 * 1024);
        assert_eq!(buffer.flush_interval, Duration::from_secs(10));
        assert!(!buffer.use_compression());
        assert_eq!(buffer.max_write_attempts, 10);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(
            "TP",
            lookup(&[
                ("TP_MAX_BACKLOG", "50"),
                ("TP_MAX_WINDOW_COUNT", " 7 "),
                ("TP_WINDOW_SIZE_MS", "250"),
                ("TP_MAX_PENDING_BATCHES", "1"),
            ]),
        )
        .unwrap();
        assert_eq!(config.max_backlog, 50);
        assert_eq!(config.max_window_count, 7);
        assert_eq!(config.window_size, Duration::from_millis(250));
        assert_eq!(config.max_pending_batches, 1);
    }

    #[test]
    fn test_compression_selection() {
        let gzip =
            BufferConfig::from_lookup("TP", lookup(&[("TP_USE_COMPRESSION", "true")])).unwrap();
        assert_eq!(gzip.compression, Compression::Gzip);

        let zstd = BufferConfig::from_lookup(
            "TP",
            lookup(&[("TP_USE_COMPRESSION", "true"), ("TP_COMPRESSION", "zstd")]),
        )
        .unwrap();
        assert!(matches!(zstd.compression, Compression::Zstd { .. }));

        let off = BufferConfig::from_lookup(
            "TP",
            lookup(&[("TP_USE_COMPRESSION", "false"), ("TP_COMPRESSION", "zstd")]),
        )
        .unwrap();
        assert_eq!(off.compression, Compression::None);
    }

    #[test]
    fn test_invalid_values() {
        let err = PipelineConfig::from_lookup("TP", lookup(&[("TP_MAX_BACKLOG", "lots")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TP_MAX_BACKLOG")
        );

        let err = PipelineConfig::from_lookup("TP", lookup(&[("TP_MAX_WINDOW_COUNT", "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("max_window_count"));

        let err = BufferConfig::from_lookup("TP", lookup(&[("TP_USE_COMPRESSION", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("TPENV_MAX_BACKLOG", "12");
        env::set_var("TPENV_FLUSH_INTERVAL_MS", "1500");
        let pipeline = PipelineConfig::from_env("TPENV").unwrap();
        let buffer = BufferConfig::from_env("TPENV").unwrap();
        env::remove_var("TPENV_MAX_BACKLOG");
        env::remove_var("TPENV_FLUSH_INTERVAL_MS");

        assert_eq!(pipeline.max_backlog, 12);
        assert_eq!(buffer.flush_interval, Duration::from_millis(1500));
    }
}
