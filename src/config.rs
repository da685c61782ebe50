// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Session configuration.
//!
//! Layered as defaults, then a TOML file (`--config` or
//! `~/.config/sdsync/config.toml`), then `SDSYNC_*` environment variables.
//! Command line flags are applied last by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::error::ConfigError;

pub const DEFAULT_BAUD: u32 = 921_600;
pub const DEFAULT_CHUNK_SIZE: usize = 256;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// Runtime configuration
// ============================================================================

/// Settle delays inserted after each field. The device has a small receive
/// buffer and no flow control, so these cannot be zero on real hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    pub after_mode: Duration,
    pub after_count: Duration,
    pub after_path_len: Duration,
    pub after_path: Duration,
    pub after_size: Duration,
    pub between_chunks: Duration,
    /// Pause after a repaired file before validate mode is re-announced
    pub after_repair: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            after_mode: Duration::from_millis(100),
            after_count: Duration::from_millis(100),
            after_path_len: Duration::from_millis(100),
            after_path: Duration::from_millis(100),
            after_size: Duration::from_millis(300),
            between_chunks: Duration::from_micros(100),
            after_repair: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
impl Pacing {
    pub fn none() -> Self {
        Pacing {
            after_mode: Duration::ZERO,
            after_count: Duration::ZERO,
            after_path_len: Duration::ZERO,
            after_path: Duration::ZERO,
            after_size: Duration::ZERO,
            between_chunks: Duration::ZERO,
            after_repair: Duration::ZERO,
        }
    }
}

/// Whole-file retry policy for transmit mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries until the device accepts the file
    pub max_attempts: Option<u32>,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            backoff: Duration::from_millis(300),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Set the attempt limit; 0 removes it
    pub fn set_max_attempts(&mut self, n: u32) {
        self.max_attempts = if n == 0 { None } else { Some(n) };
    }

    /// Whether another attempt may follow `attempts` failed ones
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Delay before the next attempt, doubling per failure up to `max_backoff`
    pub fn delay_after(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1 << shift).min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: Option<String>,
    pub baud: u32,
    pub chunk_size: usize,
    pub ack_timeout: Duration,
    pub session_timeout: Option<Duration>,
    /// Validate a repaired file again instead of resuming after it
    pub revalidate_repaired: bool,
    pub pacing: Pacing,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            port: None,
            baud: DEFAULT_BAUD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            session_timeout: None,
            revalidate_repaired: false,
            pacing: Pacing::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(())
    }
}

// ============================================================================
// File layer
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    port: Option<String>,
    baud: Option<u32>,
    chunk_size: Option<usize>,
    ack_timeout_ms: Option<u64>,
    session_timeout_secs: Option<u64>,
    revalidate_repaired: Option<bool>,
    #[serde(default)]
    pacing: FilePacing,
    #[serde(default)]
    retry: FileRetry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilePacing {
    mode_ms: Option<u64>,
    count_ms: Option<u64>,
    path_len_ms: Option<u64>,
    path_ms: Option<u64>,
    size_ms: Option<u64>,
    chunk_us: Option<u64>,
    repair_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRetry {
    /// 0 means unbounded
    max_attempts: Option<u32>,
    backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

fn set_ms(target: &mut Duration, ms: Option<u64>) {
    if let Some(ms) = ms {
        *target = Duration::from_millis(ms);
    }
}

impl SessionConfig {
    fn apply_file(&mut self, file: FileConfig) {
        if file.port.is_some() {
            self.port = file.port;
        }
        if let Some(baud) = file.baud {
            self.baud = baud;
        }
        if let Some(size) = file.chunk_size {
            self.chunk_size = size;
        }
        set_ms(&mut self.ack_timeout, file.ack_timeout_ms);
        if let Some(secs) = file.session_timeout_secs {
            self.session_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(revalidate) = file.revalidate_repaired {
            self.revalidate_repaired = revalidate;
        }

        let p = &mut self.pacing;
        set_ms(&mut p.after_mode, file.pacing.mode_ms);
        set_ms(&mut p.after_count, file.pacing.count_ms);
        set_ms(&mut p.after_path_len, file.pacing.path_len_ms);
        set_ms(&mut p.after_path, file.pacing.path_ms);
        set_ms(&mut p.after_size, file.pacing.size_ms);
        set_ms(&mut p.after_repair, file.pacing.repair_ms);
        if let Some(us) = file.pacing.chunk_us {
            p.between_chunks = Duration::from_micros(us);
        }

        if let Some(n) = file.retry.max_attempts {
            self.retry.set_max_attempts(n);
        }
        set_ms(&mut self.retry.backoff, file.retry.backoff_ms);
        set_ms(&mut self.retry.max_backoff, file.retry.max_backoff_ms);
    }

    /// Apply `SDSYNC_*` overrides. `lookup` is `std::env::var` in production.
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            match value.trim().parse() {
                Ok(v) => Ok(v),
                Err(_) => Err(ConfigError::Env {
                    name: name.to_string(),
                    value,
                }),
            }
        }

        if let Some(port) = lookup("SDSYNC_PORT") {
            self.port = Some(port);
        }
        if let Some(v) = lookup("SDSYNC_BAUD") {
            self.baud = parse("SDSYNC_BAUD", v)?;
        }
        if let Some(v) = lookup("SDSYNC_CHUNK_SIZE") {
            self.chunk_size = parse("SDSYNC_CHUNK_SIZE", v)?;
        }
        if let Some(v) = lookup("SDSYNC_ACK_TIMEOUT_MS") {
            self.ack_timeout = Duration::from_millis(parse("SDSYNC_ACK_TIMEOUT_MS", v)?);
        }
        if let Some(v) = lookup("SDSYNC_MAX_ATTEMPTS") {
            self.retry.set_max_attempts(parse("SDSYNC_MAX_ATTEMPTS", v)?);
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config/sdsync/config.toml"))
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the configuration from defaults, the config file and the environment.
/// An explicit `path` must exist; the default location is optional.
pub fn load(path: Option<&Path>) -> Result<SessionConfig, ConfigError> {
    load_with(path, default_config_path(), |name| std::env::var(name).ok())
}

fn load_with<F>(path: Option<&Path>, fallback: Option<PathBuf>, lookup: F) -> Result<SessionConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = SessionConfig::default();

    match path {
        Some(p) => config.apply_file(read_file(p)?),
        None => {
            if let Some(p) = fallback.filter(|p| p.exists()) {
                log::debug!("Loading config from {}", p.display());
                config.apply_file(read_file(&p)?);
            }
        }
    }

    config.apply_env(lookup)?;
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================
