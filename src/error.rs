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

use std::path::PathBuf;
use thiserror::Error;
use crate::protocol::{AckCode, SessionMode};
use crate::validator::Phase;

/// Bytes from the device that cannot be interpreted
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown ack byte 0x{0:02X}")]
    UnknownAck(u8),
    #[error("device sent a string that is not valid UTF-8")]
    InvalidUtf8,
    #[error("device announced a {0} byte reply, too long for a version string")]
    ReplyTooLong(usize),
}

/// Failures of a single exchange with the device
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read {}: {source}", .path.display())]
    LocalRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("gave up after {attempts} attempts, last ack: {last}")]
    RetriesExhausted { attempts: u32, last: AckCode },
    #[error("device still reports {0} after the file was resent")]
    RepairRejected(AckCode),
    #[error("session cancelled")]
    Cancelled,
    #[error("session deadline exceeded")]
    DeadlineExceeded,
}

/// A session-terminating error with enough context to resume by hand
#[derive(Debug, Error)]
#[error("{source} (phase: {phase}, mode: {mode}, file: {})", .file.as_deref().unwrap_or("-"))]
pub struct SessionError {
    pub phase: Phase,
    pub mode: SessionMode,
    pub file: Option<String>,
    pub source: TransferError,
}

#[derive(Debug, Error)]
pub enum EnumerateError {
    #[error("source folder not found: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),
    #[error("failed to stat {}: {source}", .path.display())]
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk source folder: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8(PathBuf),
    #[error("{} is {size} bytes, over the 4 GiB wire limit", .path.display())]
    TooLarge { path: PathBuf, size: u64 },
    #[error("duplicate relative path: {0}")]
    Duplicate(String),
    #[error("empty path on the card for {}", .0.display())]
    EmptyPath(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: {value:?}")]
    Env { name: String, value: String },
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
}
