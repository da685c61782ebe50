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

//! SD sync wire constants and frame encoding

use std::fmt;
use crate::error::ProtocolError;
use crate::files::FileEntry;

// ============================================================================
// Mode bytes
// ============================================================================

/// Enter validate mode - followed by a file count, then metadata per file
pub const ENTER_VALIDATE: u8 = 0xCC;

/// Enter transmit mode - followed by a file count, then header and body per file
pub const ENTER_TRANSMIT: u8 = 0xEE;

// ============================================================================
// Ack bytes
// ============================================================================

/// File present on the card with the declared size, or body stored successfully
pub const ACK_SUCCESS: u8 = 0xE1;

/// Fewer bytes on the card than declared
pub const ACK_SIZE_SHORTFALL: u8 = 0xE2;

/// File could not be opened or written on the card
pub const ACK_CONTENT_MISMATCH: u8 = 0xE3;

// ============================================================================
// Device commands
// ============================================================================

/// Query main firmware version string
pub const QUERY_MAIN_VERSION: u8 = 0xB0;

/// Query hardware firmware version string
pub const QUERY_HW_VERSION: u8 = 0xB1;

/// Query SD content version string
pub const QUERY_SD_VERSION: u8 = 0xB2;

/// Put the hardware MCU into firmware input mode
pub const HW_FIRMWARE_INPUT: u8 = 0xDD;

/// Width of every length-prefixed integer on the wire
pub const LENGTH_SIZE: usize = 4;

/// Longest version string accepted from the device
pub const MAX_VERSION_LEN: usize = 4096;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Success,
    SizeShortfall,
    ContentMismatch,
}

impl AckCode {
    pub fn is_success(self) -> bool {
        self == AckCode::Success
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckCode::Success => write!(f, "success"),
            AckCode::SizeShortfall => write!(f, "size shortfall"),
            AckCode::ContentMismatch => write!(f, "content mismatch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Validate,
    Transmit,
}

impl SessionMode {
    /// Command byte announcing this mode
    pub fn command(self) -> u8 {
        match self {
            SessionMode::Validate => ENTER_VALIDATE,
            SessionMode::Transmit => ENTER_TRANSMIT,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Validate => write!(f, "validate"),
            SessionMode::Transmit => write!(f, "transmit"),
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

pub fn encode_length(n: u32) -> [u8; LENGTH_SIZE] {
    n.to_le_bytes()
}

pub fn decode_length(bytes: [u8; LENGTH_SIZE]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// UTF-8 bytes of `relative_path` with every backslash turned into a forward slash
pub fn encode_path(relative_path: &str) -> Vec<u8> {
    relative_path.replace('\\', "/").into_bytes()
}

pub fn decode_ack(byte: u8) -> Result<AckCode, ProtocolError> {
    match byte {
        ACK_SUCCESS => Ok(AckCode::Success),
        ACK_SIZE_SHORTFALL => Ok(AckCode::SizeShortfall),
        ACK_CONTENT_MISMATCH => Ok(AckCode::ContentMismatch),
        other => Err(ProtocolError::UnknownAck(other)),
    }
}

/// The three metadata frames sent for a file: path length, path, size.
///
/// The length frame counts encoded bytes, so multi-byte UTF-8 names are
/// announced with their real wire length.
pub struct Metadata {
    pub path_len: [u8; LENGTH_SIZE],
    pub path: Vec<u8>,
    pub size: [u8; LENGTH_SIZE],
}

pub fn encode_metadata(entry: &FileEntry) -> Metadata {
    let path = encode_path(&entry.relative_path);
    Metadata {
        path_len: encode_length(path.len() as u32),
        path,
        size: encode_length(entry.size),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_encode_length_little_endian() {
        assert_eq!(encode_length(0), [0, 0, 0, 0]);
        assert_eq!(encode_length(1), [1, 0, 0, 0]);
        assert_eq!(encode_length(1000), [0xE8, 0x03, 0, 0]);
        assert_eq!(encode_length(0x1234_5678), [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(encode_length(u32::MAX), [0xFF; 4]);
        assert_eq!(decode_length([0xE8, 0x03, 0, 0]), 1000);
    }

    #[test]
    fn test_encode_path_normalizes_separators() {
        assert_eq!(encode_path("img\\logo.bmp"), b"img/logo.bmp");
        assert_eq!(encode_path("a\\b\\c.txt"), b"a/b/c.txt");
        assert_eq!(encode_path("readme"), b"readme");
    }

    #[test]
    fn test_encode_path_idempotent() {
        let native = encode_path("sound\\voice\\01.wav");
        let canonical = encode_path("sound/voice/01.wav");
        assert_eq!(native, canonical);

        let again = encode_path(std::str::from_utf8(&canonical).unwrap());
        assert_eq!(again, canonical);
    }

    #[test]
    fn test_decode_ack() {
        assert_eq!(decode_ack(0xE1).unwrap(), AckCode::Success);
        assert_eq!(decode_ack(0xE2).unwrap(), AckCode::SizeShortfall);
        assert_eq!(decode_ack(0xE3).unwrap(), AckCode::ContentMismatch);

        for byte in [0x00, 0xE0, 0xE4, ENTER_VALIDATE, ENTER_TRANSMIT, 0xFF] {
            match decode_ack(byte) {
                Err(ProtocolError::UnknownAck(b)) => assert_eq!(b, byte),
                other => panic!("0x{:02X} decoded as {:?}", byte, other),
            }
        }
    }

    #[test]
    fn test_mode_commands() {
        assert_eq!(SessionMode::Validate.command(), 0xCC);
        assert_eq!(SessionMode::Transmit.command(), 0xEE);
    }

    #[test]
    fn test_encode_metadata_counts_bytes() {
        let entry = FileEntry {
            local_path: PathBuf::from("/tmp/unused"),
            relative_path: "음성/안내.wav".to_string(),
            size: 300,
        };
        let meta = encode_metadata(&entry);

        // 4 Hangul syllables at 3 bytes each, plus "/" and ".wav"
        assert_eq!(meta.path.len(), 17);
        assert_eq!(meta.path_len, encode_length(17));
        assert_eq!(meta.size, [0x2C, 0x01, 0, 0]);
    }
}
