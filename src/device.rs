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

//! Device commands outside the sync session: version queries and the
//! hardware firmware input switch.

use std::fmt;
use std::time::Duration;
use crate::config::Pacing;
use crate::error::{ProtocolError, TransferError};
use crate::protocol::*;
use crate::serial::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Main,
    Hardware,
    SdContent,
}

impl VersionKind {
    pub const ALL: [VersionKind; 3] = [VersionKind::Main, VersionKind::Hardware, VersionKind::SdContent];

    fn command(self) -> u8 {
        match self {
            VersionKind::Main => QUERY_MAIN_VERSION,
            VersionKind::Hardware => QUERY_HW_VERSION,
            VersionKind::SdContent => QUERY_SD_VERSION,
        }
    }
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionKind::Main => write!(f, "main"),
            VersionKind::Hardware => write!(f, "hw"),
            VersionKind::SdContent => write!(f, "sd"),
        }
    }
}

/// Send a version query and read back `[len:u32][len bytes]`
pub fn query_version(transport: &mut Transport, kind: VersionKind) -> Result<String, TransferError> {
    transport.write_field(&[kind.command()], Duration::ZERO)?;

    let mut len = [0u8; LENGTH_SIZE];
    len.copy_from_slice(&transport.read_exact(LENGTH_SIZE)?);
    let len = decode_length(len) as usize;
    if len > MAX_VERSION_LEN {
        return Err(ProtocolError::ReplyTooLong(len).into());
    }

    let bytes = transport.read_exact(len)?;
    let version = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    log::debug!("{} version: {}", kind, version);
    Ok(version)
}

/// Query every version string, pausing between commands
pub fn query_versions(transport: &mut Transport, pacing: &Pacing) -> Result<Vec<(VersionKind, String)>, TransferError> {
    let mut versions = Vec::with_capacity(VersionKind::ALL.len());
    for kind in VersionKind::ALL {
        versions.push((kind, query_version(transport, kind)?));
        transport.pause(pacing.after_mode)?;
    }
    Ok(versions)
}

pub fn enter_hw_firmware_input(transport: &mut Transport, pacing: &Pacing) -> Result<(), TransferError> {
    transport.write_field(&[HW_FIRMWARE_INPUT], pacing.after_mode)?;
    log::info!("Hardware firmware input requested");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    fn reply(text: &[u8]) -> Vec<Option<u8>> {
        encode_length(text.len() as u32)
            .iter()
            .chain(text)
            .map(|&b| Some(b))
            .collect()
    }

    fn transport(mock: MockSerialPort) -> Transport {
        Transport::new(Box::new(mock), Duration::from_millis(10))
    }

    #[test]
    fn test_query_version() {
        let mut t = transport(MockSerialPort::new(reply(b"1.24"), vec![QUERY_MAIN_VERSION]));
        assert_eq!(query_version(&mut t, VersionKind::Main).unwrap(), "1.24");
    }

    #[test]
    fn test_query_all_versions() {
        let mut responses = reply(b"1.24");
        responses.extend(reply(b"HW-3"));
        responses.extend(reply(b""));

        let mut t = transport(MockSerialPort::new(
            responses,
            vec![QUERY_MAIN_VERSION, QUERY_HW_VERSION, QUERY_SD_VERSION],
        ));
        let versions = query_versions(&mut t, &Pacing::none()).unwrap();
        assert_eq!(
            versions,
            vec![
                (VersionKind::Main, "1.24".to_string()),
                (VersionKind::Hardware, "HW-3".to_string()),
                (VersionKind::SdContent, String::new()),
            ]
        );
    }

    #[test]
    fn test_query_version_invalid_utf8() {
        let mut t = transport(MockSerialPort::new(reply(&[0xFF, 0xFE]), vec![QUERY_SD_VERSION]));
        let err = query_version(&mut t, VersionKind::SdContent).unwrap_err();
        assert!(matches!(err, TransferError::Protocol(ProtocolError::InvalidUtf8)));
    }

    #[test]
    fn test_query_version_truncated() {
        let mut responses = reply(b"1.24");
        responses.truncate(6);
        responses.push(None);

        let mut t = transport(MockSerialPort::new(responses, vec![QUERY_HW_VERSION]));
        let err = query_version(&mut t, VersionKind::Hardware).unwrap_err();
        assert!(matches!(err, TransferError::Timeout));
    }

    #[test]
    fn test_query_version_rejects_oversized_length() {
        let responses = encode_length(u32::MAX).iter().map(|&b| Some(b)).collect();
        let mut t = transport(MockSerialPort::new(responses, vec![QUERY_MAIN_VERSION]));
        let err = query_version(&mut t, VersionKind::Main).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolError::ReplyTooLong(len)) if len == u32::MAX as usize
        ));
    }

    #[test]
    fn test_hw_firmware_input() {
        let mut t = transport(MockSerialPort::new(vec![], vec![HW_FIRMWARE_INPUT]));
        enter_hw_firmware_input(&mut t, &Pacing::none()).unwrap();
    }
}
