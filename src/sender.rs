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

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, Instant};
use crate::config::{Pacing, RetryPolicy, SessionConfig};
use crate::error::TransferError;
use crate::files::FileEntry;
use crate::protocol::*;
use crate::serial::Transport;

// ============================================================================
// Stats
// ============================================================================

/// Outcome of one accepted file transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStats {
    /// Body bytes written on the accepted attempt
    pub bytes_sent: u64,
    /// Duration of the accepted attempt
    pub elapsed: Duration,
    pub attempts: u32,
}

impl TransferStats {
    /// Bytes per second of the accepted attempt
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.bytes_sent as f64 / secs } else { 0.0 }
    }
}

// ============================================================================
// Shared framing
// ============================================================================

/// Path length, path and size frames with their settle delays
pub fn send_metadata(transport: &mut Transport, entry: &FileEntry, pacing: &Pacing) -> Result<(), TransferError> {
    let meta = encode_metadata(entry);
    transport.write_field(&meta.path_len, pacing.after_path_len)?;
    transport.write_field(&meta.path, pacing.after_path)?;
    transport.write_field(&meta.size, pacing.after_size)?;
    Ok(())
}

/// Mode byte followed by the number of files that will follow in that mode
pub fn announce(transport: &mut Transport, mode: SessionMode, count: u32, pacing: &Pacing) -> Result<(), TransferError> {
    transport.write_field(&[mode.command()], pacing.after_mode)?;
    transport.write_field(&encode_length(count), pacing.after_count)?;
    log::debug!("Announced {} mode, {} files", mode, count);
    Ok(())
}

// ============================================================================
// Transmitter
// ============================================================================

/// Sends one file in transmit mode and retries the whole body until the
/// device accepts it or the retry policy runs out.
pub struct FileTransmitter<'a> {
    chunk_size: usize,
    pacing: &'a Pacing,
    retry: &'a RetryPolicy,
}

impl<'a> FileTransmitter<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        FileTransmitter {
            chunk_size: config.chunk_size.max(1),
            pacing: &config.pacing,
            retry: &config.retry,
        }
    }

    pub fn send(&self, transport: &mut Transport, entry: &FileEntry, remaining: usize) -> Result<TransferStats, TransferError> {
        let mut file = File::open(&entry.local_path).map_err(|source| TransferError::LocalRead {
            path: entry.local_path.clone(),
            source,
        })?;

        log::info!("Sending {} ({} bytes, {} remaining)", entry.relative_path, entry.size, remaining);
        send_metadata(transport, entry, self.pacing)?;

        let mut failures = 0u32;
        loop {
            let start = Instant::now();
            let bytes_sent = self.stream_body(transport, entry, &mut file)?;

            let ack = decode_ack(transport.read_byte()?)?;
            if ack.is_success() {
                let stats = TransferStats {
                    bytes_sent,
                    elapsed: start.elapsed(),
                    attempts: failures + 1,
                };
                log::info!(
                    "Sent {}: {} bytes in {:.2}s ({:.2} KB/s)",
                    entry.relative_path,
                    stats.bytes_sent,
                    stats.elapsed.as_secs_f64(),
                    stats.throughput() / 1000.0
                );
                return Ok(stats);
            }

            failures += 1;
            log::warn!("{}: device reported {} (attempt {})", entry.relative_path, ack, failures);
            if !self.retry.allows(failures) {
                return Err(TransferError::RetriesExhausted { attempts: failures, last: ack });
            }
            transport.pause(self.retry.delay_after(failures))?;
        }
    }

    /// Write the body from byte 0 in `chunk_size` pieces. At most `entry.size`
    /// bytes go out even if the file has grown since enumeration.
    fn stream_body(&self, transport: &mut Transport, entry: &FileEntry, file: &mut File) -> Result<u64, TransferError> {
        let local_read = |source| TransferError::LocalRead {
            path: entry.local_path.clone(),
            source,
        };

        file.seek(SeekFrom::Start(0)).map_err(local_read)?;
        let mut body = Read::by_ref(file).take(entry.size as u64);
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        loop {
            let n = fill_chunk(&mut body, &mut buffer).map_err(local_read)?;
            if n == 0 {
                break;
            }
            transport.write_chunk(&buffer[..n], self.pacing.between_chunks)?;
            total += n as u64;
            log::trace!("{}: {}/{} bytes", entry.relative_path, total, entry.size);
        }

        if total != entry.size as u64 {
            log::warn!(
                "{} shrank since enumeration: sent {} of {} declared bytes",
                entry.relative_path,
                total,
                entry.size
            );
        }
        Ok(total)
    }
}

/// Read until `buf` is full or the source is exhausted
fn fill_chunk<R: Read>(source: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::serial::{CancelToken, MockSerialPort};
    use rstest::rstest;
    use std::path::Path;

    fn test_config(chunk_size: usize, max_attempts: Option<u32>) -> SessionConfig {
        SessionConfig {
            chunk_size,
            pacing: Pacing::none(),
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
            ..SessionConfig::default()
        }
    }

    fn write_entry(dir: &Path, name: &str, content: &[u8]) -> FileEntry {
        let local_path = dir.join(name);
        std::fs::write(&local_path, content).unwrap();
        FileEntry {
            local_path,
            relative_path: name.to_string(),
            size: content.len() as u32,
        }
    }

    fn header(entry: &FileEntry) -> Vec<u8> {
        let mut out = encode_length(entry.relative_path.len() as u32).to_vec();
        out.extend_from_slice(entry.relative_path.as_bytes());
        out.extend_from_slice(&encode_length(entry.size));
        out
    }

    fn transport(mock: MockSerialPort) -> Transport {
        Transport::new(Box::new(mock), Duration::from_millis(10))
    }

    #[test]
    fn test_send_1000_bytes_in_256_byte_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let content: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let entry = write_entry(dir.path(), "data.bin", &content);

        let mut expected = header(&entry);
        expected.extend_from_slice(&content);

        let mock = MockSerialPort::new(vec![Some(ACK_SUCCESS)], expected);
        let calls = mock.write_calls();
        let mut transport = transport(mock);

        let config = test_config(256, Some(3));
        let stats = FileTransmitter::new(&config).send(&mut transport, &entry, 0).unwrap();
        drop(transport);

        assert_eq!(stats.bytes_sent, 1000);
        assert_eq!(stats.attempts, 1);

        let lengths: Vec<usize> = calls.lock().unwrap()[3..].iter().map(|c| c.len()).collect();
        assert_eq!(lengths, vec![256, 256, 256, 232]);
    }

    #[rstest]
    #[case(0, 256)]
    #[case(1, 256)]
    #[case(256, 256)]
    #[case(257, 256)]
    #[case(1000, 64)]
    #[case(999, 1000)]
    fn test_chunks_cover_body(#[case] size: usize, #[case] chunk: usize) {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![0x5Au8; size];
        let entry = write_entry(dir.path(), "f", &content);

        let mut expected = header(&entry);
        expected.extend_from_slice(&content);

        let mock = MockSerialPort::new(vec![Some(ACK_SUCCESS)], expected);
        let calls = mock.write_calls();
        let mut transport = transport(mock);

        let config = test_config(chunk, Some(1));
        FileTransmitter::new(&config).send(&mut transport, &entry, 0).unwrap();
        drop(transport);

        let chunks: Vec<usize> = calls.lock().unwrap()[3..].iter().map(|c| c.len()).collect();
        assert_eq!(chunks.iter().sum::<usize>(), size);
        assert_eq!(chunks.len(), size.div_ceil(chunk));
        assert!(chunks.iter().all(|&c| c > 0 && c <= chunk));
    }

    #[test]
    fn test_mismatch_resends_whole_body() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), "retry.txt", b"retry me");

        let mut expected = header(&entry);
        expected.extend_from_slice(b"retry me");
        expected.extend_from_slice(b"retry me");
        expected.extend_from_slice(b"retry me");

        let responses = vec![Some(ACK_CONTENT_MISMATCH), Some(ACK_SIZE_SHORTFALL), Some(ACK_SUCCESS)];
        let mut transport = transport(MockSerialPort::new(responses, expected));

        let config = test_config(4, Some(5));
        let stats = FileTransmitter::new(&config).send(&mut transport, &entry, 2).unwrap();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.bytes_sent, 8);
    }

    #[test]
    fn test_bounded_retry_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), "bad.txt", b"xyz");

        let mut expected = header(&entry);
        for _ in 0..3 {
            expected.extend_from_slice(b"xyz");
        }

        let responses = vec![Some(ACK_CONTENT_MISMATCH), Some(ACK_SIZE_SHORTFALL), Some(ACK_CONTENT_MISMATCH)];
        let mut transport = transport(MockSerialPort::new(responses, expected));

        let config = test_config(256, Some(3));
        match FileTransmitter::new(&config).send(&mut transport, &entry, 0) {
            Err(TransferError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, AckCode::ContentMismatch);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_unbounded_retry_runs_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), "stuck.txt", b"abc");

        let mut expected = header(&entry);
        for _ in 0..6 {
            expected.extend_from_slice(b"abc");
        }

        let token = CancelToken::new();
        let mock = MockSerialPort::new(vec![Some(ACK_SIZE_SHORTFALL); 6], expected)
            .cancel_when_drained(token.clone());
        let mut transport = transport(mock).with_cancel(token);

        let config = test_config(256, None);
        let result = FileTransmitter::new(&config).send(&mut transport, &entry, 0);
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    #[test]
    fn test_timeout_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), "t.txt", b"hi");

        let mut expected = header(&entry);
        expected.extend_from_slice(b"hi");

        let mut transport = transport(MockSerialPort::new(vec![None], expected));
        let config = test_config(256, None);
        let result = FileTransmitter::new(&config).send(&mut transport, &entry, 0);
        assert!(matches!(result, Err(TransferError::Timeout)));
    }

    #[test]
    fn test_unknown_ack_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let entry = write_entry(dir.path(), "u.txt", b"hi");

        let mut expected = header(&entry);
        expected.extend_from_slice(b"hi");

        let mut transport = transport(MockSerialPort::new(vec![Some(0x42)], expected));
        let config = test_config(256, None);
        let result = FileTransmitter::new(&config).send(&mut transport, &entry, 0);
        assert!(matches!(result, Err(TransferError::Protocol(ProtocolError::UnknownAck(0x42)))));
    }

    #[test]
    fn test_missing_local_file_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let entry = FileEntry {
            local_path: dir.path().join("gone.txt"),
            relative_path: "gone.txt".to_string(),
            size: 10,
        };

        let mut transport = transport(MockSerialPort::new(vec![], vec![]));
        let config = test_config(256, None);
        let result = FileTransmitter::new(&config).send(&mut transport, &entry, 0);
        assert!(matches!(result, Err(TransferError::LocalRead { .. })));
    }

    #[test]
    fn test_declared_size_limits_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut entry = write_entry(dir.path(), "grow.txt", b"abcdef");
        entry.size = 4;

        let mut expected = header(&entry);
        expected.extend_from_slice(b"abcd");

        let mut transport = transport(MockSerialPort::new(vec![Some(ACK_SUCCESS)], expected));
        let config = test_config(256, None);
        let stats = FileTransmitter::new(&config).send(&mut transport, &entry, 0).unwrap();
        assert_eq!(stats.bytes_sent, 4);
    }
}
