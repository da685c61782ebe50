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

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use crate::error::TransferError;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the sync protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn flush(&mut self) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()?;

        log::debug!("Opened {} at {} baud", port_name, baud_rate);
        Ok(RealSerialPort { port, name: port_name.to_string() })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)
                .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?;
        }
        self.port.read(buf)
    }
}

impl Drop for RealSerialPort {
    fn drop(&mut self) {
        log::debug!("Closing {}", self.name);
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag checked by the transport between frames
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Exclusive owner of the serial link for one session.
///
/// Every write is one logical field followed by its settle delay. Cancellation
/// and the session deadline are checked before each write, read and pause.
/// Dropping the transport closes the port.
pub struct Transport {
    port: Box<dyn SerialPort>,
    ack_timeout: Duration,
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl Transport {
    pub fn new(port: Box<dyn SerialPort>, ack_timeout: Duration) -> Self {
        Transport {
            port,
            ack_timeout,
            cancel: CancelToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Limit the whole session to `timeout` from now
    pub fn with_deadline(mut self, timeout: Option<Duration>) -> Self {
        self.deadline = timeout.map(|t| Instant::now() + t);
        self
    }

    pub fn check_live(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(TransferError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `delay`, cut short by the session deadline
    pub fn pause(&self, delay: Duration) -> Result<(), TransferError> {
        self.check_live()?;
        let delay = match self.deadline {
            Some(d) => delay.min(d.saturating_duration_since(Instant::now())),
            None => delay,
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.check_live()
    }

    pub fn write_field(&mut self, bytes: &[u8], settle: Duration) -> Result<(), TransferError> {
        self.check_live()?;
        self.port.write_all(bytes)?;
        self.port.flush()?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        Ok(())
    }

    /// One body chunk: write, inter-chunk delay, then flush
    pub fn write_chunk(&mut self, bytes: &[u8], settle: Duration) -> Result<(), TransferError> {
        self.check_live()?;
        self.port.write_all(bytes)?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
        self.port.flush()?;
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8, TransferError> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, TransferError> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), TransferError> {
        let mut filled = 0;
        while filled < buf.len() {
            self.check_live()?;
            let timeout = match self.deadline {
                Some(d) => d.saturating_duration_since(Instant::now()).min(self.ack_timeout),
                None => self.ack_timeout,
            };

            match self.port.read_timeout(&mut buf[filled..], timeout) {
                Ok(0) => return Err(self.timed_out()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(self.timed_out()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransferError::Io(e)),
            }
        }
        Ok(())
    }

    fn timed_out(&self) -> TransferError {
        match self.check_live() {
            Err(e) => e,
            Ok(()) => TransferError::Timeout,
        }
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Every write_all call, in order
    writes: Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Raised once the last scripted response has been served
    cancel_when_drained: Option<CancelToken>,
    closed: Arc<AtomicBool>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            writes: Arc::default(),
            expected_writes,
            cancel_when_drained: None,
            closed: Arc::default(),
        }
    }

    pub fn cancel_when_drained(mut self, token: CancelToken) -> Self {
        self.cancel_when_drained = Some(token);
        self
    }

    /// Handle to the individual write calls, readable after the port is gone
    pub fn write_calls(&self) -> Arc<std::sync::Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }

    /// Set when the port is dropped
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.writes.lock().unwrap().push(buf.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(ErrorKind::TimedOut, "Mock timeout"));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(ErrorKind::TimedOut, "Mock timeout"));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        if self.read_pos == self.read_buffer.len() {
            if let Some(token) = &self.cancel_when_drained {
                token.cancel();
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        let write_log: Vec<u8> = self.writes.lock().unwrap().concat();
        assert_eq!(
            &write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            write_log.len(),
            write_log
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_byte_and_timeout() {
        let mock = MockSerialPort::new(vec![Some(0xE1), None], vec![]);
        let mut transport = Transport::new(Box::new(mock), Duration::from_millis(10));

        assert_eq!(transport.read_byte().unwrap(), 0xE1);
        assert!(matches!(transport.read_byte(), Err(TransferError::Timeout)));
    }

    #[test]
    fn test_read_exact() {
        let mock = MockSerialPort::new(vec![Some(b'1'), Some(b'.'), Some(b'2')], vec![]);
        let mut transport = Transport::new(Box::new(mock), Duration::from_millis(10));
        assert_eq!(transport.read_exact(3).unwrap(), b"1.2");
    }

    #[test]
    fn test_fields_are_separate_writes() {
        let mock = MockSerialPort::new(vec![], vec![0xCC, 3, 0, 0, 0]);
        let calls = mock.write_calls();
        let mut transport = Transport::new(Box::new(mock), Duration::from_millis(10));

        transport.write_field(&[0xCC], Duration::ZERO).unwrap();
        transport.write_field(&[3, 0, 0, 0], Duration::ZERO).unwrap();
        drop(transport);

        assert_eq!(*calls.lock().unwrap(), vec![vec![0xCC], vec![3, 0, 0, 0]]);
    }

    #[test]
    fn test_cancel_stops_writes() {
        let token = CancelToken::new();
        let mock = MockSerialPort::new(vec![], vec![0xCC]);
        let mut transport = Transport::new(Box::new(mock), Duration::from_millis(10))
            .with_cancel(token.clone());

        transport.write_field(&[0xCC], Duration::ZERO).unwrap();
        token.cancel();
        assert!(matches!(transport.write_field(&[1, 0, 0, 0], Duration::ZERO), Err(TransferError::Cancelled)));
        assert!(matches!(transport.read_byte(), Err(TransferError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline() {
        let mock = MockSerialPort::new(vec![], vec![]);
        let closed = mock.closed_flag();
        let transport = Transport::new(Box::new(mock), Duration::from_millis(10))
            .with_deadline(Some(Duration::ZERO));

        assert!(matches!(transport.pause(Duration::ZERO), Err(TransferError::DeadlineExceeded)));
        drop(transport);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pause_stops_at_deadline() {
        let mock = MockSerialPort::new(vec![], vec![]);
        let transport = Transport::new(Box::new(mock), Duration::from_millis(10))
            .with_deadline(Some(Duration::from_millis(50)));

        let start = Instant::now();
        let err = transport.pause(Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, TransferError::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
