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

use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, ClearBuffer, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the XMODEM engines
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }

    /// Returns whatever bytes are already buffered, possibly none. Never blocks for long.
    fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Discards pending input and output
    fn clear_buffers(&mut self) -> io::Result<()>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let pending = self.port.bytes_to_read().map_err(io::Error::other)? as usize;
        if pending == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; pending];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::All).map_err(io::Error::other)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Chunks returned by successive reads (empty = nothing available)
    read_buffer: Vec<Vec<u8>>,
    read_pos: usize,
    // Read index at which an I/O error is returned instead
    fail_at: Option<usize>,
    // Write call index at which an I/O error is returned instead
    fail_write_at: Option<usize>,
    write_calls: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    clears: usize,
    expected_clears: usize,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Vec<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            fail_at: None,
            fail_write_at: None,
            write_calls: 0,
            write_log: Vec::new(),
            expected_writes,
            clears: 0,
            expected_clears: 0,
        }
    }

    pub fn expect_clears(mut self, count: usize) -> Self {
        self.expected_clears = count;
        self
    }

    /// Makes the read with the given index fail with a broken pipe
    pub fn fail_at(mut self, read_index: usize) -> Self {
        self.fail_at = Some(read_index);
        self
    }

    /// Makes the write call with the given index fail without recording its bytes
    pub fn fail_write_at(mut self, write_index: usize) -> Self {
        self.fail_write_at = Some(write_index);
        self
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let call = self.write_calls;
        self.write_calls += 1;
        if self.fail_write_at == Some(call) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Mock port unplugged"));
        }
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        if self.fail_at == Some(self.read_pos) {
            self.fail_at = None;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Mock port unplugged"));
        }

        // Out of responses = line is silent
        if self.read_pos >= self.read_buffer.len() {
            return Ok(Vec::new());
        }

        let chunk = std::mem::take(&mut self.read_buffer[self.read_pos]);
        self.read_pos += 1;
        Ok(chunk)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.clears += 1;
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses",
            self.read_buffer.len().saturating_sub(self.read_pos),
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );

        assert_eq!(self.clears, self.expected_clears, "MockSerialPort buffer clear count mismatch");
    }
}

// ============================================================================
// In-memory Link for End-to-end Tests
// ============================================================================

#[cfg(test)]
pub type WriteTap = std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>;

/// One end of an in-memory full-duplex line
#[cfg(test)]
pub struct LinkedPort {
    inbound: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<u8>>>,
    outbound: std::sync::Arc<std::sync::Mutex<std::collections::VecDeque<u8>>>,
    tap: WriteTap,
    flip: Option<usize>,
}

#[cfg(test)]
pub fn linked_pair() -> (LinkedPort, LinkedPort) {
    use std::sync::{Arc, Mutex};

    let a_to_b = Arc::new(Mutex::new(std::collections::VecDeque::new()));
    let b_to_a = Arc::new(Mutex::new(std::collections::VecDeque::new()));

    let a = LinkedPort {
        inbound: b_to_a.clone(),
        outbound: a_to_b.clone(),
        tap: WriteTap::default(),
        flip: None,
    };
    let b = LinkedPort {
        inbound: a_to_b,
        outbound: b_to_a,
        tap: WriteTap::default(),
        flip: None,
    };
    (a, b)
}

#[cfg(test)]
impl LinkedPort {
    /// Inverts byte `index` of the first write long enough to contain it
    pub fn corrupt_once(mut self, index: usize) -> Self {
        self.flip = Some(index);
        self
    }

    /// Shared log of every write as issued, before corruption
    pub fn tap(&self) -> WriteTap {
        self.tap.clone()
    }
}

#[cfg(test)]
impl SerialPort for LinkedPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tap.lock().unwrap().push(buf.to_vec());

        let mut bytes = buf.to_vec();
        if let Some(index) = self.flip {
            if index < bytes.len() {
                bytes[index] ^= 0xFF;
                self.flip = None;
            }
        }

        self.outbound.lock().unwrap().extend(bytes);
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.inbound.lock().unwrap().drain(..).collect())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.inbound.lock().unwrap().clear();
        Ok(())
    }
}
