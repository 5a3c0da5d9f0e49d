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
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use crate::block::Block;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Failure, Timeout, TransferError};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderState {
    /// Polling for the receiver's start NAK
    Connect { deadline: Instant, delay: Duration },
    /// Sending block 1
    BeginSend,
    /// Polling for the response to the last block or EOT
    WaitAck { deadline: Instant },
    /// Retransmitting the last block after a NAK
    Resend,
    /// Sending the block after an ACK
    SendNext,
    /// Sending EOT
    EndTx,
    Abort(Failure),
    Done,
}

/// I/O the driver performs for the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAction {
    /// Wait, then read whatever the line holds
    Poll(Duration),
    /// Assemble the block with this sequence number from the source and transmit it
    SendBlock(u8),
    /// Transmit the last block again, unchanged
    Resend,
    SendEot,
    Complete,
    Abort(Failure),
}

/// Outcome of a `SenderAction`, fed back into the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderEvent<'a> {
    Received(&'a [u8]),
    BlockSent,
    /// The source had no data left for the requested block
    Exhausted,
    EotSent,
}

// ============================================================================
// State Machine
// ============================================================================

/// Transmit-side protocol logic without any I/O
#[derive(Debug, Clone)]
pub struct SenderMachine {
    state: SenderState,
    config: Config,
    sequence: u8,
    retries: u32,
    no_more_data: bool,
    eot_deadline: Option<Instant>,
}

impl SenderMachine {
    pub fn new(config: Config, now: Instant) -> Self {
        SenderMachine {
            state: SenderState::Connect {
                deadline: now + config.connect_timeout,
                delay: Duration::ZERO,
            },
            config,
            sequence: FIRST_SEQUENCE,
            retries: 0,
            no_more_data: false,
            eot_deadline: None,
        }
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn action(&self) -> SenderAction {
        match self.state {
            SenderState::Connect { delay, .. } => SenderAction::Poll(delay),
            SenderState::BeginSend | SenderState::SendNext => SenderAction::SendBlock(self.sequence),
            SenderState::WaitAck { .. } if self.no_more_data => SenderAction::Poll(self.config.eot_poll),
            SenderState::WaitAck { .. } => SenderAction::Poll(self.config.ack_poll),
            SenderState::Resend => SenderAction::Resend,
            SenderState::EndTx => SenderAction::SendEot,
            SenderState::Abort(failure) => SenderAction::Abort(failure),
            SenderState::Done => SenderAction::Complete,
        }
    }

    pub fn handle(&mut self, event: SenderEvent<'_>, now: Instant) {
        let next = match (self.state.clone(), event) {
            (SenderState::Connect { deadline, .. }, SenderEvent::Received(bytes)) => {
                // The far end may have flushed noise ahead of its NAK
                if bytes.contains(&NAK) {
                    self.sequence = FIRST_SEQUENCE;
                    SenderState::BeginSend
                } else if now >= deadline {
                    SenderState::Abort(Failure::Timeout(Timeout::ReceiverConnect))
                } else {
                    SenderState::Connect { deadline, delay: self.config.connect_poll }
                }
            }
            (
                SenderState::BeginSend | SenderState::SendNext | SenderState::Resend,
                SenderEvent::BlockSent,
            ) => SenderState::WaitAck { deadline: now + self.config.ack_timeout },
            (SenderState::BeginSend | SenderState::SendNext, SenderEvent::Exhausted) => {
                self.no_more_data = true;
                self.end_tx(now)
            }
            (SenderState::EndTx, SenderEvent::EotSent) => {
                SenderState::WaitAck { deadline: now + self.config.ack_timeout }
            }
            (SenderState::WaitAck { deadline }, SenderEvent::Received(bytes)) => {
                if self.no_more_data {
                    self.on_eot_response(bytes, now)
                } else {
                    self.on_block_response(deadline, bytes, now)
                }
            }
            (state, event) => {
                warn!("Ignoring {:?} in state {:?}", event, state);
                return;
            }
        };
        self.state = next;
    }

    fn on_block_response(&mut self, deadline: Instant, bytes: &[u8], now: Instant) -> SenderState {
        match bytes.first() {
            None if now >= deadline => SenderState::Abort(Failure::Timeout(Timeout::BlockAck)),
            None => SenderState::WaitAck { deadline },
            Some(&ACK) => {
                self.retries = 0;
                self.sequence = self.sequence.wrapping_add(1);
                SenderState::SendNext
            }
            Some(&NAK) => {
                self.retries += 1;
                if self.retries > self.config.max_retries {
                    SenderState::Abort(Failure::Timeout(Timeout::MaxRetries))
                } else {
                    SenderState::Resend
                }
            }
            Some(&other) => SenderState::Abort(Failure::UnexpectedResponse(other)),
        }
    }

    fn on_eot_response(&mut self, bytes: &[u8], now: Instant) -> SenderState {
        match bytes.first() {
            Some(&ACK) => SenderState::Done,
            _ if self.eot_deadline.is_some_and(|d| now >= d) => {
                SenderState::Abort(Failure::Timeout(Timeout::EotAck))
            }
            _ => self.end_tx(now),
        }
    }

    fn end_tx(&mut self, now: Instant) -> SenderState {
        if self.eot_deadline.is_none() {
            self.eot_deadline = Some(now + self.config.eot_ack_timeout);
        }
        SenderState::EndTx
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Sends one file over a serial line
pub struct Sender {
    serial: Box<dyn SerialPort>,
    clock: Box<dyn Clock>,
    config: Config,
}

impl Sender {
    pub fn new(serial: Box<dyn SerialPort>, config: Config) -> Self {
        Self::with_clock(serial, Box::new(SystemClock), config)
    }

    pub fn with_clock(serial: Box<dyn SerialPort>, clock: Box<dyn Clock>, config: Config) -> Self {
        Sender { serial, clock, config }
    }

    /// Opens `path` and sends its contents. Returns the number of bytes sent.
    pub fn send_file(&mut self, path: &Path) -> Result<u64, TransferError> {
        let file = File::open(path).map_err(TransferError::File)?;
        info!("Sending file: {}", path.display());
        self.send(BufReader::new(file))
    }

    /// Runs the transfer to completion, consuming `source`.
    ///
    /// Blocks the calling thread until the receiver acknowledges EOT or the
    /// transfer fails. `source` is dropped before this returns on every path.
    pub fn send<R: Read>(&mut self, mut source: R) -> Result<u64, TransferError> {
        let mut machine = SenderMachine::new(self.config.clone(), self.clock.now());
        let mut last_block: Option<Block> = None;
        let mut sent_bytes = 0u64;

        debug!("Waiting for receiver NAK");

        loop {
            match machine.action() {
                SenderAction::Poll(delay) => {
                    self.clock.sleep(delay);
                    let data = self.serial.read_available().map_err(TransferError::Transport)?;
                    if let Some(&first) = data.first() {
                        debug!("Received: {} ({} bytes)", control_name(first), data.len());
                    }
                    machine.handle(SenderEvent::Received(&data), self.clock.now());
                }
                SenderAction::SendBlock(sequence) => {
                    match Block::assemble(sequence, &mut source).map_err(TransferError::File)? {
                        Some((block, len)) => {
                            self.serial.write_all(block.as_bytes()).map_err(TransferError::Transport)?;
                            debug!("Sent: block {} ({} bytes)", sequence, len);
                            sent_bytes += len as u64;
                            last_block = Some(block);
                            machine.handle(SenderEvent::BlockSent, self.clock.now());
                        }
                        None => {
                            debug!("End of file after {} bytes", sent_bytes);
                            machine.handle(SenderEvent::Exhausted, self.clock.now());
                        }
                    }
                }
                SenderAction::Resend => {
                    if let Some(block) = &last_block {
                        self.serial.write_all(block.as_bytes()).map_err(TransferError::Transport)?;
                        warn!(
                            "Resent: block {} (retry {}/{})",
                            block.sequence(),
                            machine.retries(),
                            self.config.max_retries
                        );
                    }
                    machine.handle(SenderEvent::BlockSent, self.clock.now());
                }
                SenderAction::SendEot => {
                    self.serial.write_byte(EOT).map_err(TransferError::Transport)?;
                    debug!("Sent: EOT");
                    machine.handle(SenderEvent::EotSent, self.clock.now());
                }
                SenderAction::Complete => {
                    info!("Transfer complete: {} bytes sent", sent_bytes);
                    return Ok(sent_bytes);
                }
                SenderAction::Abort(failure) => {
                    let err = TransferError::from(failure);
                    warn!("Send aborted: {}", err);
                    return Err(err);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::serial::MockSerialPort;

    fn blocks_of(content: &[u8]) -> Vec<Block> {
        content
            .chunks(PAYLOAD_LEN)
            .enumerate()
            .map(|(i, chunk)| Block::new((i + 1) as u8, chunk))
            .collect()
    }

    fn sender(mock: MockSerialPort) -> Sender {
        Sender::with_clock(Box::new(mock), Box::new(VirtualClock::new()), Config::default())
    }

    #[test]
    fn test_sender_full_transfer() {
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let responses = vec![vec![NAK], vec![ACK], vec![ACK], vec![ACK], vec![ACK]];

        let blocks = blocks_of(&content);
        assert_eq!(blocks.len(), 3);

        let mut expected_writes = Vec::new();
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.sequence(), (i + 1) as u8);
            expected_writes.extend_from_slice(block.as_bytes());
        }
        expected_writes.push(EOT);

        let last = blocks[2].as_bytes();
        assert_eq!(&last[3..47], &content[256..]);
        assert!(last[47..131].iter().all(|&b| b == SUB));
        assert_eq!(last[47..131].len(), 84);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        let sent = sender.send(&content[..]).expect("Transfer should succeed");
        assert_eq!(sent, 300);
    }

    #[test]
    fn test_sender_finds_nak_among_noise() {
        let content = b"Test data";

        let responses = vec![vec![], vec![0xFF, 0x00, NAK, 0x33], vec![ACK], vec![ACK]];

        let mut expected_writes = Block::new(1, content).as_bytes().to_vec();
        expected_writes.push(EOT);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        assert_eq!(sender.send(&content[..]).unwrap(), 9);
    }

    #[test]
    fn test_sender_connect_timeout() {
        let responses = vec![vec![0x00], vec![], vec![0x7F]];

        let mut sender = sender(MockSerialPort::new(responses, vec![]));
        let err = sender.send(&b"never sent"[..]).unwrap_err();
        assert_eq!(err.timeout(), Some(Timeout::ReceiverConnect));
    }

    #[test]
    fn test_sender_resends_identical_block_after_nak() {
        let content = [0x42u8; 128];
        let block = Block::new(1, &content);

        let responses = vec![vec![NAK], vec![NAK], vec![ACK], vec![ACK]];

        let mut expected_writes = block.as_bytes().to_vec();
        expected_writes.extend_from_slice(block.as_bytes());
        expected_writes.push(EOT);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        assert_eq!(sender.send(&content[..]).unwrap(), 128);
    }

    #[test]
    fn test_sender_retry_ceiling() {
        let content = b"retry me";
        let block = Block::new(1, content);

        // Start NAK, then eleven NAKs for block 1
        let responses = vec![vec![NAK]; 12];

        // First transmission plus ten retransmissions, never a twelfth
        let expected_writes = block.as_bytes().repeat(11);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        let err = sender.send(&content[..]).unwrap_err();
        assert_eq!(err.timeout(), Some(Timeout::MaxRetries));
    }

    #[test]
    fn test_sender_unexpected_response() {
        let content = b"x";

        let responses = vec![vec![NAK], vec![b'C', ACK]];
        let expected_writes = Block::new(1, content).as_bytes().to_vec();

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        match sender.send(&content[..]) {
            Err(TransferError::UnexpectedResponse(b'C')) => {}
            other => panic!("Expected unexpected response error, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_block_ack_timeout() {
        let content = b"nobody listens";

        let responses = vec![vec![NAK]];
        let expected_writes = Block::new(1, content).as_bytes().to_vec();

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        let err = sender.send(&content[..]).unwrap_err();
        assert_eq!(err.timeout(), Some(Timeout::BlockAck));
    }

    #[test]
    fn test_sender_repeats_eot_until_ack() {
        let content = b"eot";

        let responses = vec![vec![NAK], vec![ACK], vec![], vec![NAK], vec![ACK]];

        let mut expected_writes = Block::new(1, content).as_bytes().to_vec();
        expected_writes.extend_from_slice(&[EOT, EOT, EOT]);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        assert_eq!(sender.send(&content[..]).unwrap(), 3);
    }

    #[test]
    fn test_sender_eot_ack_timeout() {
        let content = b"eot";

        let responses = vec![vec![NAK], vec![ACK]];

        // One EOT up front, then one per silent 1.5 s poll until the minute is up
        let mut expected_writes = Block::new(1, content).as_bytes().to_vec();
        expected_writes.extend_from_slice(&[EOT; 40]);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        let err = sender.send(&content[..]).unwrap_err();
        assert_eq!(err.timeout(), Some(Timeout::EotAck));
    }

    #[test]
    fn test_sender_empty_source_sends_only_eot() {
        let responses = vec![vec![NAK], vec![ACK]];

        let mut sender = sender(MockSerialPort::new(responses, vec![EOT]));
        assert_eq!(sender.send(&b""[..]).unwrap(), 0);
    }

    #[test]
    fn test_sender_transport_failure_is_not_retried() {
        let content = b"unplugged";

        let responses = vec![vec![NAK]];
        let expected_writes = Block::new(1, content).as_bytes().to_vec();

        let mock = MockSerialPort::new(responses, expected_writes).fail_at(1);
        let mut sender = sender(mock);
        match sender.send(&content[..]) {
            Err(TransferError::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_sender_transport_write_failure() {
        let content: Vec<u8> = (0..200).map(|i| i as u8).collect();

        let responses = vec![vec![NAK], vec![ACK]];
        let expected_writes = Block::new(1, &content[..128]).as_bytes().to_vec();

        let mock = MockSerialPort::new(responses, expected_writes).fail_write_at(1);
        let mut sender = sender(mock);
        match sender.send(&content[..]) {
            Err(TransferError::Transport(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("Expected transport error, got {:?}", other),
        }
    }

    /// Source that yields one full block of data, then fails
    struct FailingSource {
        served: bool,
    }

    impl Read for FailingSource {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::Error::other("disk gone"));
            }
            self.served = true;
            let n = buf.len().min(PAYLOAD_LEN);
            buf[..n].fill(0x33);
            Ok(n)
        }
    }

    #[test]
    fn test_sender_source_read_failure() {
        let responses = vec![vec![NAK], vec![ACK]];
        let expected_writes = Block::new(1, &[0x33; 128]).as_bytes().to_vec();

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        match sender.send(FailingSource { served: false }) {
            Err(TransferError::File(e)) => assert_eq!(e.to_string(), "disk gone"),
            other => panic!("Expected file error, got {:?}", other),
        }
    }

    #[test]
    fn test_send_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"from disk").unwrap();

        let responses = vec![vec![NAK], vec![ACK], vec![ACK]];
        let mut expected_writes = Block::new(1, b"from disk").as_bytes().to_vec();
        expected_writes.push(EOT);

        let mut sender = sender(MockSerialPort::new(responses, expected_writes));
        assert_eq!(sender.send_file(file.path()).unwrap(), 9);
    }

    #[test]
    fn test_send_file_missing() {
        let mut sender = sender(MockSerialPort::new(vec![], vec![]));
        let err = sender.send_file(Path::new("/nonexistent/xmodem/input.bin")).unwrap_err();
        assert!(matches!(err, TransferError::File(_)));
    }

    #[test]
    fn test_machine_sequence_wraps_to_zero() {
        let now = Instant::now();
        let mut machine = SenderMachine::new(Config::default(), now);

        machine.handle(SenderEvent::Received(&[NAK]), now);
        assert_eq!(machine.action(), SenderAction::SendBlock(1));

        for expected in (2..=255u8).chain([0, 1]) {
            machine.handle(SenderEvent::BlockSent, now);
            machine.handle(SenderEvent::Received(&[ACK]), now);
            assert_eq!(machine.action(), SenderAction::SendBlock(expected));
        }
    }

    #[test]
    fn test_machine_nak_count_and_reset() {
        let now = Instant::now();
        let mut machine = SenderMachine::new(Config::default(), now);
        machine.handle(SenderEvent::Received(&[NAK]), now);
        machine.handle(SenderEvent::BlockSent, now);

        for attempt in 1..=10 {
            machine.handle(SenderEvent::Received(&[NAK]), now);
            assert_eq!(machine.action(), SenderAction::Resend, "attempt {}", attempt);
            assert_eq!(machine.retries(), attempt);
            machine.handle(SenderEvent::BlockSent, now);
        }

        machine.handle(SenderEvent::Received(&[ACK]), now);
        assert_eq!(machine.retries(), 0);
        assert_eq!(machine.action(), SenderAction::SendBlock(2));
    }

    #[test]
    fn test_machine_connect_deadline() {
        let start = Instant::now();
        let mut machine = SenderMachine::new(Config::default(), start);
        assert_eq!(machine.action(), SenderAction::Poll(Duration::ZERO));

        machine.handle(SenderEvent::Received(&[]), start + Duration::from_secs(59));
        assert_eq!(machine.action(), SenderAction::Poll(Duration::from_millis(800)));

        machine.handle(SenderEvent::Received(&[]), start + Duration::from_secs(60));
        assert_eq!(
            machine.action(),
            SenderAction::Abort(Failure::Timeout(Timeout::ReceiverConnect))
        );
    }

    #[test]
    fn test_machine_polls_slower_after_eot() {
        let now = Instant::now();
        let mut machine = SenderMachine::new(Config::default(), now);
        machine.handle(SenderEvent::Received(&[NAK]), now);
        machine.handle(SenderEvent::BlockSent, now);
        assert_eq!(machine.action(), SenderAction::Poll(Duration::from_millis(150)));

        machine.handle(SenderEvent::Received(&[ACK]), now);
        machine.handle(SenderEvent::Exhausted, now);
        assert_eq!(machine.action(), SenderAction::SendEot);

        machine.handle(SenderEvent::EotSent, now);
        assert_eq!(machine.action(), SenderAction::Poll(Duration::from_millis(1500)));

        machine.handle(SenderEvent::Received(&[ACK]), now);
        assert_eq!(machine.state(), &SenderState::Done);
        assert_eq!(machine.action(), SenderAction::Complete);
    }

    #[test]
    fn test_machine_ignores_out_of_order_events() {
        let now = Instant::now();
        let mut machine = SenderMachine::new(Config::default(), now);
        let before = machine.state().clone();

        machine.handle(SenderEvent::EotSent, now);
        assert_eq!(machine.state(), &before);
    }
}
