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
use std::io::{self, BufWriter, Write};
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

/// Answer the receiver gives to what it just received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Intact new block: store the payload, then ACK
    Accept(Block),
    /// Intact repeat of the last accepted block: ACK without storing
    Duplicate(u8),
    /// Corrupted or incomplete block: NAK to request retransmission
    Reject,
    /// EOT: ACK and finish
    EndOfTransfer,
}

impl Reply {
    pub fn byte(&self) -> u8 {
        match self {
            Reply::Reject => NAK,
            _ => ACK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    /// Requesting the start of transmission with a NAK
    Connect,
    /// Polling for the first bytes of a block or EOT
    ReceiveData { attempts: u32 },
    /// Collecting the rest of a block that arrived in pieces
    Reassemble { buffer: Vec<u8>, deadline: Instant },
    Reply(Reply),
    Abort(Failure),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverAction {
    /// Send NAK to ask the sender to begin
    RequestStart,
    /// Wait, then read whatever the line holds
    Poll(Duration),
    /// Send the reply byte, storing an accepted payload first
    Reply(Reply),
    Complete,
    Abort(Failure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverEvent<'a> {
    Sent,
    Received(&'a [u8]),
}

// ============================================================================
// State Machine
// ============================================================================

/// Receive-side protocol logic without any I/O
///
/// Verification has no I/O of its own, so it runs inside the transition that
/// completes a block and always lands in `ReceiverState::Reply`.
#[derive(Debug, Clone)]
pub struct ReceiverMachine {
    state: ReceiverState,
    config: Config,
    retries: u32,
    last_accepted: Option<u8>,
}

impl ReceiverMachine {
    pub fn new(config: Config) -> Self {
        ReceiverMachine {
            state: ReceiverState::Connect,
            config,
            retries: 0,
            last_accepted: None,
        }
    }

    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn action(&self) -> ReceiverAction {
        match &self.state {
            ReceiverState::Connect => ReceiverAction::RequestStart,
            ReceiverState::ReceiveData { .. } => ReceiverAction::Poll(self.config.receive_poll),
            ReceiverState::Reassemble { .. } => ReceiverAction::Poll(self.config.reassembly_poll),
            ReceiverState::Reply(reply) => ReceiverAction::Reply(reply.clone()),
            ReceiverState::Abort(failure) => ReceiverAction::Abort(*failure),
            ReceiverState::Done => ReceiverAction::Complete,
        }
    }

    pub fn handle(&mut self, event: ReceiverEvent<'_>, now: Instant) {
        let state = std::mem::replace(&mut self.state, ReceiverState::Done);
        self.state = match (state, event) {
            (ReceiverState::Connect, ReceiverEvent::Sent) => ReceiverState::ReceiveData { attempts: 0 },
            (ReceiverState::ReceiveData { attempts }, ReceiverEvent::Received(bytes)) => {
                self.on_data(attempts, bytes, now)
            }
            (ReceiverState::Reassemble { mut buffer, deadline }, ReceiverEvent::Received(bytes)) => {
                buffer.extend_from_slice(bytes);
                if buffer.len() >= BLOCK_LEN {
                    self.verify(&buffer)
                } else if now >= deadline {
                    warn!("Block stalled after {} of {} bytes", buffer.len(), BLOCK_LEN);
                    ReceiverState::Reply(Reply::Reject)
                } else {
                    ReceiverState::Reassemble { buffer, deadline }
                }
            }
            (ReceiverState::Reply(Reply::EndOfTransfer), ReceiverEvent::Sent) => ReceiverState::Done,
            (ReceiverState::Reply(_), ReceiverEvent::Sent) => ReceiverState::ReceiveData { attempts: 0 },
            (state, event) => {
                warn!("Ignoring {:?} in state {:?}", event, state);
                state
            }
        };
    }

    fn on_data(&mut self, attempts: u32, bytes: &[u8], now: Instant) -> ReceiverState {
        if bytes.is_empty() {
            let attempts = attempts + 1;
            if attempts < self.config.receive_attempts {
                return ReceiverState::ReceiveData { attempts };
            }
            self.retries += 1;
            warn!("Nothing received for {:?}, requesting start again", self.config.receive_window());
            return self.connect();
        }

        self.retries = 0;
        if bytes[0] == EOT {
            ReceiverState::Reply(Reply::EndOfTransfer)
        } else if bytes.len() >= BLOCK_LEN {
            self.verify(bytes)
        } else {
            ReceiverState::Reassemble {
                buffer: bytes.to_vec(),
                deadline: now + self.config.reassembly_timeout,
            }
        }
    }

    fn connect(&self) -> ReceiverState {
        if self.retries > self.config.max_retries {
            ReceiverState::Abort(Failure::Timeout(Timeout::TransmitterConnect))
        } else {
            ReceiverState::Connect
        }
    }

    fn verify(&mut self, frame: &[u8]) -> ReceiverState {
        if frame.len() > BLOCK_LEN {
            debug!("Discarding {} bytes past the end of the block", frame.len() - BLOCK_LEN);
        }

        let Some(block) = Block::from_frame(frame) else {
            return ReceiverState::Reply(Reply::Reject);
        };

        if let Err(corruption) = block.verify() {
            warn!("Block corrupted: {}", corruption);
            return ReceiverState::Reply(Reply::Reject);
        }

        let sequence = block.sequence();
        if self.last_accepted == Some(sequence) {
            return ReceiverState::Reply(Reply::Duplicate(sequence));
        }

        let expected = self.last_accepted.map_or(FIRST_SEQUENCE, |s| s.wrapping_add(1));
        if sequence != expected {
            warn!("Block {} out of sequence, expected {}", sequence, expected);
        }

        self.last_accepted = Some(sequence);
        ReceiverState::Reply(Reply::Accept(block))
    }
}

// ============================================================================
// Block Sink
// ============================================================================

/// Writes accepted payloads, holding the latest back until the next block or
/// EOT shows whether it was the final one.
pub struct BlockSink<W: Write> {
    inner: W,
    pending: Option<Block>,
    strip_padding: bool,
    written: u64,
}

impl<W: Write> BlockSink<W> {
    pub fn new(inner: W, strip_padding: bool) -> Self {
        BlockSink {
            inner,
            pending: None,
            strip_padding,
            written: 0,
        }
    }

    pub fn push(&mut self, block: Block) -> io::Result<()> {
        if let Some(previous) = self.pending.replace(block) {
            self.inner.write_all(previous.payload())?;
            self.written += PAYLOAD_LEN as u64;
        }
        Ok(())
    }

    /// Writes the held-back block, trimming its SUB padding if configured,
    /// and flushes. Trailing 0x1A bytes of real data are indistinguishable
    /// from padding and are trimmed too. Returns the total number of bytes written.
    pub fn finish(mut self) -> io::Result<u64> {
        if let Some(last) = self.pending.take() {
            let payload = last.payload();
            let end = if !self.strip_padding {
                payload.len()
            } else if let Some(i) = payload.iter().rposition(|&b| b != SUB) {
                i + 1
            } else {
                // A transmitted block carries at least one byte of data
                warn!("Final block is entirely SUB, keeping 1 byte; the file may have ended in 0x1A");
                1
            };
            if end < payload.len() {
                debug!("Stripped {} bytes of SUB padding", payload.len() - end);
            }
            self.inner.write_all(&payload[..end])?;
            self.written += end as u64;
        }
        self.inner.flush()?;
        Ok(self.written)
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Receives one file over a serial line
pub struct Receiver {
    serial: Box<dyn SerialPort>,
    clock: Box<dyn Clock>,
    config: Config,
}

impl Receiver {
    pub fn new(serial: Box<dyn SerialPort>, config: Config) -> Self {
        Self::with_clock(serial, Box::new(SystemClock), config)
    }

    pub fn with_clock(serial: Box<dyn SerialPort>, clock: Box<dyn Clock>, config: Config) -> Self {
        Receiver { serial, clock, config }
    }

    /// Creates (or truncates) `path` and receives into it. Returns the number of bytes written.
    pub fn receive_file(&mut self, path: &Path) -> Result<u64, TransferError> {
        let file = File::create(path).map_err(TransferError::File)?;
        info!("Receiving file: {}", path.display());
        self.receive(BufWriter::new(file))
    }

    /// Runs the transfer to completion, consuming `sink`.
    ///
    /// Blocks the calling thread until EOT is acknowledged or the transfer
    /// fails. `sink` is flushed on success and dropped on every path.
    pub fn receive<W: Write>(&mut self, sink: W) -> Result<u64, TransferError> {
        let mut sink = BlockSink::new(sink, self.config.strip_padding);
        let mut machine = ReceiverMachine::new(self.config.clone());

        self.serial.clear_buffers().map_err(TransferError::Transport)?;

        loop {
            match machine.action() {
                ReceiverAction::RequestStart => {
                    self.serial.write_byte(NAK).map_err(TransferError::Transport)?;
                    debug!("Sent: NAK (start request {})", machine.retries() + 1);
                    machine.handle(ReceiverEvent::Sent, self.clock.now());
                }
                ReceiverAction::Poll(delay) => {
                    self.clock.sleep(delay);
                    let data = self.serial.read_available().map_err(TransferError::Transport)?;
                    if !data.is_empty() {
                        debug!("Received: {} bytes", data.len());
                    }
                    machine.handle(ReceiverEvent::Received(&data), self.clock.now());
                }
                ReceiverAction::Reply(reply) => {
                    let byte = reply.byte();
                    match reply {
                        Reply::Accept(block) => {
                            debug!("Accepted: block {}", block.sequence());
                            sink.push(block).map_err(TransferError::File)?;
                        }
                        Reply::Duplicate(sequence) => debug!("Duplicate: block {}", sequence),
                        Reply::Reject => warn!("Rejected block, requesting retransmission"),
                        Reply::EndOfTransfer => debug!("Received: EOT"),
                    }
                    self.serial.write_byte(byte).map_err(TransferError::Transport)?;
                    debug!("Sent: {}", control_name(byte));
                    machine.handle(ReceiverEvent::Sent, self.clock.now());
                }
                ReceiverAction::Complete => {
                    let received = sink.finish().map_err(TransferError::File)?;
                    info!("Transfer complete: {} bytes received", received);
                    return Ok(received);
                }
                ReceiverAction::Abort(failure) => {
                    let err = TransferError::from(failure);
                    warn!("Receive aborted: {}", err);
                    return Err(err);
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
