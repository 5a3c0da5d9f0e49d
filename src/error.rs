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

// ============================================================================
// Error Types
// ============================================================================

/// Phase in which a transfer gave up waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Timeout {
    /// Sender never saw the receiver's start NAK
    #[error("receiver did not connect")]
    ReceiverConnect,
    /// Receiver kept requesting a start and never got data
    #[error("transmitter did not connect")]
    TransmitterConnect,
    /// Sender got no response to a data block
    #[error("timed out waiting for block acknowledgment")]
    BlockAck,
    /// Sender got no ACK for the end-of-transmission marker
    #[error("timed out waiting for acknowledgment of EOT")]
    EotAck,
    /// Sender got too many consecutive NAKs for one block
    #[error("maximum retries reached")]
    MaxRetries,
}

/// Terminal outcome decided by a state machine, before it becomes a `TransferError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Timeout(Timeout),
    UnexpectedResponse(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("timeout: {0}")]
    Timeout(Timeout),

    #[error("unexpected response 0x{0:02X} while waiting for ACK or NAK")]
    UnexpectedResponse(u8),

    #[error("serial I/O error: {0}")]
    Transport(#[source] std::io::Error),

    #[error("file I/O error: {0}")]
    File(#[source] std::io::Error),
}

impl From<Failure> for TransferError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Timeout(t) => TransferError::Timeout(t),
            Failure::UnexpectedResponse(b) => TransferError::UnexpectedResponse(b),
        }
    }
}

impl TransferError {
    /// Which phase timed out, if this is a timeout
    pub fn timeout(&self) -> Option<Timeout> {
        match self {
            TransferError::Timeout(t) => Some(*t),
            _ => None,
        }
    }
}
