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

//! XMODEM (128-byte block, 8-bit checksum) file transfer over a serial line.
//!
//! [`Sender`] and [`Receiver`] each run one transfer to completion on the
//! calling thread. Their protocol logic lives in [`SenderMachine`] and
//! [`ReceiverMachine`], which perform no I/O and can be driven directly.

pub mod block;
pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;

pub use block::{Block, Corruption, checksum};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use error::{Failure, Timeout, TransferError};
pub use receiver::{Receiver, ReceiverMachine};
pub use sender::{Sender, SenderMachine};
pub use serial::{RealSerialPort, SerialPort};

// ============================================================================
// Tests
// ============================================================================
