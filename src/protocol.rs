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

//! XMODEM wire constants and block geometry

/// Start of header - first byte of every 132-byte block
pub const SOH: u8 = 0x01;

/// End of transmission - sender has no further blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - block (or EOT) received intact
pub const ACK: u8 = 0x06;

/// Negative acknowledge - receiver requests start of transmission, or retransmission of a corrupted block
pub const NAK: u8 = 0x15;

/// Substitute (CTRL+Z) - fills the unused tail of the final block
pub const SUB: u8 = 0x1A;

/// Payload bytes carried by one block
pub const PAYLOAD_LEN: usize = 128;

/// Wire size of one block: SOH, sequence, complement, payload, checksum
pub const BLOCK_LEN: usize = PAYLOAD_LEN + 4;

/// Offset of the first payload byte inside a block
pub const PAYLOAD_OFFSET: usize = 3;

/// Offset of the checksum byte inside a block
pub const CHECKSUM_OFFSET: usize = BLOCK_LEN - 1;

/// Sequence number of the first block of a transfer
pub const FIRST_SEQUENCE: u8 = 1;

/// Short name of a control byte for log output
pub fn control_name(byte: u8) -> &'static str {
    match byte {
        SOH => "SOH",
        EOT => "EOT",
        ACK => "ACK",
        NAK => "NAK",
        SUB => "SUB",
        _ => "?",
    }
}
