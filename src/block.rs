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

//! Block codec: framing a payload into the 132-byte wire format and checking
//! a received frame against it.
//!
//! ```text
//! [0] SOH  [1] seq  [2] !seq  [3..131] payload (128)  [131] checksum
//! ```

use std::fmt;
use std::io::{self, Read};
use crate::protocol::*;

/// 8-bit modular sum of the payload bytes.
///
/// Summing the bytes as signed or unsigned values gives the same low 8 bits,
/// so the wrapping unsigned sum is used.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

// ============================================================================
// Corruption
// ============================================================================

/// Reason a received frame failed verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("sequence number 0x{sequence:02X} does not match its complement 0x{complement:02X}")]
    SequenceComplement { sequence: u8, complement: u8 },

    #[error("checksum mismatch: block carries 0x{received:02X}, payload sums to 0x{computed:02X}")]
    Checksum { received: u8, computed: u8 },
}

// ============================================================================
// Block
// ============================================================================

/// One framed XMODEM block, always exactly `BLOCK_LEN` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Block([u8; BLOCK_LEN]);

impl Block {
    /// Frames up to 128 payload bytes, padding the remainder with SUB.
    ///
    /// Returns `None` if `payload` is longer than `PAYLOAD_LEN`.
    pub fn from_payload(sequence: u8, payload: &[u8]) -> Option<Self> {
        (payload.len() <= PAYLOAD_LEN).then(|| Block::new(sequence, payload))
    }

    /// Callers guarantee `payload.len() <= PAYLOAD_LEN`.
    pub(crate) fn new(sequence: u8, payload: &[u8]) -> Self {
        let mut frame = [SUB; BLOCK_LEN];
        frame[0] = SOH;
        frame[1] = sequence;
        frame[2] = !sequence;
        frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        frame[CHECKSUM_OFFSET] = checksum(&frame[PAYLOAD_OFFSET..CHECKSUM_OFFSET]);
        Block(frame)
    }

    /// Reads the next block's payload from `source`.
    ///
    /// Returns `Ok(None)` when the source is already exhausted, otherwise the
    /// block together with the number of real (unpadded) payload bytes. A
    /// source that runs dry partway through yields a SUB-padded final block.
    pub fn assemble<R: Read>(sequence: u8, source: &mut R) -> io::Result<Option<(Block, usize)>> {
        let mut payload = [SUB; PAYLOAD_LEN];
        let mut filled = 0;

        while filled < PAYLOAD_LEN {
            match source.read(&mut payload[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if filled == 0 {
            return Ok(None);
        }

        Ok(Some((Block::new(sequence, &payload[..filled]), filled)))
    }

    /// Wraps the first `BLOCK_LEN` bytes of a received frame without checking them.
    ///
    /// Returns `None` if fewer than `BLOCK_LEN` bytes are supplied.
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let frame: [u8; BLOCK_LEN] = frame.get(..BLOCK_LEN)?.try_into().ok()?;
        Some(Block(frame))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn sequence(&self) -> u8 {
        self.0[1]
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[PAYLOAD_OFFSET..CHECKSUM_OFFSET]
    }

    /// Checks the sequence complement and the checksum.
    ///
    /// The header byte and the sequence number itself are not checked.
    pub fn verify(&self) -> Result<(), Corruption> {
        let sequence = self.0[1];
        let complement = self.0[2];
        if sequence != !complement {
            return Err(Corruption::SequenceComplement { sequence, complement });
        }

        let received = self.0[CHECKSUM_OFFSET];
        let computed = checksum(self.payload());
        if received != computed {
            return Err(Corruption::Checksum { received, computed });
        }

        Ok(())
    }

    pub fn is_corrupted(&self) -> bool {
        self.verify().is_err()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("sequence", &self.sequence())
            .field("checksum", &format_args!("0x{:02X}", self.0[CHECKSUM_OFFSET]))
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that hands out at most one byte per call
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.split_first() {
                Some((&b, rest)) if !buf.is_empty() => {
                    buf[0] = b;
                    self.0 = rest;
                    Ok(1)
                }
                _ => Ok(0),
            }
        }
    }

    #[test]
    fn test_checksum_wraps() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0xFF, 0x01]), 0x00);
        assert_eq!(checksum(&[0x80, 0x80, 0x05]), 0x05);

        let signed: i32 = [0xF0u8, 0x7F, 0x33].iter().map(|&b| b as i8 as i32).sum();
        assert_eq!(checksum(&[0xF0, 0x7F, 0x33]), signed as u8);
    }

    #[test]
    fn test_block_layout() {
        let block = Block::new(1, b"Test data");
        let bytes = block.as_bytes();

        assert_eq!(bytes.len(), 132);
        assert_eq!(bytes[0], SOH);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0xFE);
        assert_eq!(&bytes[3..12], b"Test data");
        assert!(bytes[12..131].iter().all(|&b| b == SUB));
        assert_eq!(bytes[131], checksum(&bytes[3..131]));
    }

    #[test]
    fn test_every_sequence_and_length_verifies() {
        let data: Vec<u8> = (0..PAYLOAD_LEN).map(|i| (i * 37 + 11) as u8).collect();
        for sequence in 0..=255u8 {
            for len in 0..=PAYLOAD_LEN {
                let block = Block::new(sequence, &data[..len]);
                assert_eq!(block.verify(), Ok(()), "seq {} len {}", sequence, len);
                assert_eq!(block.sequence(), sequence);
            }
        }
    }

    #[test]
    fn test_assemble_short_final_block_is_padded() {
        let content: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
        let mut source = &content[..];

        let (first, n1) = Block::assemble(1, &mut source).unwrap().unwrap();
        let (second, n2) = Block::assemble(2, &mut source).unwrap().unwrap();
        let (third, n3) = Block::assemble(3, &mut source).unwrap().unwrap();
        assert_eq!((n1, n2, n3), (128, 128, 44));

        assert_eq!(first.payload(), &content[..128]);
        assert_eq!(second.payload(), &content[128..256]);
        assert_eq!(&third.payload()[..44], &content[256..]);
        assert_eq!(third.payload()[44..].len(), 84);
        assert!(third.payload()[44..].iter().all(|&b| b == SUB));
        assert!(!third.is_corrupted());

        assert!(Block::assemble(4, &mut source).unwrap().is_none());
    }

    #[test]
    fn test_from_payload_rejects_oversized_payload() {
        assert!(Block::from_payload(1, &[0u8; 129]).is_none());
        assert_eq!(Block::from_payload(1, &[0u8; 128]), Some(Block::new(1, &[0u8; 128])));
        assert_eq!(Block::from_payload(2, b""), Some(Block::new(2, &[SUB; 128])));
    }

    #[test]
    fn test_assemble_empty_source() {
        let mut source: &[u8] = &[];
        assert!(Block::assemble(1, &mut source).unwrap().is_none());
    }

    #[test]
    fn test_assemble_independent_of_read_granularity() {
        let content: Vec<u8> = (0..100u8).map(|b| b.wrapping_mul(7)).collect();

        let mut whole = &content[..];
        let (a, _) = Block::assemble(9, &mut whole).unwrap().unwrap();
        let (b, _) = Block::assemble(9, &mut Trickle(&content)).unwrap().unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_flipped_payload_byte_is_checksum_corruption() {
        let block = Block::new(5, &[0x42; 128]);
        let mut frame = block.as_bytes().to_vec();
        frame[50] ^= 0xFF;

        let damaged = Block::from_frame(&frame).unwrap();
        assert!(matches!(damaged.verify(), Err(Corruption::Checksum { .. })));
    }

    #[test]
    fn test_bad_complement_is_corruption() {
        let mut frame = Block::new(7, b"abc").as_bytes().to_vec();
        frame[2] = 0x00;

        let damaged = Block::from_frame(&frame).unwrap();
        assert_eq!(
            damaged.verify(),
            Err(Corruption::SequenceComplement { sequence: 7, complement: 0 })
        );
    }

    #[test]
    fn test_from_frame_needs_full_block() {
        assert!(Block::from_frame(&[SOH; 131]).is_none());

        let mut long = Block::new(3, b"xyz").as_bytes().to_vec();
        long.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(Block::from_frame(&long), Some(Block::new(3, b"xyz")));
    }
}
