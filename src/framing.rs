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

//! ZMODEM framing: header and subpacket encoding, plus the incremental
//! parsers for the receive path.
//!
//! Bytes arrive in packet-sized slices across many `tick` calls, so
//! both [`HeaderScanner`] and [`SubpacketParser`] keep their position
//! between polls and never block waiting for the rest of a frame. A
//! frame whose CRC fails is silently discarded; the peer's retry timer
//! retransmits it.

use tracing::debug;

use crate::crc::Crc16;
use crate::protocol::{
    needs_escape, DATA_CHUNK_SIZE, ESCAPE_MASK, SUBPACKET_BUFFER_SIZE, XON, ZACK, ZBIN, ZCAN,
    ZCRCE, ZCRCG, ZDLE, ZFIN, ZHEX, ZPAD,
};
use crate::stream::WireStream;

/// A decoded ZMODEM header: type byte plus four flag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: u8,
    pub flags: [u8; 4],
}

impl Header {
    pub fn new(kind: u8, flags: [u8; 4]) -> Self {
        Header { kind, flags }
    }

    /// File offset carried in the flags (ZRPOS, ZDATA, ZEOF).
    pub fn offset(&self) -> u64 {
        crate::protocol::flags_to_offset(self.flags)
    }
}

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Emit a hex header: `** ZDLE B` + ten hex digits of type and flags +
/// four hex digits of CRC + CR LF, with a trailing XON except after
/// ZFIN and ZACK.
pub fn write_hex_header(wire: &mut dyn WireStream, kind: u8, flags: [u8; 4]) -> bool {
    let mut frame = [0u8; 24];
    let mut n = 0;
    for b in [ZPAD, ZPAD, ZDLE, ZHEX] {
        frame[n] = b;
        n += 1;
    }

    let mut crc = Crc16::new();
    for b in [kind, flags[0], flags[1], flags[2], flags[3]] {
        crc.update(b);
        frame[n] = HEX_DIGITS[(b >> 4) as usize];
        frame[n + 1] = HEX_DIGITS[(b & 0x0F) as usize];
        n += 2;
    }
    for b in crc.value().to_be_bytes() {
        frame[n] = HEX_DIGITS[(b >> 4) as usize];
        frame[n + 1] = HEX_DIGITS[(b & 0x0F) as usize];
        n += 2;
    }

    frame[n] = b'\r';
    frame[n + 1] = b'\n';
    n += 2;
    if kind != ZFIN && kind != ZACK {
        frame[n] = XON;
        n += 1;
    }

    wire.write_bytes(&frame[..n]) == n
}

/// Emit a binary header: `* ZDLE A` + raw type, flags and big-endian CRC.
pub fn write_binary_header(wire: &mut dyn WireStream, kind: u8, flags: [u8; 4]) -> bool {
    let mut frame = [0u8; 10];
    frame[0] = ZPAD;
    frame[1] = ZDLE;
    frame[2] = ZBIN;

    let mut crc = Crc16::new();
    frame[3] = kind;
    crc.update(kind);
    for (i, &f) in flags.iter().enumerate() {
        frame[4 + i] = f;
        crc.update(f);
    }
    frame[8..10].copy_from_slice(&crc.value().to_be_bytes());

    wire.write_bytes(&frame) == frame.len()
}

/// Emit a ZDLE-escaped data subpacket. The CRC covers the unescaped
/// payload plus the terminator byte; `end_frame` selects ZCRCE over
/// ZCRCG.
pub fn write_data_subpacket(wire: &mut dyn WireStream, payload: &[u8], end_frame: bool) -> bool {
    debug_assert!(payload.len() <= DATA_CHUNK_SIZE);

    // Worst case every byte escapes to two, plus terminator and CRC.
    let mut frame = [0u8; 2 * DATA_CHUNK_SIZE + 4];
    let mut n = 0;
    let mut crc = Crc16::new();

    for &b in payload {
        crc.update(b);
        if needs_escape(b) {
            frame[n] = ZDLE;
            frame[n + 1] = b ^ ESCAPE_MASK;
            n += 2;
        } else {
            frame[n] = b;
            n += 1;
        }
    }

    let terminator = if end_frame { ZCRCE } else { ZCRCG };
    crc.update(terminator);
    frame[n] = ZDLE;
    frame[n + 1] = terminator;
    n += 2;
    frame[n..n + 2].copy_from_slice(&crc.value().to_be_bytes());
    n += 2;

    wire.write_bytes(&frame[..n]) == n
}

/// Emit the session abort sequence: four ZDLE/ZCAN pairs.
pub fn write_abort_sequence(wire: &mut dyn WireStream) -> bool {
    let seq = [ZDLE, ZCAN, ZDLE, ZCAN, ZDLE, ZCAN, ZDLE, ZCAN];
    wire.write_bytes(&seq) == seq.len()
}

// ============================================================================
// Header Scanner
// ============================================================================

enum ScanState {
    /// Discarding bytes until a pad character shows up.
    Seek,
    /// Saw one or more pads, expecting ZDLE.
    Pad,
    /// Saw pad(s) + ZDLE, expecting the format byte.
    Dle,
    /// Collecting the 14 hex digits of a hex header body.
    Hex { digits: [u8; 14], len: usize },
    /// Collecting the 7 raw bytes of a binary header body.
    Bin { raw: [u8; 7], len: usize },
}

/// Incremental header parser. Call [`HeaderScanner::poll`] whenever
/// header bytes may be waiting; partial headers survive across calls.
/// Anything that is not a well-formed header with a valid CRC (line
/// noise, the trailing "OO", XON bytes, corrupted frames) is skipped.
pub struct HeaderScanner {
    state: ScanState,
}

impl HeaderScanner {
    pub fn new() -> Self {
        HeaderScanner {
            state: ScanState::Seek,
        }
    }

    pub fn reset(&mut self) {
        self.state = ScanState::Seek;
    }

    /// Consume available bytes until a valid header completes or the
    /// stream runs dry.
    pub fn poll(&mut self, wire: &mut dyn WireStream) -> Option<Header> {
        while let Some(b) = wire.read_byte() {
            if let Some(header) = self.step(b) {
                return Some(header);
            }
        }
        None
    }

    fn step(&mut self, b: u8) -> Option<Header> {
        match &mut self.state {
            ScanState::Seek => {
                if b == ZPAD {
                    self.state = ScanState::Pad;
                }
                None
            }
            ScanState::Pad => {
                match b {
                    ZPAD => {} // hex headers carry two pads
                    ZDLE => self.state = ScanState::Dle,
                    _ => self.state = ScanState::Seek,
                }
                None
            }
            ScanState::Dle => {
                match b {
                    ZHEX => {
                        self.state = ScanState::Hex {
                            digits: [0; 14],
                            len: 0,
                        }
                    }
                    ZBIN => self.state = ScanState::Bin { raw: [0; 7], len: 0 },
                    ZPAD => self.state = ScanState::Pad,
                    _ => self.state = ScanState::Seek,
                }
                None
            }
            ScanState::Hex { digits, len } => match hex_value(b) {
                Some(v) => {
                    digits[*len] = v;
                    *len += 1;
                    if *len == 14 {
                        let mut bytes = [0u8; 7];
                        for (i, pair) in digits.chunks(2).enumerate() {
                            bytes[i] = (pair[0] << 4) | pair[1];
                        }
                        self.state = ScanState::Seek;
                        return Self::finish(&bytes);
                    }
                    None
                }
                None => {
                    debug!("non-hex byte 0x{:02X} inside hex header, resyncing", b);
                    self.state = if b == ZPAD {
                        ScanState::Pad
                    } else {
                        ScanState::Seek
                    };
                    None
                }
            },
            ScanState::Bin { raw, len } => {
                raw[*len] = b;
                *len += 1;
                if *len == 7 {
                    let bytes = *raw;
                    self.state = ScanState::Seek;
                    return Self::finish(&bytes);
                }
                None
            }
        }
    }

    /// Validate type+flags+CRC and build the header.
    fn finish(bytes: &[u8; 7]) -> Option<Header> {
        let mut crc = Crc16::new();
        crc.update_slice(&bytes[..5]);
        let received = u16::from_be_bytes([bytes[5], bytes[6]]);
        if crc.value() != received {
            debug!(
                kind = bytes[0],
                "header CRC mismatch (got {:04X}, want {:04X}), discarding",
                received,
                crc.value()
            );
            return None;
        }
        Some(Header {
            kind: bytes[0],
            flags: [bytes[1], bytes[2], bytes[3], bytes[4]],
        })
    }
}

impl Default for HeaderScanner {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Subpacket Parser
// ============================================================================

/// Outcome of polling a [`SubpacketParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubpacketStatus {
    /// More bytes needed; state is preserved for the next poll.
    Pending,
    /// Terminator seen and CRC verified; payload is ready.
    Complete { terminator: u8 },
    /// CRC mismatch or accumulator overflow; payload must be discarded.
    Invalid,
}

/// Incremental ZDLE-unescaping accumulator for one data subpacket.
///
/// Completion requires the two CRC bytes that trail the terminator; if
/// they have not arrived yet the parser stays pending without losing
/// the decoded payload.
pub struct SubpacketParser {
    buf: [u8; SUBPACKET_BUFFER_SIZE],
    len: usize,
    escape: bool,
    terminator: Option<u8>,
    crc_hi: Option<u8>,
}

impl SubpacketParser {
    pub fn new() -> Self {
        SubpacketParser {
            buf: [0; SUBPACKET_BUFFER_SIZE],
            len: 0,
            escape: false,
            terminator: None,
            crc_hi: None,
        }
    }

    pub fn reset(&mut self) {
        self.len = 0;
        self.escape = false;
        self.terminator = None;
        self.crc_hi = None;
    }

    /// Decoded payload accumulated so far (complete once `poll`
    /// reports [`SubpacketStatus::Complete`]).
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn poll(&mut self, wire: &mut dyn WireStream) -> SubpacketStatus {
        while let Some(b) = wire.read_byte() {
            if let Some(terminator) = self.terminator {
                match self.crc_hi {
                    None => self.crc_hi = Some(b),
                    Some(hi) => {
                        let received = u16::from_be_bytes([hi, b]);
                        let mut crc = Crc16::new();
                        crc.update_slice(&self.buf[..self.len]);
                        crc.update(terminator);
                        if crc.value() == received {
                            return SubpacketStatus::Complete { terminator };
                        }
                        debug!(
                            len = self.len,
                            "subpacket CRC mismatch (got {:04X}, want {:04X})",
                            received,
                            crc.value()
                        );
                        return SubpacketStatus::Invalid;
                    }
                }
                continue;
            }

            if self.escape {
                self.escape = false;
                if b == ZCRCE || b == ZCRCG {
                    self.terminator = Some(b);
                } else if !self.push(b ^ ESCAPE_MASK) {
                    return SubpacketStatus::Invalid;
                }
            } else if b == ZDLE {
                self.escape = true;
            } else if !self.push(b) {
                return SubpacketStatus::Invalid;
            }
        }
        SubpacketStatus::Pending
    }

    fn push(&mut self, b: u8) -> bool {
        if self.len >= SUBPACKET_BUFFER_SIZE {
            debug!("subpacket exceeds accumulator, discarding");
            return false;
        }
        self.buf[self.len] = b;
        self.len += 1;
        true
    }
}

impl Default for SubpacketParser {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
