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

//! ZMODEM protocol constants

use std::time::Duration;

/// Pad character preceding every header
pub const ZPAD: u8 = 0x2A; // '*'

/// Data link escape - introduces escape sequences and subpacket terminators
pub const ZDLE: u8 = 0x18;

/// Binary header follows
pub const ZBIN: u8 = 0x41; // 'A'

/// Hex header follows
pub const ZHEX: u8 = 0x42; // 'B'

/// Subpacket terminator - more subpackets follow in this frame
pub const ZCRCG: u8 = 0x47;

/// Subpacket terminator - last subpacket, end of frame
pub const ZCRCE: u8 = 0x45;

/// Flow-control resume, appended after most hex headers
pub const XON: u8 = 0x11;

/// XOR mask applied to a byte when ZDLE-escaped
pub const ESCAPE_MASK: u8 = 0x40;

// Frame type codes. Only a subset is dispatched by this engine; the
// rest are defined so classical peers' headers can be named in logs.

/// Sender requests receiver initialization
pub const ZRQINIT: u8 = 0;
/// Receiver ready, sender may proceed
pub const ZRINIT: u8 = 1;
/// Sender initialization (unused)
pub const ZSINIT: u8 = 2;
/// Acknowledgement
pub const ZACK: u8 = 3;
/// File name and size announcement
pub const ZFILE: u8 = 4;
/// Skip this file (unused)
pub const ZSKIP: u8 = 5;
/// Negative acknowledgement (unused)
pub const ZNAK: u8 = 6;
/// Abort (unused; abort is signalled with the ZDLE/ZCAN sequence)
pub const ZABORT: u8 = 7;
/// End of session
pub const ZFIN: u8 = 8;
/// Resume transfer at the byte offset carried in the flags
pub const ZRPOS: u8 = 9;
/// Data subpacket follows, file offset in the flags
pub const ZDATA: u8 = 10;
/// End of file, final offset in the flags
pub const ZEOF: u8 = 11;
/// Fatal file read error (unused)
pub const ZFERR: u8 = 12;
/// Request file CRC (unused)
pub const ZCRC: u8 = 13;
/// Security challenge (unused)
pub const ZCHALLENGE: u8 = 14;
/// Request is complete (unused)
pub const ZCOMPL: u8 = 15;
/// Cancel
pub const ZCAN: u8 = 16;
/// Request free receiver storage (unused)
pub const ZFREECNT: u8 = 17;
/// Execute a command (unused)
pub const ZCOMMAND: u8 = 18;

/// File data chunk size per ZDATA frame
pub const DATA_CHUNK_SIZE: usize = 128;

/// Accumulator bound for incoming subpackets (file info and data)
pub const SUBPACKET_BUFFER_SIZE: usize = 256;

/// Retransmit interval for states waiting on peer action
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Receiver re-emits ZRINIT after this much idle time awaiting a header
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// Bytes that must be ZDLE-escaped on the wire: ZDLE itself plus the
/// control bytes that flow-controlled serial links historically ate.
pub fn needs_escape(b: u8) -> bool {
    matches!(b, ZDLE | 0x10 | 0x11 | 0x13 | 0x0D | 0x8D)
}

/// Little-endian flag encoding of a file offset.
pub fn offset_to_flags(offset: u64) -> [u8; 4] {
    (offset as u32).to_le_bytes()
}

/// File offset carried in a header's flag bytes.
pub fn flags_to_offset(flags: [u8; 4]) -> u64 {
    u32::from_le_bytes(flags) as u64
}
