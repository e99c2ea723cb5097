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

//! Sending half of the ZMODEM engine.
//!
//! Driven by non-blocking `tick` calls from the session controller.
//! Each tick drains any peer headers, then performs at most one unit
//! of work for the current state: a control-header (re)emission or a
//! single file chunk. States that wait on the peer retransmit their
//! characteristic header once per second until answered.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::{Error, TickOutcome};
use crate::framing::{
    write_abort_sequence, write_binary_header, write_data_subpacket, write_hex_header, Header,
    HeaderScanner,
};
use crate::protocol::{
    offset_to_flags, DATA_CHUNK_SIZE, RETRY_INTERVAL, ZDATA, ZEOF, ZFILE, ZFIN, ZRINIT, ZRPOS,
    ZRQINIT,
};
use crate::stream::WireStream;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    /// Announce ourselves with ZRQINIT.
    SendZrqinit,
    /// ZRQINIT out, waiting for the receiver's ZRINIT.
    AwaitZrinit,
    /// Announce the file with ZFILE + info subpacket.
    SendZfile,
    /// ZFILE out, waiting for the receiver's starting ZRPOS.
    AwaitZrpos,
    /// Streaming ZDATA chunks.
    SendZdata,
    /// All data out, repeating ZEOF until acknowledged.
    SendZeof,
    /// ZFIN out, waiting for the receiver's ZFIN echo.
    AwaitZfin,
    Complete,
}

// ============================================================================
// Engine
// ============================================================================

pub struct ZmodemSender {
    file: File,
    filename: String,
    file_size: u64,
    /// Next file offset to transmit; rewound by ZRPOS.
    offset: u64,
    state: SenderState,
    scanner: HeaderScanner,
    timeout: Duration,
    last_peer_event: Instant,
    /// When the current state's header last went out; None forces an
    /// immediate emission on the next tick.
    last_emit: Option<Instant>,
}

impl ZmodemSender {
    pub fn new(
        file: File,
        filename: String,
        file_size: u64,
        timeout: Duration,
        now: Instant,
    ) -> Self {
        ZmodemSender {
            file,
            filename,
            file_size,
            offset: 0,
            state: SenderState::SendZrqinit,
            scanner: HeaderScanner::new(),
            timeout,
            last_peer_event: now,
            last_emit: None,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.offset
    }

    /// Drive the state machine for one non-blocking slice of work.
    pub fn tick(&mut self, wire: &mut dyn WireStream, now: Instant) -> TickOutcome {
        if self.state == SenderState::Complete {
            return TickOutcome::Complete;
        }
        if now.duration_since(self.last_peer_event) > self.timeout {
            warn!("sender timed out in {:?}", self.state);
            return TickOutcome::Failed(Error::Timeout);
        }

        while let Some(header) = self.scanner.poll(wire) {
            if let Err(e) = self.on_header(header, wire, now) {
                return TickOutcome::Failed(e);
            }
            if self.state == SenderState::Complete {
                return TickOutcome::Complete;
            }
        }

        let result = match self.state {
            SenderState::SendZrqinit => {
                self.emit_hex(wire, ZRQINIT, [0; 4], now);
                self.state = SenderState::AwaitZrinit;
                Ok(())
            }
            SenderState::AwaitZrinit => {
                if self.retry_due(now) {
                    self.emit_hex(wire, ZRQINIT, [0; 4], now);
                }
                Ok(())
            }
            SenderState::SendZfile => {
                self.emit_zfile(wire, now);
                self.state = SenderState::AwaitZrpos;
                Ok(())
            }
            SenderState::AwaitZrpos => {
                if self.retry_due(now) {
                    self.emit_zfile(wire, now);
                }
                Ok(())
            }
            SenderState::SendZdata => self.send_chunk(wire, now),
            SenderState::SendZeof => {
                if self.retry_due(now) {
                    self.emit_hex(wire, ZEOF, offset_to_flags(self.offset), now);
                }
                Ok(())
            }
            SenderState::AwaitZfin => {
                if self.retry_due(now) {
                    self.emit_hex(wire, ZFIN, [0; 4], now);
                }
                Ok(())
            }
            SenderState::Complete => Ok(()),
        };

        match result {
            Ok(()) => TickOutcome::Busy,
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Best-effort cancel notification to the peer.
    pub fn abort(&mut self, wire: &mut dyn WireStream) {
        write_abort_sequence(wire);
        wire.flush();
    }

    fn on_header(
        &mut self,
        header: Header,
        wire: &mut dyn WireStream,
        now: Instant,
    ) -> Result<(), Error> {
        // Any header that survived the CRC proves the peer is alive.
        self.last_peer_event = now;

        match (self.state, header.kind) {
            (SenderState::SendZrqinit | SenderState::AwaitZrinit, ZRINIT) => {
                debug!("receiver ready, announcing {}", self.filename);
                self.state = SenderState::SendZfile;
                self.last_emit = None;
            }
            (SenderState::AwaitZrpos, ZRPOS) => {
                let pos = header.offset();
                if pos > self.file_size {
                    return Err(Error::Protocol(format!(
                        "receiver requested offset {pos} beyond file size {}",
                        self.file_size
                    )));
                }
                debug!(offset = pos, "receiver accepted file");
                self.offset = pos;
                self.state = SenderState::SendZdata;
            }
            (SenderState::SendZdata | SenderState::SendZeof, ZRPOS) => {
                let pos = header.offset();
                if pos > self.offset {
                    return Err(Error::Protocol(format!(
                        "receiver requested forward resume to {pos} past {}",
                        self.offset
                    )));
                }
                info!(from = self.offset, to = pos, "rewinding to requested offset");
                self.offset = pos;
                self.state = SenderState::SendZdata;
            }
            (SenderState::SendZeof, ZRINIT) => {
                debug!("end of file acknowledged");
                self.emit_hex(wire, ZFIN, [0; 4], now);
                self.state = SenderState::AwaitZfin;
            }
            (SenderState::AwaitZfin, ZFIN) => {
                // Classical over-and-out; the receiver treats it as noise.
                wire.write_bytes(b"OO");
                wire.flush();
                info!(bytes = self.offset, "send complete");
                self.state = SenderState::Complete;
            }
            (_, kind) => {
                trace!(kind, state = ?self.state, "discarding unexpected header");
            }
        }
        Ok(())
    }

    /// Read and transmit one file chunk as a ZDATA frame.
    fn send_chunk(&mut self, wire: &mut dyn WireStream, now: Instant) -> Result<(), Error> {
        if self.offset >= self.file_size {
            self.state = SenderState::SendZeof;
            self.last_emit = None;
            return Ok(());
        }

        let remaining = self.file_size - self.offset;
        let n = remaining.min(DATA_CHUNK_SIZE as u64) as usize;
        let mut buf = [0u8; DATA_CHUNK_SIZE];
        // Seek every chunk: the cursor may have been moved by a rewind
        // or left behind by a back-pressured retry.
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.read_exact(&mut buf[..n])?;

        let last = self.offset + n as u64 == self.file_size;
        let ok = write_binary_header(wire, ZDATA, offset_to_flags(self.offset))
            && write_data_subpacket(wire, &buf[..n], last);
        wire.flush();

        if ok {
            trace!(offset = self.offset, len = n, last, "chunk sent");
            self.offset += n as u64;
            self.last_emit = Some(now);
            if last {
                self.state = SenderState::SendZeof;
                self.last_emit = None;
            }
        }
        // A rejected write leaves the chunk for the next tick.
        Ok(())
    }

    fn emit_zfile(&mut self, wire: &mut dyn WireStream, now: Instant) {
        let mut info = Vec::with_capacity(self.filename.len() + 22);
        info.extend_from_slice(self.filename.as_bytes());
        info.push(0);
        info.extend_from_slice(self.file_size.to_string().as_bytes());
        info.push(0);

        write_binary_header(wire, ZFILE, [0; 4]);
        write_data_subpacket(wire, &info, true);
        wire.flush();
        self.last_emit = Some(now);
    }

    fn emit_hex(&mut self, wire: &mut dyn WireStream, kind: u8, flags: [u8; 4], now: Instant) {
        write_hex_header(wire, kind, flags);
        wire.flush();
        self.last_emit = Some(now);
    }

    fn retry_due(&self, now: Instant) -> bool {
        self.last_emit
            .map_or(true, |t| now.duration_since(t) >= RETRY_INTERVAL)
    }
}

// ============================================================================
// Tests
// ============================================================================
