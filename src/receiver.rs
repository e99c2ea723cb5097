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

//! Receiving half of the ZMODEM engine.
//!
//! The receiver opens the session with ZRINIT and then follows the
//! sender's headers: ZFILE carries a name/size subpacket, each ZDATA
//! header is followed by one CRC-protected data subpacket, ZEOF hands
//! control back and ZFIN closes the session. Every subpacket boundary
//! is detected and its CRC verified before a byte reaches the file.
//!
//! When the receiver sees a corrupt subpacket or a data offset ahead
//! of what it has committed, it answers with ZRPOS at its committed
//! offset, steering the sender back. Repositioning backwards is
//! honoured by truncating the write position; jumping forwards never
//! is.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::error::{Error, TickOutcome};
use crate::framing::{
    write_abort_sequence, write_hex_header, Header, HeaderScanner, SubpacketParser,
    SubpacketStatus,
};
use crate::protocol::{
    offset_to_flags, KEEPALIVE_INTERVAL, RETRY_INTERVAL, ZDATA, ZEOF, ZFILE, ZFIN, ZRINIT, ZRPOS,
    ZRQINIT,
};
use crate::stream::WireStream;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverState {
    /// Waiting for ZRQINIT/ZFILE/ZFIN; keepalive ZRINIT every 3 s.
    AwaitHeader,
    /// Accumulating the ZFILE name/size subpacket.
    ReadZfile,
    /// Waiting for the next ZDATA or ZEOF header.
    AwaitZdata,
    /// Accumulating one data subpacket.
    ReadZdata,
    Complete,
}

// ============================================================================
// Engine
// ============================================================================

pub struct ZmodemReceiver {
    file: File,
    filename: Option<String>,
    declared_size: u64,
    /// Bytes committed to the file; the only offset we acknowledge.
    bytes_written: u64,
    state: ReceiverState,
    scanner: HeaderScanner,
    subpacket: SubpacketParser,
    /// Set while consuming a subpacket whose offset we cannot accept.
    discard_current: bool,
    timeout: Duration,
    last_peer_event: Instant,
    last_emit: Option<Instant>,
    last_resync: Option<Instant>,
}

impl ZmodemReceiver {
    pub fn new(file: File, timeout: Duration, now: Instant) -> Self {
        ZmodemReceiver {
            file,
            filename: None,
            declared_size: 0,
            bytes_written: 0,
            state: ReceiverState::AwaitHeader,
            scanner: HeaderScanner::new(),
            subpacket: SubpacketParser::new(),
            discard_current: false,
            timeout,
            last_peer_event: now,
            last_emit: None,
            last_resync: None,
        }
    }

    /// Name announced by the sender, once the ZFILE info has arrived.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Size announced by the sender; 0 while unknown.
    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_written
    }

    /// Drive the state machine for one non-blocking slice of work.
    pub fn tick(&mut self, wire: &mut dyn WireStream, now: Instant) -> TickOutcome {
        if self.state == ReceiverState::Complete {
            return TickOutcome::Complete;
        }
        if now.duration_since(self.last_peer_event) > self.timeout {
            warn!("receiver timed out in {:?}", self.state);
            return TickOutcome::Failed(Error::Timeout);
        }

        // Session entry: invite the sender.
        if self.last_emit.is_none() {
            self.emit_zrinit(wire, now);
        }

        // Drain whatever the adapter holds. The read buffer is one
        // packet at most, so this loop is bounded per tick.
        loop {
            match self.state {
                ReceiverState::AwaitHeader | ReceiverState::AwaitZdata => {
                    match self.scanner.poll(wire) {
                        Some(header) => {
                            if let Err(e) = self.on_header(header, wire, now) {
                                return TickOutcome::Failed(e);
                            }
                            if self.state == ReceiverState::Complete {
                                return TickOutcome::Complete;
                            }
                        }
                        None => break,
                    }
                }
                ReceiverState::ReadZfile => match self.subpacket.poll(wire) {
                    SubpacketStatus::Complete { .. } => {
                        self.on_file_info(wire, now);
                    }
                    SubpacketStatus::Invalid => {
                        debug!("bad ZFILE subpacket, awaiting retransmit");
                        self.subpacket.reset();
                        self.state = ReceiverState::AwaitHeader;
                    }
                    SubpacketStatus::Pending => break,
                },
                ReceiverState::ReadZdata => match self.subpacket.poll(wire) {
                    SubpacketStatus::Complete { .. } => {
                        if let Err(e) = self.on_data_subpacket(now) {
                            return TickOutcome::Failed(e);
                        }
                    }
                    SubpacketStatus::Invalid => {
                        debug!(
                            offset = self.bytes_written,
                            "bad data subpacket, requesting reposition"
                        );
                        self.subpacket.reset();
                        self.state = ReceiverState::AwaitZdata;
                        self.request_resync(wire, now);
                    }
                    SubpacketStatus::Pending => break,
                },
                ReceiverState::Complete => break,
            }
        }

        // Poke a sender that has gone quiet before the file started.
        if self.state == ReceiverState::AwaitHeader {
            if let Some(t) = self.last_emit {
                if now.duration_since(t) >= KEEPALIVE_INTERVAL {
                    self.emit_zrinit(wire, now);
                }
            }
        }

        TickOutcome::Busy
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
        self.last_peer_event = now;

        match (self.state, header.kind) {
            (ReceiverState::AwaitHeader, ZRQINIT) => {
                self.emit_zrinit(wire, now);
            }
            (ReceiverState::AwaitHeader, ZFILE) | (ReceiverState::AwaitZdata, ZFILE) => {
                // Either the first announcement or a retransmit that
                // raced our ZRPOS; both get a fresh info parse.
                self.subpacket.reset();
                self.state = ReceiverState::ReadZfile;
            }
            (ReceiverState::AwaitHeader, ZEOF) => {
                // Retransmitted ZEOF after we already moved on.
                self.emit_zrinit(wire, now);
            }
            (ReceiverState::AwaitHeader, ZFIN) => {
                write_hex_header(wire, ZFIN, [0; 4]);
                wire.flush();
                self.file.flush()?;
                info!(bytes = self.bytes_written, "receive complete");
                self.state = ReceiverState::Complete;
            }
            (ReceiverState::AwaitZdata, ZDATA) => {
                let offset = header.offset();
                if offset == self.bytes_written {
                    self.discard_current = false;
                } else if offset < self.bytes_written {
                    info!(from = self.bytes_written, to = offset, "sender repositioned backwards");
                    self.file.seek(SeekFrom::Start(offset))?;
                    self.bytes_written = offset;
                    self.discard_current = false;
                } else {
                    debug!(
                        offset,
                        committed = self.bytes_written,
                        "data ahead of committed offset, discarding subpacket"
                    );
                    self.discard_current = true;
                    self.request_resync(wire, now);
                }
                self.subpacket.reset();
                self.state = ReceiverState::ReadZdata;
            }
            (ReceiverState::AwaitZdata, ZEOF) => {
                let offset = header.offset();
                if offset == self.bytes_written {
                    debug!(bytes = self.bytes_written, "end of file reached");
                    self.emit_zrinit(wire, now);
                    self.state = ReceiverState::AwaitHeader;
                } else {
                    debug!(
                        offset,
                        committed = self.bytes_written,
                        "ZEOF offset disagrees, requesting reposition"
                    );
                    self.request_resync(wire, now);
                }
            }
            (_, kind) => {
                trace!(kind, state = ?self.state, "discarding unexpected header");
            }
        }
        Ok(())
    }

    /// Parse `filename\0<ascii-decimal size>\0` from the completed
    /// ZFILE subpacket and acknowledge with our committed offset.
    fn on_file_info(&mut self, wire: &mut dyn WireStream, now: Instant) {
        let payload = self.subpacket.payload();
        let mut parts = payload.split(|&b| b == 0);
        let name = parts.next().unwrap_or(&[]);
        let size = parts.next().unwrap_or(&[]);

        self.filename = Some(String::from_utf8_lossy(name).into_owned());
        self.declared_size = std::str::from_utf8(size)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        info!(
            filename = self.filename.as_deref().unwrap_or(""),
            size = self.declared_size,
            "incoming file announced"
        );

        self.last_peer_event = now;
        self.subpacket.reset();
        write_hex_header(wire, ZRPOS, offset_to_flags(self.bytes_written));
        wire.flush();
        self.state = ReceiverState::AwaitZdata;
    }

    /// Commit one verified data subpacket to the file.
    fn on_data_subpacket(&mut self, now: Instant) -> Result<(), Error> {
        if !self.discard_current {
            let payload = self.subpacket.payload();
            self.file.write_all(payload)?;
            self.bytes_written += payload.len() as u64;
            // A verified subpacket boundary counts as peer progress.
            self.last_peer_event = now;
            trace!(committed = self.bytes_written, "subpacket written");
        }
        self.discard_current = false;
        self.subpacket.reset();
        self.state = ReceiverState::AwaitZdata;
        Ok(())
    }

    /// Ask the sender to continue from our committed offset, at most
    /// once per retry interval.
    fn request_resync(&mut self, wire: &mut dyn WireStream, now: Instant) {
        let due = self
            .last_resync
            .map_or(true, |t| now.duration_since(t) >= RETRY_INTERVAL);
        if due {
            write_hex_header(wire, ZRPOS, offset_to_flags(self.bytes_written));
            wire.flush();
            self.last_resync = Some(now);
        }
    }

    fn emit_zrinit(&mut self, wire: &mut dyn WireStream, now: Instant) {
        write_hex_header(wire, ZRINIT, [0; 4]);
        wire.flush();
        self.last_emit = Some(now);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{write_binary_header, write_data_subpacket};
    use crate::stream::TestWire;

    fn hex_frame(kind: u8, flags: [u8; 4]) -> Vec<u8> {
        let mut wire = TestWire::new();
        write_hex_header(&mut wire, kind, flags);
        wire.take_tx()
    }

    fn zfile_frame(name: &str, size: u64) -> Vec<u8> {
        let mut wire = TestWire::new();
        write_binary_header(&mut wire, ZFILE, [0; 4]);
        let mut info = Vec::new();
        info.extend_from_slice(name.as_bytes());
        info.push(0);
        info.extend_from_slice(size.to_string().as_bytes());
        info.push(0);
        write_data_subpacket(&mut wire, &info, true);
        wire.take_tx()
    }

    fn zdata_frame(offset: u64, payload: &[u8], last: bool) -> Vec<u8> {
        let mut wire = TestWire::new();
        write_binary_header(&mut wire, ZDATA, offset_to_flags(offset));
        write_data_subpacket(&mut wire, payload, last);
        wire.take_tx()
    }

    fn receiver_at(name: &str, timeout: Duration) -> (ZmodemReceiver, std::path::PathBuf, Instant)
    {
        let path = std::env::temp_dir().join(name);
        let file = File::create(&path).unwrap();
        let t0 = Instant::now();
        let receiver = ZmodemReceiver::new(file, timeout, t0);
        (receiver, path, t0)
    }

    #[test]
    fn test_receiver_full_transfer() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_full.txt", Duration::from_secs(30));
        let mut wire = TestWire::new();

        // Entry action: invite the sender.
        assert!(matches!(receiver.tick(&mut wire, t0), TickOutcome::Busy));
        assert_eq!(wire.take_tx(), hex_frame(ZRINIT, [0; 4]));

        // The sender announces itself; we repeat the invitation.
        wire.feed(&hex_frame(ZRQINIT, [0; 4]));
        receiver.tick(&mut wire, t0);
        assert_eq!(wire.take_tx(), hex_frame(ZRINIT, [0; 4]));

        // File announcement: parsed, acknowledged from offset 0.
        wire.feed(&zfile_frame("a.txt", 6));
        receiver.tick(&mut wire, t0);
        assert_eq!(wire.take_tx(), hex_frame(ZRPOS, offset_to_flags(0)));
        assert_eq!(receiver.filename(), Some("a.txt"));
        assert_eq!(receiver.declared_size(), 6);

        // Data arrives, then end of file.
        wire.feed(&zdata_frame(0, b"HELLO\n", true));
        receiver.tick(&mut wire, t0);
        assert!(wire.take_tx().is_empty());
        assert_eq!(receiver.bytes_transferred(), 6);

        wire.feed(&hex_frame(ZEOF, offset_to_flags(6)));
        receiver.tick(&mut wire, t0);
        assert_eq!(wire.take_tx(), hex_frame(ZRINIT, [0; 4]));

        wire.feed(&hex_frame(ZFIN, [0; 4]));
        assert!(matches!(
            receiver.tick(&mut wire, t0),
            TickOutcome::Complete
        ));
        assert_eq!(wire.take_tx(), hex_frame(ZFIN, [0; 4]));

        drop(receiver);
        assert_eq!(std::fs::read(&path).unwrap(), b"HELLO\n");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_file_info_split_across_ticks() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_split.txt", Duration::from_secs(30));
        let mut wire = TestWire::new();
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        let frame = zfile_frame("split.bin", 1234);
        for chunk in frame.chunks(5) {
            wire.feed(chunk);
            receiver.tick(&mut wire, t0);
        }
        assert_eq!(receiver.filename(), Some("split.bin"));
        assert_eq!(receiver.declared_size(), 1234);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_multi_chunk_and_rewind() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_rewind.bin", Duration::from_secs(30));
        let mut wire = TestWire::new();
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        wire.feed(&zfile_frame("r.bin", 12));
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        wire.feed(&zdata_frame(0, b"ABCDEF", false));
        receiver.tick(&mut wire, t0);
        assert_eq!(receiver.bytes_transferred(), 6);

        // The sender rewinds and resends overlapping data.
        wire.feed(&zdata_frame(3, b"defGHI", true));
        receiver.tick(&mut wire, t0);
        assert_eq!(receiver.bytes_transferred(), 9);

        drop(receiver);
        assert_eq!(std::fs::read(&path).unwrap(), b"ABCdefGHI");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_requests_reposition_on_corrupt_data() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_corrupt.bin", Duration::from_secs(30));
        let mut wire = TestWire::new();
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        wire.feed(&zfile_frame("c.bin", 8));
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        let mut frame = zdata_frame(0, b"GOODDATA", true);
        let n = frame.len();
        frame[n - 1] ^= 0xFF; // break the subpacket CRC
        wire.feed(&frame);
        receiver.tick(&mut wire, t0);

        // Nothing written, and a reposition request goes out.
        assert_eq!(receiver.bytes_transferred(), 0);
        assert_eq!(wire.take_tx(), hex_frame(ZRPOS, offset_to_flags(0)));

        // The clean retransmit is accepted.
        wire.feed(&zdata_frame(0, b"GOODDATA", true));
        receiver.tick(&mut wire, t0);
        assert_eq!(receiver.bytes_transferred(), 8);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_rejects_data_ahead_of_committed() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_ahead.bin", Duration::from_secs(30));
        let mut wire = TestWire::new();
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        wire.feed(&zfile_frame("gap.bin", 64));
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        // A chunk claiming offset 32 while nothing is committed yet.
        wire.feed(&zdata_frame(32, &[0xAB; 32], true));
        receiver.tick(&mut wire, t0);
        assert_eq!(receiver.bytes_transferred(), 0);
        assert_eq!(wire.take_tx(), hex_frame(ZRPOS, offset_to_flags(0)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_zeof_mismatch_requests_reposition() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_eofgap.bin", Duration::from_secs(30));
        let mut wire = TestWire::new();
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        wire.feed(&zfile_frame("e.bin", 16));
        receiver.tick(&mut wire, t0);
        wire.take_tx();

        wire.feed(&hex_frame(ZEOF, offset_to_flags(16)));
        receiver.tick(&mut wire, t0);
        // Not at 16 yet: no ZRINIT handoff, a ZRPOS instead.
        assert_eq!(wire.take_tx(), hex_frame(ZRPOS, offset_to_flags(0)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_keepalive() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_keepalive.txt", Duration::from_secs(30));
        let mut wire = TestWire::new();

        receiver.tick(&mut wire, t0);
        assert_eq!(wire.take_tx(), hex_frame(ZRINIT, [0; 4]));

        receiver.tick(&mut wire, t0 + Duration::from_secs(2));
        assert!(wire.take_tx().is_empty());

        receiver.tick(&mut wire, t0 + Duration::from_secs(4));
        assert_eq!(wire.take_tx(), hex_frame(ZRINIT, [0; 4]));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_receiver_times_out_without_sender() {
        let (mut receiver, path, t0) =
            receiver_at("zlink_recv_timeout.txt", Duration::from_secs(5));
        let mut wire = TestWire::new();

        assert!(matches!(receiver.tick(&mut wire, t0), TickOutcome::Busy));
        assert!(matches!(
            receiver.tick(&mut wire, t0 + Duration::from_secs(6)),
            TickOutcome::Failed(Error::Timeout)
        ));
        std::fs::remove_file(&path).ok();
    }
}
