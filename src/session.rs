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

//! Transfer session lifecycle.
//!
//! One session per node. The controller owns the file handle (through
//! the engine), the stream adapter and the transport; the host event
//! loop forwards inbound data-port packets with [`TransferSession::push_packet`]
//! and calls [`TransferSession::tick`] at its own cadence (100 ms or
//! faster). A finished or failed session re-arms on the next
//! `begin_send` / `begin_receive`; only an active transfer rejects new
//! requests.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::config::TransferConfig;
use crate::error::{Error, Result, TickOutcome};
use crate::protocol::DATA_CHUNK_SIZE;
use crate::receiver::ZmodemReceiver;
use crate::sender::ZmodemSender;
use crate::stream::MeshStreamAdapter;
use crate::transport::{NodeId, Transport};

/// Public lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Receiving,
    Complete,
    Error,
}

enum Engine {
    Sender(ZmodemSender),
    Receiver(ZmodemReceiver),
}

pub struct TransferSession {
    state: SessionState,
    adapter: MeshStreamAdapter,
    engine: Option<Engine>,
    config: TransferConfig,
    started: Option<Instant>,
    last_progress: Option<Instant>,
    last_error: Option<Error>,
    // Counters survive engine teardown so callers can inspect the
    // finished transfer.
    bytes: u64,
    total: u64,
    filename: Option<String>,
}

impl TransferSession {
    pub fn new(transport: Box<dyn Transport>, config: TransferConfig) -> Self {
        let adapter = MeshStreamAdapter::new(
            transport,
            config.data_port,
            config.packet_identifier,
            config.max_packet_size,
        );
        TransferSession {
            state: SessionState::Idle,
            adapter,
            engine: None,
            config,
            started: None,
            last_progress: None,
            last_error: None,
            bytes: 0,
            total: 0,
            filename: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while a transfer is running.
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Sending | SessionState::Receiving)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes
    }

    /// Declared size of the file in flight; 0 while unknown.
    pub fn file_size(&self) -> u64 {
        self.total
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Why the last session ended, if it ended badly.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Start sending `path` to `peer`.
    pub fn begin_send(&mut self, path: &Path, peer: NodeId, now: Instant) -> Result<()> {
        self.check_idle()?;
        if !peer.is_unicast() {
            return Err(Error::Config(format!("peer {peer} is not a unicast node")));
        }

        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        // The name/size info must fit a single data subpacket.
        if filename.len() + 24 > DATA_CHUNK_SIZE {
            return Err(Error::Config(format!("file name '{filename}' too long")));
        }

        self.adapter.reset();
        self.adapter.set_peer(peer);
        self.arm(now);
        self.total = size;
        self.filename = Some(filename.clone());
        self.engine = Some(Engine::Sender(ZmodemSender::new(
            file,
            filename,
            size,
            self.config.timeout,
            now,
        )));
        self.state = SessionState::Sending;
        info!(%peer, path = %path.display(), size, "send started");
        Ok(())
    }

    /// Start receiving into `path` (created or truncated). The peer is
    /// learned from the first inbound data packet.
    pub fn begin_receive(&mut self, path: &Path, now: Instant) -> Result<()> {
        self.check_idle()?;

        let file = std::fs::File::create(path)?;

        self.adapter.reset();
        self.arm(now);
        self.engine = Some(Engine::Receiver(ZmodemReceiver::new(
            file,
            self.config.timeout,
            now,
        )));
        self.state = SessionState::Receiving;
        info!(path = %path.display(), "receive started, waiting for sender");
        Ok(())
    }

    /// Forward one inbound data-port packet to the stream adapter.
    pub fn push_packet(&mut self, payload: &[u8], from: NodeId) {
        if self.engine.is_some() {
            self.adapter.push_packet(payload, from);
        }
    }

    /// Drive the engine for one event-loop iteration.
    pub fn tick(&mut self, now: Instant) -> SessionState {
        let failures = self.adapter.consecutive_send_failures();
        if failures >= self.config.max_send_retries && self.engine.is_some() {
            self.finish(Err(Error::Transport(failures)));
            return self.state;
        }

        let Some(engine) = self.engine.as_mut() else {
            return self.state;
        };
        let outcome = match engine {
            Engine::Sender(sender) => sender.tick(&mut self.adapter, now),
            Engine::Receiver(receiver) => receiver.tick(&mut self.adapter, now),
        };
        self.refresh_counters();

        match outcome {
            TickOutcome::Busy => self.report_progress(now),
            TickOutcome::Complete => self.finish(Ok(())),
            TickOutcome::Failed(e) => self.finish(Err(e)),
        }
        self.state
    }

    /// Abort the running transfer, notifying the peer best-effort.
    pub fn abort(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            match &mut engine {
                Engine::Sender(sender) => sender.abort(&mut self.adapter),
                Engine::Receiver(receiver) => receiver.abort(&mut self.adapter),
            }
            info!("transfer aborted");
            self.state = SessionState::Error;
            self.last_error = Some(Error::Aborted);
        }
    }

    fn check_idle(&self) -> Result<()> {
        if self.is_active() {
            return Err(Error::Config(format!(
                "transfer already in progress ({:?})",
                self.state
            )));
        }
        Ok(())
    }

    fn arm(&mut self, now: Instant) {
        self.started = Some(now);
        self.last_progress = Some(now);
        self.last_error = None;
        self.bytes = 0;
        self.total = 0;
        self.filename = None;
    }

    fn refresh_counters(&mut self) {
        match &self.engine {
            Some(Engine::Sender(sender)) => {
                self.bytes = sender.bytes_transferred();
                self.total = sender.file_size();
            }
            Some(Engine::Receiver(receiver)) => {
                self.bytes = receiver.bytes_transferred();
                self.total = receiver.declared_size();
                if self.filename.is_none() {
                    self.filename = receiver.filename().map(str::to_string);
                }
            }
            None => {}
        }
    }

    /// Engine reached a terminal state; close the file by dropping it.
    fn finish(&mut self, result: Result<()>) {
        self.engine = None;
        match result {
            Ok(()) => {
                let elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();
                info!(
                    filename = self.filename.as_deref().unwrap_or(""),
                    bytes = self.bytes,
                    elapsed_s = elapsed.as_secs(),
                    "transfer complete"
                );
                self.state = SessionState::Complete;
            }
            Err(e) => {
                error!(
                    filename = self.filename.as_deref().unwrap_or(""),
                    bytes = self.bytes,
                    "transfer failed: {e}"
                );
                self.state = SessionState::Error;
                self.last_error = Some(e);
            }
        }
    }

    fn report_progress(&mut self, now: Instant) {
        if self.config.progress_interval == Duration::ZERO {
            return;
        }
        let due = self
            .last_progress
            .map_or(true, |t| now.duration_since(t) >= self.config.progress_interval);
        if !due {
            return;
        }
        self.last_progress = Some(now);
        if self.total > 0 {
            let pct = (self.bytes as f64 / self.total as f64 * 100.0).min(100.0);
            info!(
                "progress: {:.1}% ({}/{} bytes)",
                pct, self.bytes, self.total
            );
        } else {
            info!("progress: {} bytes", self.bytes);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const PEER: NodeId = NodeId(0x1234);

    fn session() -> (
        TransferSession,
        std::rc::Rc<std::cell::RefCell<crate::transport::mock::MockLog>>,
    ) {
        let (transport, log) = MockTransport::new();
        let session = TransferSession::new(Box::new(transport), TransferConfig::default());
        (session, log)
    }

    fn temp_file(name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_begin_send_rejected_while_active() {
        let (mut session, _log) = session();
        let now = Instant::now();
        let out = std::env::temp_dir().join("zlink_session_busy.out");
        session.begin_receive(&out, now).unwrap();
        assert_eq!(session.state(), SessionState::Receiving);

        let src = temp_file("zlink_session_busy.src", b"data");
        let err = session.begin_send(&src, PEER, now).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        // The running transfer is untouched.
        assert_eq!(session.state(), SessionState::Receiving);

        std::fs::remove_file(&out).ok();
        std::fs::remove_file(&src).ok();
    }

    #[test]
    fn test_begin_send_rejects_bad_peer_and_missing_file() {
        let (mut session, _log) = session();
        let now = Instant::now();

        let src = temp_file("zlink_session_peer.src", b"data");
        assert!(matches!(
            session.begin_send(&src, NodeId(0), now),
            Err(Error::Config(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        assert!(matches!(
            session.begin_send(std::path::Path::new("/no/such/zlink/file"), PEER, now),
            Err(Error::Resource(_))
        ));
        assert_eq!(session.state(), SessionState::Idle);

        std::fs::remove_file(&src).ok();
    }

    #[test]
    fn test_abort_then_rearm() {
        let (mut session, log) = session();
        let now = Instant::now();
        let src = temp_file("zlink_session_abort.src", b"data");

        session.begin_send(&src, PEER, now).unwrap();
        session.tick(now); // emits ZRQINIT
        session.abort();
        assert_eq!(session.state(), SessionState::Error);
        assert!(matches!(session.last_error(), Some(Error::Aborted)));

        // The cancel sequence went out to the peer.
        let sent = log.borrow().sent.clone();
        let last = sent.last().unwrap();
        assert!(last.payload[3..].windows(2).any(|w| w == [0x18, 0x10]));

        // A finished session accepts the next transfer.
        let out = std::env::temp_dir().join("zlink_session_abort.out");
        session.begin_receive(&out, now).unwrap();
        assert_eq!(session.state(), SessionState::Receiving);

        std::fs::remove_file(&src).ok();
        std::fs::remove_file(&out).ok();
    }

    #[test]
    fn test_transport_failures_escalate() {
        let (mut session, log) = session();
        let t0 = Instant::now();
        let src = temp_file("zlink_session_transport.src", b"data");
        session.begin_send(&src, PEER, t0).unwrap();
        log.borrow_mut().fail_next = u32::MAX;

        // Each retry interval costs one failed flush; eventually the
        // controller gives up.
        let mut state = session.state();
        for i in 0..20 {
            state = session.tick(t0 + Duration::from_millis(1100 * i));
            if state == SessionState::Error {
                break;
            }
        }
        assert_eq!(state, SessionState::Error);
        assert!(matches!(session.last_error(), Some(Error::Transport(_))));

        std::fs::remove_file(&src).ok();
    }

    #[test]
    fn test_receive_timeout_then_rearm() {
        let t0 = Instant::now();
        let config = TransferConfig {
            timeout: Duration::from_secs(5),
            ..TransferConfig::default()
        };
        let (transport, _log) = MockTransport::new();
        let mut session = TransferSession::new(Box::new(transport), config);

        let out = std::env::temp_dir().join("zlink_session_timeout.out");
        session.begin_receive(&out, t0).unwrap();
        session.tick(t0);
        assert_eq!(
            session.tick(t0 + Duration::from_secs(6)),
            SessionState::Error
        );
        assert!(matches!(session.last_error(), Some(Error::Timeout)));

        // Re-arming with the same path truncates and starts over.
        session
            .begin_receive(&out, t0 + Duration::from_secs(7))
            .unwrap();
        assert_eq!(session.state(), SessionState::Receiving);

        std::fs::remove_file(&out).ok();
    }
}
