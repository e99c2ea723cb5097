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

//! Mesh datagram transport abstraction.
//!
//! The radio itself is outside this crate: the host hands us something
//! that can send a bounded payload to a node, with no delivery,
//! ordering, or uniqueness guarantees. Inbound packets are pushed into
//! the session by the host event loop.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Reserved broadcast address; never a valid transfer peer.
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// 32-bit unicast identifier of a node on the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// True for addresses a transfer may target: anything except the
    /// unset address and the broadcast sentinel.
    pub fn is_unicast(self) -> bool {
        self.0 != 0 && self.0 != BROADCAST_ADDR
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    /// Parses `!1234abcd` or `1234abcd` (1-8 hex digits).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('!').unwrap_or(s);
        if digits.is_empty() || digits.len() > 8 {
            return Err(Error::Config(format!("invalid node id '{s}'")));
        }
        let raw = u32::from_str_radix(digits, 16)
            .map_err(|_| Error::Config(format!("invalid node id '{s}'")))?;
        let id = NodeId(raw);
        if !id.is_unicast() {
            return Err(Error::Config(format!("node id '{s}' is not unicast")));
        }
        Ok(id)
    }
}

/// Datagram send capability provided by the host.
///
/// `payload` never exceeds the configured MTU. A `false` return means
/// the packet was not accepted for transmission; the caller keeps its
/// bytes and retries later.
pub trait Transport {
    fn send_unicast(&mut self, to: NodeId, port: u8, payload: &[u8]) -> bool;
}

// ============================================================================
// Mock Transport for Testing
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::{NodeId, Transport};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    pub struct SentPacket {
        pub to: NodeId,
        pub port: u8,
        pub payload: Vec<u8>,
    }

    /// Shared view of everything a [`MockTransport`] sent, plus a
    /// countdown of sends to reject first.
    #[derive(Default)]
    pub struct MockLog {
        pub sent: Vec<SentPacket>,
        pub fail_next: u32,
    }

    /// Transport double that records packets into a shared log.
    pub struct MockTransport {
        pub log: Rc<RefCell<MockLog>>,
    }

    impl MockTransport {
        pub fn new() -> (Self, Rc<RefCell<MockLog>>) {
            let log = Rc::new(RefCell::new(MockLog::default()));
            (
                MockTransport {
                    log: Rc::clone(&log),
                },
                log,
            )
        }
    }

    impl Transport for MockTransport {
        fn send_unicast(&mut self, to: NodeId, port: u8, payload: &[u8]) -> bool {
            let mut log = self.log.borrow_mut();
            if log.fail_next > 0 {
                log.fail_next -= 1;
                return false;
            }
            log.sent.push(SentPacket {
                to,
                port,
                payload: payload.to_vec(),
            });
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_parse() {
        assert_eq!("!1234".parse::<NodeId>().unwrap(), NodeId(0x1234));
        assert_eq!("a1b2c3d4".parse::<NodeId>().unwrap(), NodeId(0xA1B2C3D4));
        assert_eq!("!00000001".parse::<NodeId>().unwrap(), NodeId(1));
    }

    #[test]
    fn test_node_id_rejects_non_unicast() {
        assert!("!0".parse::<NodeId>().is_err());
        assert!("!ffffffff".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_rejects_malformed() {
        assert!("".parse::<NodeId>().is_err());
        assert!("!".parse::<NodeId>().is_err());
        assert!("!123456789".parse::<NodeId>().is_err()); // 9 digits
        assert!("!12zz".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_display_roundtrip() {
        let id = NodeId(0xDEADBEEF);
        assert_eq!(id.to_string(), "!deadbeef");
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);
    }
}
