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

//! Zlink: reliable file transfer over lossy mesh datagram networks.
//!
//! A simplified ZMODEM engine layered onto a small-MTU datagram
//! transport (LoRa-class: no ordering, no duplicate suppression). The
//! stream adapter turns datagrams into an ordered byte stream with
//! per-direction sequence numbers; the engine provides the resumable,
//! CRC-protected file transfer on top; the session controller glues
//! both to the host event loop.

pub mod command;
pub mod config;
pub mod crc;
pub mod error;
pub mod framing;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod stream;
pub mod transport;

pub use command::{error_reply, parse_command, Command};
pub use config::TransferConfig;
pub use error::{Error, Result};
pub use session::{SessionState, TransferSession};
pub use transport::{NodeId, Transport};
