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

//! Transfer session configuration.

use std::time::Duration;

/// Tunables for a transfer session. The defaults are sized for
/// LoRa-class links: long silences are normal, packets are small.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Inactivity deadline; no valid peer event for this long fails
    /// the session.
    pub timeout: Duration,
    /// Largest datagram payload the transport accepts.
    pub max_packet_size: usize,
    /// How often to log transfer progress; zero disables.
    pub progress_interval: Duration,
    /// First byte of every adapter frame, distinguishing transfer
    /// traffic from unrelated packets on the same port.
    pub packet_identifier: u8,
    /// Datagram port carrying adapter frames.
    pub data_port: u8,
    /// Datagram port carrying text commands.
    pub command_port: u8,
    /// Consecutive transport-send rejections tolerated before the
    /// session fails with a transport error.
    pub max_send_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            timeout: Duration::from_secs(30),
            max_packet_size: 230,
            progress_interval: Duration::from_secs(5),
            packet_identifier: 0xFF,
            data_port: b'Z',
            command_port: b'C',
            max_send_retries: 8,
        }
    }
}
