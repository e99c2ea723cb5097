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

//! Error types for zlink.

use std::io;

use thiserror::Error;

/// Result type alias for zlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure of a transfer or a rejected request.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid command, unknown node, non-absolute path.
    #[error("invalid request: {0}")]
    Config(String),

    /// File cannot be opened, filesystem full, write failure.
    #[error("file error: {0}")]
    Resource(#[from] io::Error),

    /// Unexpected header or unrecoverable framing failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No valid peer event within the inactivity deadline.
    #[error("timed out waiting for peer")]
    Timeout,

    /// Persistent datagram send failure.
    #[error("transport send failure after {0} attempts")]
    Transport(u32),

    /// Caller-initiated abort.
    #[error("transfer aborted")]
    Aborted,
}

/// Result of driving a protocol engine for one `tick`.
#[derive(Debug)]
pub enum TickOutcome {
    /// Transfer still in progress.
    Busy,
    /// Transfer finished successfully.
    Complete,
    /// Transfer failed; the session must be torn down.
    Failed(Error),
}
