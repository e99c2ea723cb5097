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

//! Text command surface on the command port.
//!
//! Two commands, case-sensitive ASCII:
//!
//! ```text
//! SEND:!<hex-node-id>:/<abs-path>
//! RECV:/<abs-path>
//! ```
//!
//! Every command gets a text reply: `OK: <action> <path>` or
//! `Error: <reason>`.

use crate::error::Error;
use crate::transport::NodeId;

/// A parsed transfer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send { peer: NodeId, path: String },
    Receive { path: String },
}

impl Command {
    /// Reply sent back on the command port when the command was
    /// accepted.
    pub fn ok_reply(&self) -> String {
        match self {
            Command::Send { path, .. } => format!("OK: SEND {path}"),
            Command::Receive { path } => format!("OK: RECV {path}"),
        }
    }
}

/// Reply for a rejected command or failed start.
pub fn error_reply(err: &Error) -> String {
    format!("Error: {err}")
}

/// Parse one command line.
pub fn parse_command(line: &str) -> Result<Command, Error> {
    if let Some(rest) = line.strip_prefix("SEND:") {
        let (node, path) = rest
            .split_once(':')
            .ok_or_else(|| Error::Config("SEND expects <node-id>:<path>".into()))?;
        let peer: NodeId = node.parse()?;
        Ok(Command::Send {
            peer,
            path: parse_path(path)?,
        })
    } else if let Some(path) = line.strip_prefix("RECV:") {
        Ok(Command::Receive {
            path: parse_path(path)?,
        })
    } else {
        Err(Error::Config(format!("unknown command '{}'", line.trim())))
    }
}

fn parse_path(path: &str) -> Result<String, Error> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(Error::Config(format!(
            "path '{path}' must be absolute (start with '/')"
        )));
    }
    Ok(path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cmd = parse_command("SEND:!1234:/data/a.txt").unwrap();
        assert_eq!(
            cmd,
            Command::Send {
                peer: NodeId(0x1234),
                path: "/data/a.txt".into()
            }
        );
        assert_eq!(cmd.ok_reply(), "OK: SEND /data/a.txt");
    }

    #[test]
    fn test_parse_send_without_bang() {
        let cmd = parse_command("SEND:a1b2c3d4:/f").unwrap();
        assert_eq!(
            cmd,
            Command::Send {
                peer: NodeId(0xA1B2C3D4),
                path: "/f".into()
            }
        );
    }

    #[test]
    fn test_parse_recv() {
        let cmd = parse_command("RECV:/out.txt").unwrap();
        assert_eq!(
            cmd,
            Command::Receive {
                path: "/out.txt".into()
            }
        );
        assert_eq!(cmd.ok_reply(), "OK: RECV /out.txt");
    }

    #[test]
    fn test_rejects_relative_paths() {
        assert!(parse_command("RECV:out.txt").is_err());
        assert!(parse_command("RECV:").is_err());
        assert!(parse_command("SEND:!1234:relative").is_err());
    }

    #[test]
    fn test_rejects_bad_node_ids() {
        assert!(parse_command("SEND:!0:/a").is_err());
        assert!(parse_command("SEND:!ffffffff:/a").is_err());
        assert!(parse_command("SEND:!zz:/a").is_err());
        assert!(parse_command("SEND:/a").is_err()); // missing node id
    }

    #[test]
    fn test_rejects_unknown_and_case_mismatch() {
        assert!(parse_command("PING").is_err());
        assert!(parse_command("send:!1234:/a").is_err());
        assert!(parse_command("recv:/a").is_err());
    }

    #[test]
    fn test_error_reply_format() {
        let err = parse_command("RECV:nope").unwrap_err();
        let reply = error_reply(&err);
        assert!(reply.starts_with("Error: "), "got '{reply}'");
    }
}
