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

// Zlink demo node: the file-transfer engine wired to a UDP socket
// standing in for the mesh radio. Datagram framing on the socket is
// [port: u8][from_node: u32 BE][payload...]; peers are declared on the
// command line as <node-id>=<addr>.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use zlink::command::{error_reply, parse_command, Command};
use zlink::config::TransferConfig;
use zlink::session::{SessionState, TransferSession};
use zlink::transport::{NodeId, Transport};

#[derive(Parser)]
#[command(name = "zlink")]
#[command(about = "ZMODEM file transfer over mesh datagram networks", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// UDP address standing in for the mesh radio
    #[arg(short, long, default_value = "0.0.0.0:4403")]
    bind: String,

    /// This node's id (1-8 hex digits, e.g. !a1b2c3d4)
    #[arg(short, long)]
    node_id: String,

    /// Known peer, as <node-id>=<addr:port>; may be repeated
    #[arg(short, long = "peer", value_name = "ID=ADDR")]
    peers: Vec<String>,

    /// Inactivity timeout in seconds
    #[arg(long, default_value = "30", value_name = "SECS")]
    timeout: u64,

    /// Datagram MTU in bytes
    #[arg(long, default_value = "230")]
    mtu: usize,

    /// Progress report interval in seconds (0 disables)
    #[arg(long, default_value = "5", value_name = "SECS")]
    progress: u64,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file to a peer node
    Send {
        /// Destination node id
        #[arg(short, long)]
        to: String,
        /// File to send
        file: PathBuf,
    },
    /// Receive a file from the mesh
    Receive {
        /// Where to store the received file
        file: PathBuf,
    },
    /// Idle until SEND:/RECV: commands arrive on the command port
    Listen,
}

/// UDP stand-in for the mesh datagram service.
struct UdpMeshTransport {
    socket: UdpSocket,
    local: NodeId,
    peers: Rc<RefCell<HashMap<NodeId, SocketAddr>>>,
}

impl Transport for UdpMeshTransport {
    fn send_unicast(&mut self, to: NodeId, port: u8, payload: &[u8]) -> bool {
        let Some(addr) = self.peers.borrow().get(&to).copied() else {
            warn!(%to, "no address known for node");
            return false;
        };
        let mut datagram = Vec::with_capacity(5 + payload.len());
        datagram.push(port);
        datagram.extend_from_slice(&self.local.0.to_be_bytes());
        datagram.extend_from_slice(payload);
        match self.socket.send_to(&datagram, addr) {
            Ok(_) => true,
            Err(e) => {
                warn!(%to, %addr, "udp send failed: {e}");
                false
            }
        }
    }
}

fn parse_peer(entry: &str) -> Result<(NodeId, SocketAddr)> {
    let (id, addr) = entry
        .split_once('=')
        .ok_or_else(|| anyhow!("peer '{entry}' must be <node-id>=<addr:port>"))?;
    let node: NodeId = id.parse().map_err(|e| anyhow!("{e}"))?;
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid peer address '{addr}'"))?;
    Ok((node, addr))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(if cli.debug { "debug" } else { "info" })
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let local: NodeId = cli.node_id.parse().map_err(|e| anyhow!("{e}"))?;

    let peers = Rc::new(RefCell::new(HashMap::new()));
    for entry in &cli.peers {
        let (node, addr) = parse_peer(entry)?;
        peers.borrow_mut().insert(node, addr);
    }

    if !(16..=253).contains(&cli.mtu) {
        bail!("--mtu must be between 16 and 253 bytes");
    }

    let socket = UdpSocket::bind(&cli.bind)
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    socket.set_read_timeout(Some(Duration::from_millis(50)))?;
    info!(%local, bind = %cli.bind, "node up");

    let config = TransferConfig {
        timeout: Duration::from_secs(cli.timeout),
        max_packet_size: cli.mtu,
        progress_interval: Duration::from_secs(cli.progress),
        ..TransferConfig::default()
    };

    let session_transport = UdpMeshTransport {
        socket: socket.try_clone()?,
        local,
        peers: Rc::clone(&peers),
    };
    let mut reply_transport = UdpMeshTransport {
        socket: socket.try_clone()?,
        local,
        peers: Rc::clone(&peers),
    };
    let mut session = TransferSession::new(Box::new(session_transport), config.clone());

    let listen = matches!(cli.command, Commands::Listen);
    match cli.command {
        Commands::Send { to, file } => {
            let peer: NodeId = to.parse().map_err(|e| anyhow!("{e}"))?;
            if !peers.borrow().contains_key(&peer) {
                bail!("no --peer mapping for {peer}");
            }
            session
                .begin_send(&file, peer, Instant::now())
                .with_context(|| format!("cannot send {}", file.display()))?;
        }
        Commands::Receive { file } => {
            session
                .begin_receive(&file, Instant::now())
                .with_context(|| format!("cannot receive into {}", file.display()))?;
        }
        Commands::Listen => {
            info!("listening for transfer commands");
        }
    }

    // Host event loop: poll the socket, forward packets, tick.
    let mut buf = [0u8; 1024];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) if n >= 5 => {
                let port = buf[0];
                let from = NodeId(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]));
                // Learn the return address of whoever speaks to us.
                peers.borrow_mut().entry(from).or_insert(addr);
                let payload = &buf[5..n];

                if port == config.data_port {
                    session.push_packet(payload, from);
                } else if port == config.command_port {
                    handle_command(payload, from, &mut session, &mut reply_transport, &config);
                } else {
                    debug!(port, "datagram on unknown port");
                }
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e).context("udp receive failed"),
        }

        match session.tick(Instant::now()) {
            SessionState::Complete if !listen => {
                info!("done");
                return Ok(());
            }
            SessionState::Error if !listen => {
                bail!(
                    "transfer failed: {}",
                    session
                        .last_error()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown error".into())
                );
            }
            _ => {}
        }
    }
}

/// Act on a text command from the command port and reply to the issuer.
fn handle_command(
    payload: &[u8],
    from: NodeId,
    session: &mut TransferSession,
    reply: &mut UdpMeshTransport,
    config: &TransferConfig,
) {
    let Ok(text) = std::str::from_utf8(payload) else {
        debug!(%from, "ignoring non-text command payload");
        return;
    };
    let text = text.trim_end();
    info!(%from, command = text, "command received");

    let result = parse_command(text).and_then(|cmd| {
        let accepted = cmd.ok_reply();
        match cmd {
            Command::Send { peer, path } => {
                session.begin_send(path.as_ref(), peer, Instant::now())?
            }
            Command::Receive { path } => session.begin_receive(path.as_ref(), Instant::now())?,
        }
        Ok(accepted)
    });

    let reply_text = match result {
        Ok(ok) => ok,
        Err(e) => error_reply(&e),
    };
    reply.send_unicast(from, config.command_port, reply_text.as_bytes());
}
