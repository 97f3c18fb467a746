pub mod codec;
pub mod framing;
pub mod packets;
pub mod thread;
pub mod wire;

use std::io::{self, ErrorKind};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::*;
use num_derive::FromPrimitive;
use thiserror::Error;

use crate::client::Client;
use crate::server::Server;

use self::codec::DecodeError;
use self::framing::{Frame, FrameError, FrameReader};
use self::packets::ClientPacket;

#[repr(u8)]
#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
pub enum PacketType {
    /// Sector request (C→S) or sector data (S→C)
    Sector = 1,
    BlankSector = 2,
    AddBlock = 3,
    RemoveBlock = 4,
    Chat = 5,
    Inventory = 6,
    UserList = 7,
    /// Login (C→S) or spawn position (S→C)
    Login = 255
}

/// A frame that arrived intact but can't be turned into a packet.
/// The frame is skipped and the connection kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown packet: {0:#X}")]
    UnknownPacket(u8),
    #[error("packet {0:?} isn't expected in this direction")]
    UnexpectedPacket(PacketType),
    #[error("packet {kind:?} should be {expected} bytes long, got {actual}")]
    WrongLength { kind: PacketType, expected: usize, actual: usize },
    #[error("packet {0:?} holds invalid UTF-8")]
    InvalidUtf8(PacketType),
    #[error("truncated payload")]
    Truncated,
    #[error(transparent)]
    Decode(#[from] DecodeError)
}

impl From<io::Error> for ProtocolError {
    fn from(_: io::Error) -> Self {
        ProtocolError::Truncated
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Connecting,
    /// Login sent, waiting for the spawn position
    Authenticated,
    Streaming,
    Closed
}

/// Errors that mean the peer went away rather than that something broke.
pub fn is_disconnection_error(e: ErrorKind) -> bool {
    e == ErrorKind::NotConnected
        || e == ErrorKind::ConnectionAborted
        || e == ErrorKind::ConnectionReset
        || e == ErrorKind::ConnectionRefused
        || e == ErrorKind::BrokenPipe
        || e == ErrorKind::UnexpectedEof
}

/// Read timeouts surface as one of these depending on the platform.
pub fn is_timeout_error(e: ErrorKind) -> bool {
    e == ErrorKind::WouldBlock || e == ErrorKind::TimedOut
}

/// Shuts a connection down from any thread.
///
/// Stopping is idempotent and doesn't wait for the connection threads,
/// the shutdown unblocks their pending reads and writes.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>
}

struct StopInner {
    stopped: AtomicBool,
    stream: TcpStream
}

impl StopHandle {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                stream
            })
        }
    }

    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.inner.stream.shutdown(Shutdown::Both) {
            if !is_disconnection_error(e.kind()) {
                warn!("Error while shutting down connection: {}", e);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

/// How a receive loop ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// Stopped locally
    Expected,
    /// The peer closed, reset or stalled
    Unexpected
}

/// Classifies the end of a frame stream.
pub fn classify_end(result: Option<&FrameError>, stop: &StopHandle, peer: &str) -> Disconnect {
    if stop.is_stopped() {
        return Disconnect::Expected;
    }

    match result {
        None => debug!("{} closed the connection", peer),
        Some(FrameError::Io(e)) if is_disconnection_error(e.kind()) => debug!("{} disconnected: {}", peer, e),
        Some(FrameError::Io(e)) if is_timeout_error(e.kind()) => info!("{} timed out", peer),
        Some(e) => warn!("Dropping {}: {}", peer, e)
    }

    Disconnect::Unexpected
}

/// Receive side of a peer connected to the server.
///
/// Decodes the peer's frames and applies them through the server, which
/// serializes world mutations and broadcasts.
pub struct Protocol {
    server: Arc<Server>,
    client: Arc<Client>,
    state: State
}

impl Protocol {
    pub fn new(server: Arc<Server>, client: Arc<Client>) -> Protocol {
        Protocol {
            server,
            client,
            // No handshake is required before streaming
            state: State::Streaming
        }
    }

    /// Handles frames until the connection ends, then removes the peer.
    pub fn run<R: io::Read>(mut self, reader: FrameReader<R>) {
        let mut error = None;
        for frame in reader {
            match frame {
                Ok(frame) => self.handle_frame(&frame),
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        let peer = self.client.to_string();
        classify_end(error.as_ref(), self.client.stop_handle(), &peer);
        self.state = State::Closed;
        self.client.stop();
        self.server.finish(&self.client);
    }

    fn handle_frame(&mut self, frame: &Frame) {
        match ClientPacket::decode(frame) {
            Ok(packet) => self.handle_packet(packet),
            Err(ProtocolError::UnknownPacket(id)) => self.unknown_packet(id),
            Err(e) => warn!("Skipping packet from {}: {}", self.client, e)
        }
    }

    fn handle_packet(&mut self, packet: ClientPacket) {
        debug_assert_eq!(self.state, State::Streaming);

        match packet {
            ClientPacket::RequestSector(coord) => self.server.send_sector(&self.client, coord),
            ClientPacket::AddBlock(pos, id) => self.server.add_block(&self.client, pos, id),
            ClientPacket::RemoveBlock(pos) => self.server.remove_block(&self.client, pos),
            ClientPacket::Chat(message) => self.server.chat(&self.client, &message),
            ClientPacket::Inventory(inventory) => self.client.set_inventory(inventory),
            ClientPacket::Login(username) => self.server.join(&self.client, username)
        }
    }

    fn unknown_packet(&self, id: u8) {
        error!("Unknown packet: {:#X} from {}, state: {:?}", id, self.client, self.state);
    }
}
