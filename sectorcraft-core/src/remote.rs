use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::*;

use crate::blocks::{BlockId, BlockRegistry};
use crate::coord::{Position, SectorCoord};
use crate::inventory::Inventory;
use crate::protocol::codec::{self, DecodedSector};
use crate::protocol::framing::{Frame, FrameReader};
use crate::protocol::packets::{ClientPacket, Color, ServerPacket};
use crate::protocol::{classify_end, Disconnect, ProtocolError, State, StopHandle};
use crate::storage::world::World;

/// A server packet after the receive thread unpacked it.
#[derive(Debug)]
pub enum Incoming {
    Sector(DecodedSector),
    BlankSector(SectorCoord),
    AddBlock(Position, BlockId),
    RemoveBlock(Position),
    Chat(String, Color),
    Inventory(Inventory),
    UserList(Vec<String>),
    Spawn(Position),
    Disconnected(Disconnect)
}

/// What the main loop learns from applying a packet.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    SectorLoaded(SectorCoord),
    BlockAdded(Position, BlockId),
    BlockRemoved(Position),
    Chat(String, Color),
    Inventory(Inventory),
    UserList(Vec<String>),
    Spawn(Position),
    /// The connection is gone. Unexpected disconnects should send the
    /// player back to the main menu.
    Disconnected { unexpected: bool }
}

impl ClientEvent {
    pub const DISCONNECTED_MESSAGE: &'static str = "Disconnected from server";
}

/// Unpacks one frame, looking block ids up in `registry`.
/// `Ok(None)` means the frame carried nothing to apply.
pub fn preprocess(frame: &Frame, registry: &BlockRegistry) -> Result<Option<Incoming>, ProtocolError> {
    Ok(Some(match ServerPacket::decode(frame)? {
        ServerPacket::SectorData(blob) => Incoming::Sector(codec::decode_sector(&blob, registry)?),
        ServerPacket::BlankSector(coord) => Incoming::BlankSector(coord),
        ServerPacket::AddBlock(pos, id) => {
            if !registry.contains(id) {
                debug!("Ignoring unknown block {} at {}", id, pos);
                return Ok(None);
            }

            Incoming::AddBlock(pos, id)
        }
        ServerPacket::RemoveBlock(pos) => Incoming::RemoveBlock(pos),
        ServerPacket::Chat(message, color) => Incoming::Chat(message, color),
        ServerPacket::Inventory(inventory) => Incoming::Inventory(inventory),
        ServerPacket::UserList(names) => Incoming::UserList(names),
        ServerPacket::Spawn(pos) => Incoming::Spawn(pos)
    }))
}

fn receive_loop(reader: FrameReader<TcpStream>, registry: Arc<BlockRegistry>, queue: Sender<Incoming>, stop: StopHandle) {
    let mut error = None;
    for frame in reader {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                error = Some(e);
                break;
            }
        };

        match preprocess(&frame, &registry) {
            Ok(Some(incoming)) => {
                if queue.send(incoming).is_err() {
                    // Session dropped
                    return;
                }
            }
            Ok(None) => (),
            Err(ProtocolError::UnknownPacket(id)) => error!("Unknown packet: {:#X}", id),
            Err(e) => warn!("Skipping packet: {}", e)
        }
    }

    let disconnect = classify_end(error.as_ref(), &stop, "server");
    let _ = queue.send(Incoming::Disconnected(disconnect));
}

/// Client side of a connection to the server.
///
/// A receive thread reads and unpacks frames and queues them in arrival
/// order. The owner of the client world drains the queue with
/// `dequeue_packet` or `dequeue_all`, which are the only places the world is
/// changed by the network.
pub struct RemoteSession {
    stream: TcpStream,
    stop: StopHandle,
    queue: Receiver<Incoming>,
    state: State,
    username: String,
    receive_thread: Option<JoinHandle<()>>
}

impl RemoteSession {
    /// Connects, sends the login and starts receiving.
    pub fn connect<A: ToSocketAddrs>(address: A, username: &str, registry: Arc<BlockRegistry>,
            read_timeout: Option<Duration>) -> io::Result<RemoteSession> {
        let stream = TcpStream::connect(address)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(read_timeout)?;
        debug!("Connected to {}", stream.peer_addr()?);

        let stop = StopHandle::new(stream.try_clone()?);
        let reader = FrameReader::new(stream.try_clone()?).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let (tx, rx) = crossbeam_channel::unbounded();

        let mut session = RemoteSession {
            stream,
            stop: stop.clone(),
            queue: rx,
            state: State::Connecting,
            username: username.to_owned(),
            receive_thread: None
        };

        session.send(&ClientPacket::Login(username.to_owned()))?;
        session.state = State::Authenticated;

        session.receive_thread = Some(thread::Builder::new()
            .name("receive".to_owned())
            .spawn(move || receive_loop(reader, registry, tx, stop))?);

        Ok(session)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn send(&mut self, packet: &ClientPacket) -> io::Result<()> {
        self.stream.write_all(&packet.encode())
    }

    pub fn request_sector(&mut self, coord: SectorCoord) -> io::Result<()> {
        self.send(&ClientPacket::RequestSector(coord))
    }

    /// Places a block, showing it locally right away.
    pub fn add_block(&mut self, world: &mut World, pos: Position, id: BlockId) -> io::Result<()> {
        world.add_block(pos, id, true);
        self.send(&ClientPacket::AddBlock(pos, id))
    }

    pub fn remove_block(&mut self, world: &mut World, pos: Position) -> io::Result<()> {
        world.remove_block(pos, true);
        self.send(&ClientPacket::RemoveBlock(pos))
    }

    pub fn chat(&mut self, message: &str) -> io::Result<()> {
        self.send(&ClientPacket::Chat(message.to_owned()))
    }

    pub fn send_inventory(&mut self, inventory: &Inventory) -> io::Result<()> {
        self.send(&ClientPacket::Inventory(inventory.clone()))
    }

    /// Applies the oldest queued packet, exposure updates included.
    pub fn dequeue_packet(&mut self, world: &mut World) -> Option<ClientEvent> {
        let incoming = self.try_next()?;
        Some(self.apply(world, incoming, true))
    }

    /// Applies everything queued so far and recomputes exposure once at the end.
    pub fn dequeue_all(&mut self, world: &mut World) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Some(incoming) = self.try_next() {
            events.push(self.apply(world, incoming, false));
        }

        world.sync_pending();
        events
    }

    /// Blocks until a packet arrives, for callers without a main loop.
    pub fn wait_packet(&mut self, world: &mut World, timeout: Duration) -> Option<ClientEvent> {
        if self.state == State::Closed {
            return None;
        }

        let incoming = self.queue.recv_timeout(timeout).ok()?;
        Some(self.apply(world, incoming, true))
    }

    fn try_next(&mut self) -> Option<Incoming> {
        if self.state == State::Closed {
            return None;
        }

        match self.queue.try_recv() {
            Ok(incoming) => Some(incoming),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Incoming::Disconnected(Disconnect::Unexpected))
        }
    }

    fn apply(&mut self, world: &mut World, incoming: Incoming, sync: bool) -> ClientEvent {
        match incoming {
            Incoming::Sector(sector) => {
                let coord = sector.sector;
                world.load_sector(coord, sector.blocks);
                ClientEvent::SectorLoaded(coord)
            }
            Incoming::BlankSector(coord) => {
                world.mark_sector_blank(coord);
                ClientEvent::SectorLoaded(coord)
            }
            Incoming::AddBlock(pos, id) => {
                world.add_block(pos, id, sync);
                ClientEvent::BlockAdded(pos, id)
            }
            Incoming::RemoveBlock(pos) => {
                world.remove_block(pos, sync);
                ClientEvent::BlockRemoved(pos)
            }
            Incoming::Chat(message, color) => ClientEvent::Chat(message, color),
            Incoming::Inventory(inventory) => ClientEvent::Inventory(inventory),
            Incoming::UserList(names) => ClientEvent::UserList(names),
            Incoming::Spawn(pos) => {
                self.state = State::Streaming;
                ClientEvent::Spawn(pos)
            }
            Incoming::Disconnected(disconnect) => {
                self.state = State::Closed;
                let unexpected = disconnect == Disconnect::Unexpected;
                if unexpected {
                    warn!("{}", ClientEvent::DISCONNECTED_MESSAGE);
                }

                ClientEvent::Disconnected { unexpected }
            }
        }
    }

    /// Closes the connection without waiting for the receive thread.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stops and waits for the receive thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::STONE;
    use crate::coord::Coord;

    fn registry() -> BlockRegistry {
        BlockRegistry::default()
    }

    #[test]
    fn unknown_add_block_ids_are_dropped() {
        let frame = Frame::new(3, vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 250, 0]);
        assert!(preprocess(&frame, &registry()).unwrap().is_none());

        let frame = Frame::new(3, vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 1, 0]);
        assert!(matches!(
            preprocess(&frame, &registry()).unwrap(),
            Some(Incoming::AddBlock(pos, STONE)) if pos == Coord::new(1, 2, 3)));
    }

    #[test]
    fn bad_sector_blobs_are_errors() {
        let frame = Frame::new(1, vec![0; 12]);
        assert!(preprocess(&frame, &registry()).is_err());
    }
}
