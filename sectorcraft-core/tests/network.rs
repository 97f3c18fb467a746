use std::collections::HashSet;
use std::fs;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use sectorcraft_core::blocks::{BlockId, BlockRegistry, PLANKS, STONE};
use sectorcraft_core::coord::{sectorize, Coord, Position, SectorCoord};
use sectorcraft_core::inventory::MemoryInventoryStore;
use sectorcraft_core::protocol::framing::{write_frame, FrameReader};
use sectorcraft_core::protocol::packets::{ClientPacket, ServerPacket};
use sectorcraft_core::protocol::State;
use sectorcraft_core::remote::{ClientEvent, RemoteSession};
use sectorcraft_core::server::{Server, ServerConfig};
use sectorcraft_core::storage::region;
use sectorcraft_core::storage::world::World;
use sectorcraft_core::terrain::SimpleTerrainGenerator;

const TIMEOUT: Duration = Duration::from_secs(10);

fn registry() -> Arc<BlockRegistry> {
    Arc::new(BlockRegistry::default())
}

fn start_server() -> (Arc<Server>, SocketAddr) {
    start_server_with(ServerConfig::default())
}

fn start_server_with(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(Server::new(
        config,
        registry(),
        Box::new(SimpleTerrainGenerator::new(3)),
        Box::new(MemoryInventoryStore::new())));
    let listener = Server::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let address = listener.local_addr().unwrap();
    let svr = server.clone();
    thread::spawn(move || Server::start(svr, listener));
    (server, address)
}

struct Peer {
    session: RemoteSession,
    world: World
}

impl Peer {
    /// Connects and waits for the spawn position.
    fn join(address: SocketAddr, name: &str) -> Peer {
        let session = RemoteSession::connect(address, name, registry(), Some(TIMEOUT)).unwrap();
        let mut peer = Peer { session, world: World::new(registry()) };
        peer.events_until(|e| matches!(e, ClientEvent::Spawn(_)));
        assert_eq!(peer.session.state(), State::Streaming);
        peer
    }

    /// Collects events up to and including the first one matching `last`.
    fn events_until(&mut self, last: impl Fn(&ClientEvent) -> bool) -> Vec<ClientEvent> {
        let deadline = Instant::now() + TIMEOUT;
        let mut events = Vec::new();
        while Instant::now() < deadline {
            if let Some(event) = self.session.wait_packet(&mut self.world, Duration::from_millis(100)) {
                let done = last(&event);
                events.push(event);
                if done {
                    return events;
                }
            }
        }

        panic!("Timed out, got {:?}", events);
    }

    fn until_chat(&mut self, message: &str) -> Vec<ClientEvent> {
        self.events_until(|e| matches!(e, ClientEvent::Chat(m, _) if m == message))
    }

    /// Collects events until every message in `messages` arrived, in any order.
    fn until_chats(&mut self, messages: &[&str]) -> Vec<ClientEvent> {
        let deadline = Instant::now() + TIMEOUT;
        let mut missing: HashSet<&str> = messages.iter().copied().collect();
        let mut events = Vec::new();
        while !missing.is_empty() {
            assert!(Instant::now() < deadline, "Timed out, got {:?}", events);
            if let Some(event) = self.session.wait_packet(&mut self.world, Duration::from_millis(100)) {
                if let ClientEvent::Chat(message, _) = &event {
                    missing.remove(message.as_str());
                }

                events.push(event);
            }
        }

        events
    }
}

fn wait_for(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "Timed out");
        thread::sleep(Duration::from_millis(10));
    }
}

fn added(events: &[ClientEvent], pos: Position, id: BlockId) -> usize {
    events.iter().filter(|e| **e == ClientEvent::BlockAdded(pos, id)).count()
}

fn removed(events: &[ClientEvent], pos: Position) -> usize {
    events.iter().filter(|e| **e == ClientEvent::BlockRemoved(pos)).count()
}

#[test]
fn add_block_is_echoed_to_every_other_peer() {
    let (server, address) = start_server();
    let mut a = Peer::join(address, "alice");
    let mut b = Peer::join(address, "bob");
    let mut c = Peer::join(address, "carol");
    wait_for(|| server.online_players() == 3);

    let pos = Coord::new(1, 2, 3);
    a.session.add_block(&mut a.world, pos, PLANKS).unwrap();
    a.session.chat("done").unwrap();

    let events_a = a.until_chat("<alice> done");
    let events_b = b.until_chat("<alice> done");
    let events_c = c.until_chat("<alice> done");

    assert_eq!(added(&events_a, pos, PLANKS), 0);
    assert_eq!(added(&events_b, pos, PLANKS), 1);
    assert_eq!(added(&events_c, pos, PLANKS), 1);
    assert_eq!(b.world.get(pos), Some(PLANKS));
    assert_eq!(server.with_world(|world| world.get(pos)), Some(PLANKS));
}

#[test]
fn requested_sector_matches_the_server() {
    let (server, address) = start_server();
    let mut peer = Peer::join(address, "dave");

    let ground = SectorCoord::new(0, 0, 0);
    peer.session.request_sector(ground).unwrap();
    peer.events_until(|e| *e == ClientEvent::SectorLoaded(ground));

    let expected: HashSet<(Position, Option<BlockId>)> = server.with_world(|world| {
        world.sector_positions(ground).map(|pos| (pos, world.get(pos))).collect()
    });
    let actual: HashSet<(Position, Option<BlockId>)> = peer.world.sector_positions(ground)
        .map(|pos| (pos, peer.world.get(pos)))
        .collect();
    assert!(!expected.is_empty());
    assert_eq!(actual, expected);

    let sky = SectorCoord::new(0, 40, 0);
    peer.session.request_sector(sky).unwrap();
    peer.events_until(|e| *e == ClientEvent::SectorLoaded(sky));
    assert!(peer.world.has_sector(sky));
    assert!(peer.world.sector_is_empty(sky));
}

#[test]
fn concurrent_removals_succeed_once() {
    let (server, address) = start_server();
    let pos = Coord::new(100, 100, 100);
    server.with_world(|world| world.add_block(pos, STONE, true));

    let peers = [Peer::join(address, "erin"), Peer::join(address, "frank")];
    wait_for(|| server.online_players() == 2);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = peers.into_iter().map(|mut peer| {
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            peer.session.remove_block(&mut peer.world, pos).unwrap();
            let marker = format!("{} done", peer.session.username());
            peer.session.chat(&marker).unwrap();
            peer
        })
    }).collect();

    let mut echoes = 0;
    for handle in handles {
        let mut peer = handle.join().unwrap();
        let events = peer.until_chats(&["<erin> erin done", "<frank> frank done"]);
        echoes += removed(&events, pos);
    }

    assert_eq!(echoes, 1);
    server.with_world(|world| {
        assert!(!world.contains(pos));
        assert!(world.is_index_consistent());
    });
}

#[test]
fn duplicate_names_are_refused() {
    let (server, address) = start_server();
    let _first = Peer::join(address, "gina");

    let session = RemoteSession::connect(address, "gina", registry(), Some(TIMEOUT)).unwrap();
    let mut second = Peer { session, world: World::new(registry()) };
    let events = second.events_until(|e| matches!(e, ClientEvent::Disconnected { .. }));

    assert!(events.iter().any(|e| matches!(e, ClientEvent::Chat(m, _) if m.contains("already taken"))));
    assert_eq!(events.last(), Some(&ClientEvent::Disconnected { unexpected: true }));
    assert_eq!(second.session.state(), State::Closed);
    assert_eq!(server.usernames(), vec!["gina".to_owned()]);
}

#[test]
fn local_stop_is_an_expected_disconnect() {
    let (server, address) = start_server();
    let mut peer = Peer::join(address, "hank");
    let mut other = Peer::join(address, "ivy");

    peer.session.stop();
    let events = peer.events_until(|e| matches!(e, ClientEvent::Disconnected { .. }));
    assert_eq!(events.last(), Some(&ClientEvent::Disconnected { unexpected: false }));

    other.until_chat("hank left the game");
    wait_for(|| server.online_players() == 1);
    assert_eq!(server.usernames(), vec!["ivy".to_owned()]);
}

#[test]
fn spawn_sector_arrives_before_the_spawn_position() {
    let (_server, address) = start_server();
    let session = RemoteSession::connect(address, "jade", registry(), Some(TIMEOUT)).unwrap();
    let mut peer = Peer { session, world: World::new(registry()) };
    let events = peer.events_until(|e| matches!(e, ClientEvent::Spawn(_)));

    let spawn = match events.last() {
        Some(ClientEvent::Spawn(spawn)) => *spawn,
        other => panic!("Expected a spawn position, got {:?}", other)
    };

    let loaded = events.iter().position(|e| *e == ClientEvent::SectorLoaded(sectorize(spawn)));
    assert!(loaded.is_some(), "spawn sector missing from {:?}", events);
    assert!(loaded < Some(events.len() - 1));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::Inventory(_))));
    assert!(peer.world.has_sector(sectorize(spawn)));
}

#[test]
fn unknown_packets_keep_the_connection_open() {
    let (_server, address) = start_server();
    let mut stream = TcpStream::connect(address).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();

    stream.write_all(&write_frame(0x42, &[1, 2, 3])).unwrap();
    stream.write_all(&write_frame(5, &[9, 0, 0, 0])).unwrap();
    stream.write_all(&ClientPacket::Login("kim".to_owned()).encode()).unwrap();

    let mut frames = FrameReader::new(stream.try_clone().unwrap()).unwrap();
    let spawned = frames.by_ref()
        .map(|frame| ServerPacket::decode(&frame.unwrap()).unwrap())
        .any(|packet| matches!(packet, ServerPacket::Spawn(_)));
    assert!(spawned);

    stream.write_all(&ClientPacket::Chat("still here".to_owned()).encode()).unwrap();
    let echoed = frames
        .map(|frame| ServerPacket::decode(&frame.unwrap()).unwrap())
        .any(|packet| matches!(packet, ServerPacket::Chat(ref m, _) if m == "<kim> still here"));
    assert!(echoed);

    stream.shutdown(Shutdown::Both).unwrap();
}

#[test]
fn shutdown_closes_connections_before_saving() {
    let dir = std::env::temp_dir().join(format!("sectorcraft-shutdown-{}", std::process::id()));
    let config = ServerConfig { level_dir: Some(dir.clone()), ..ServerConfig::default() };
    let (server, address) = start_server_with(config);
    let mut peer = Peer::join(address, "lena");
    wait_for(|| server.online_players() == 1);

    let pos = Coord::new(-20, 90, 7);
    peer.session.add_block(&mut peer.world, pos, PLANKS).unwrap();
    peer.session.chat("placed").unwrap();
    peer.until_chat("<lena> placed");

    server.shutdown().unwrap();
    assert_eq!(server.online_players(), 0);
    assert!(!server.is_running());

    let events = peer.events_until(|e| matches!(e, ClientEvent::Disconnected { .. }));
    assert!(events.iter().any(|e| matches!(e, ClientEvent::Chat(m, _) if m == "Server closed.")));

    let mut saved = World::new(registry());
    assert!(region::load_world(&mut saved, &dir).unwrap().is_some());
    assert_eq!(saved.get(pos), Some(PLANKS));

    // The listener may already be gone, otherwise the connection is dropped
    if let Ok(mut late) = TcpStream::connect(address) {
        late.set_read_timeout(Some(TIMEOUT)).unwrap();
        let _ = late.write_all(&ClientPacket::Login("max".to_owned()).encode());
        let mut buf = [0u8; 1];
        assert!(matches!(late.read(&mut buf), Ok(0) | Err(_)));
    }

    fs::remove_dir_all(&dir).unwrap();
}
