use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::*;

use crate::blocks::{BlockId, BlockRegistry};
use crate::client::Client;
use crate::coord::{sectorize, Coord, Position, SectorCoord};
use crate::inventory::InventoryStore;
use crate::protocol::codec;
use crate::protocol::packets::{Color, ServerPacket, USER_LIST_SEPARATOR};
use crate::protocol::{thread, Protocol, StopHandle};
use crate::storage::region::{self, LevelInfo, StorageError};
use crate::storage::world::World;
use crate::terrain::TerrainGenerator;

pub const CHAT_COLOR: Color = [255, 255, 255, 255];
pub const NOTICE_COLOR: Color = [255, 255, 85, 255];
pub const SERVER_COLOR: Color = [255, 85, 255, 255];
pub const ERROR_COLOR: Color = [255, 85, 85, 255];

/// How long `shutdown` waits for connections to close
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

static CONNECTION_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn get_next_connection_id() -> u32 {
    CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub struct ServerConfig {
    pub max_players: usize,
    /// Refuse logins with a name that is already online
    pub unique_usernames: bool,
    /// Drop peers that send nothing for this long
    pub read_timeout: Option<Duration>,
    /// Where the world is saved, `None` keeps it in memory
    pub level_dir: Option<PathBuf>,
    pub seed: u64,
    /// Column the spawn position is picked in
    pub spawn_column: (i32, i32)
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_players: 20,
            unique_usernames: true,
            read_timeout: None,
            level_dir: None,
            seed: 0,
            spawn_column: (0, 0)
        }
    }
}

pub struct Server {
    /// Every mutation of the world and its broadcast happen under this lock.
    /// Never take it while holding `clients`.
    world: Mutex<World>,
    clients: RwLock<HashMap<u32, Arc<Client>>>,

    terrain: Box<dyn TerrainGenerator>,
    inventories: Box<dyn InventoryStore>,

    spawn: Mutex<Option<Position>>,
    running: AtomicBool,

    max_players: usize,
    unique_usernames: bool,
    read_timeout: Option<Duration>,
    level_dir: Option<PathBuf>,
    seed: u64,
    spawn_column: (i32, i32)
}

impl Server {

    pub fn new(config: ServerConfig, registry: Arc<BlockRegistry>,
            terrain: Box<dyn TerrainGenerator>, inventories: Box<dyn InventoryStore>) -> Server {
        Server {
            world: Mutex::new(World::new(registry)),
            clients: RwLock::new(HashMap::new()),

            terrain,
            inventories,

            spawn: Mutex::new(None),
            running: AtomicBool::new(true),

            max_players: config.max_players,
            unique_usernames: config.unique_usernames,
            read_timeout: config.read_timeout,
            level_dir: config.level_dir,
            seed: config.seed,
            spawn_column: config.spawn_column
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Runs `function` with the world locked.
    pub fn with_world<T>(&self, function: impl FnOnce(&mut World) -> T) -> T {
        function(&mut self.world.lock().unwrap())
    }

    /// Loads the saved world, if there is one.
    pub fn load_world(&self) -> Result<(), StorageError> {
        let dir = match &self.level_dir {
            Some(dir) => dir,
            None => return Ok(())
        };

        let mut world = self.world.lock().unwrap();
        if let Some(level) = region::load_world(&mut world, dir)? {
            if level.seed != self.seed {
                warn!("World was generated with seed {}, new sectors use seed {}", level.seed, self.seed);
            }

            *self.spawn.lock().unwrap() = level.spawn;
        }

        Ok(())
    }

    pub fn bind(address: SocketAddr) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(address)?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accepts connections until the server shuts down.
    pub fn start(svr: Arc<Server>, listener: TcpListener) {
        for connection in listener.incoming() {
            if !svr.running.load(Ordering::SeqCst) {
                break;
            }

            let stream = match connection {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            if let Err(e) = Server::accept(&svr, stream) {
                warn!("Failed to set up connection: {}", e);
            }
        }
    }

    /// Registers a peer and spawns its reader and writer threads.
    pub fn accept(svr: &Arc<Server>, stream: TcpStream) -> io::Result<Arc<Client>> {
        if !svr.is_running() {
            return Err(io::Error::new(io::ErrorKind::Other, "server is shutting down"));
        }

        let address = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(svr.read_timeout)?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = StopHandle::new(stream.try_clone()?);
        let client_id = get_next_connection_id();
        let client = Arc::new(Client::new(client_id, address, tx, stop.clone()));

        svr.clients.write().unwrap().insert(client_id, client.clone());
        debug!("Added client with id: {}", client_id);

        let name = format!("client {}", client_id);
        let threads = stream.try_clone()
            .and_then(|writer| thread::spawn_writer(name.clone(), writer, rx, stop))
            .and_then(|_| thread::spawn_receiver(name, Protocol::new(svr.clone(), client.clone()), stream));

        if let Err(e) = threads {
            client.stop();
            svr.remove_client(client_id);
            return Err(e);
        }

        info!("{} connected", address);
        Ok(client)
    }

    fn remove_client(&self, client_id: u32) -> Option<Arc<Client>> {
        let client = self.clients.write().unwrap().remove(&client_id);
        debug!("Removed client with id: {}", client_id);
        client
    }

    pub fn get_client(&self, client_id: u32) -> Option<Arc<Client>> {
        self.clients.read().unwrap().get(&client_id).cloned()
    }

    pub fn foreach_client(&self, function: &dyn Fn(&Arc<Client>)) {
        let clients = self.clients.read().unwrap();
        for client in clients.values() {
            function(client);
        }
    }

    /// Peers that logged in, oldest first.
    fn named_clients(&self) -> Vec<Arc<Client>> {
        let clients = self.clients.read().unwrap();
        let mut named: Vec<_> = clients.values().filter(|c| c.has_username()).cloned().collect();
        named.sort_by_key(|c| c.id());
        named
    }

    pub fn usernames(&self) -> Vec<String> {
        self.named_clients().iter().filter_map(|c| c.get_username()).collect()
    }

    pub fn online_players(&self) -> usize {
        self.clients.read().unwrap().values().filter(|c| c.has_username()).count()
    }

    /// Sends `packet` to every peer that logged in.
    pub fn broadcast(&self, packet: ServerPacket) {
        self.foreach_client(&|client: &Arc<Client>| {
            if client.has_username() {
                client.send(packet.clone());
            }
        });
    }

    /// Sends `packet` to every peer that logged in but `client_id`.
    pub fn broadcast_except(&self, client_id: u32, packet: ServerPacket) {
        self.foreach_client(&|client: &Arc<Client>| {
            if client.id() != client_id && client.has_username() {
                client.send(packet.clone());
            }
        });
    }

    /// Encodes a sector, generating it first if nobody asked for it before.
    fn sector_packet(&self, world: &mut World, coord: SectorCoord) -> ServerPacket {
        if !world.has_sector(coord) {
            self.terrain.generate_sector(world, coord);
        }

        if world.sector_is_empty(coord) {
            ServerPacket::BlankSector(coord)
        } else {
            ServerPacket::SectorData(codec::encode_sector(world, coord))
        }
    }

    pub fn send_sector(&self, client: &Client, coord: SectorCoord) {
        let mut world = self.world.lock().unwrap();
        client.send(self.sector_packet(&mut world, coord));
    }

    pub fn add_block(&self, client: &Client, pos: Position, id: BlockId) {
        let mut world = self.world.lock().unwrap();
        if !world.registry().contains(id) {
            warn!("{} tried to place unknown block {} at {}", client, id, pos);
            return;
        }

        world.add_block(pos, id, true);
        self.broadcast_except(client.id(), ServerPacket::AddBlock(pos, id));
    }

    pub fn remove_block(&self, client: &Client, pos: Position) {
        let mut world = self.world.lock().unwrap();
        if world.remove_block(pos, true).is_none() {
            debug!("{} removed the already empty position {}", client, pos);
            return;
        }

        self.broadcast_except(client.id(), ServerPacket::RemoveBlock(pos));
    }

    pub fn chat(&self, client: &Client, message: &str) {
        let username = match client.get_username() {
            Some(username) => username,
            None => {
                debug!("Ignoring chat from {} before login", client);
                return;
            }
        };

        let raw_msg = format!("<{}> {}", username, message);
        info!("{}", raw_msg);
        self.broadcast(ServerPacket::Chat(raw_msg, CHAT_COLOR));
    }

    /// Broadcasts a message from the console.
    pub fn say(&self, message: &str) {
        let raw_msg = format!("[Server] {}", message);
        info!("{}", raw_msg);
        self.broadcast(ServerPacket::Chat(raw_msg, SERVER_COLOR));
    }

    /// Where new players appear: on top of the terrain at the spawn column.
    pub fn spawn_position(&self) -> Position {
        let mut spawn = self.spawn.lock().unwrap();
        *spawn.get_or_insert_with(|| {
            let (x, z) = self.spawn_column;
            Coord::new(x, self.terrain.height_at(x, z) + 1, z)
        })
    }

    /// Handles a login. The peer receives its inventory, everybody the new user
    /// list, then the peer gets the sectors around the spawn before the spawn
    /// position itself.
    pub fn join(&self, client: &Client, username: String) {
        let username = username.trim().to_owned();
        if username.is_empty() || username.contains(USER_LIST_SEPARATOR) {
            client.kick("Invalid username.", ERROR_COLOR);
            return;
        }

        {
            // Held while checking and assigning so two logins can't race for a name
            let clients = self.clients.write().unwrap();
            if client.has_username() {
                warn!("{} tried to log in twice", client);
                return;
            }

            let named = clients.values().filter(|c| c.has_username());
            if named.clone().count() >= self.max_players {
                client.kick("The server is currently full.", ERROR_COLOR);
                return;
            }

            if self.unique_usernames && named.filter_map(|c| c.get_username()).any(|name| name == username) {
                client.kick(&format!("The name {} is already taken.", username), ERROR_COLOR);
                return;
            }

            client.set_username(username.clone());
        }

        info!("{} joined the game", client);

        let inventory = self.inventories.load(&username).unwrap_or_default();
        client.set_inventory(inventory.clone());
        client.send(ServerPacket::Inventory(inventory));

        self.broadcast(ServerPacket::UserList(self.usernames()));
        self.broadcast_except(client.id(), ServerPacket::Chat(format!("{} joined the game", username), NOTICE_COLOR));

        let spawn = self.spawn_position();
        let below = sectorize(spawn + Coord::new(0, -1, 0));
        let mut world = self.world.lock().unwrap();
        client.send(self.sector_packet(&mut world, sectorize(spawn)));
        if below != sectorize(spawn) {
            client.send(self.sector_packet(&mut world, below));
        }

        client.send(ServerPacket::Spawn(spawn));
    }

    /// Removes a peer whose connection ended.
    pub fn finish(&self, client: &Client) {
        if self.remove_client(client.id()).is_none() {
            return;
        }

        let username = match client.get_username() {
            Some(username) => username,
            None => {
                info!("{} disconnected", client);
                return;
            }
        };

        if let Err(e) = self.inventories.save(&username, &client.inventory()) {
            warn!("Failed to save the inventory of {}: {}", username, e);
        }

        info!("{} left the game", client);
        self.broadcast(ServerPacket::UserList(self.usernames()));
        self.broadcast(ServerPacket::Chat(format!("{} left the game", username), NOTICE_COLOR));
    }

    fn save_inventories(&self) {
        for client in self.named_clients() {
            if let Some(username) = client.get_username() {
                if let Err(e) = self.inventories.save(&username, &client.inventory()) {
                    warn!("Failed to save the inventory of {}: {}", username, e);
                }
            }
        }

        if let Err(e) = self.inventories.flush() {
            warn!("Failed to write inventories: {}", e);
        }
    }

    /// Saves the world and the inventories of everyone online.
    pub fn save(&self) -> Result<(), StorageError> {
        if let Some(dir) = &self.level_dir {
            let spawn = self.spawn_position();
            let world = self.world.lock().unwrap();
            region::save_world(&world, dir, &LevelInfo { seed: self.seed, spawn: Some(spawn) })?;
        }

        self.save_inventories();
        Ok(())
    }

    /// Closes every connection, waits for them to finish, then saves.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.running.store(false, Ordering::SeqCst);
        info!("Stopping server");

        self.foreach_client(&|client: &Arc<Client>| {
            client.kick("Server closed.", NOTICE_COLOR);
        });

        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
        while !self.clients.read().unwrap().is_empty() {
            if Instant::now() >= deadline {
                warn!("Closing {} connections that didn't finish in time", self.clients.read().unwrap().len());
                self.foreach_client(&|client: &Arc<Client>| client.stop());
                break;
            }

            std::thread::sleep(Duration::from_millis(10));
        }

        self.save()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
