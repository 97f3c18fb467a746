use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, RwLock};

use crossbeam_channel::Sender;
use log::*;

use crate::inventory::Inventory;
use crate::protocol::StopHandle;
use crate::protocol::packets::{Color, ServerPacket};

/// Queued for a peer's writer thread.
pub enum Outbound {
    Packet(ServerPacket),
    /// Flushes what was queued before, then closes the connection
    Close
}

/// A peer connected to the server.
pub struct Client {
    id: u32,
    address: SocketAddr,
    username: RwLock<Option<String>>,
    inventory: Mutex<Inventory>,

    protocol: Sender<Outbound>,
    stop: StopHandle
}

impl Client {

    pub fn new(id: u32, address: SocketAddr, protocol: Sender<Outbound>, stop: StopHandle) -> Self {
        Self {
            id,
            address,
            username: RwLock::new(None),
            inventory: Mutex::new(Inventory::empty()),

            protocol,
            stop
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// `None` until the peer logged in.
    pub fn get_username(&self) -> Option<String> {
        self.username.read().unwrap().clone()
    }

    pub fn has_username(&self) -> bool {
        self.username.read().unwrap().is_some()
    }

    pub(crate) fn set_username(&self, username: String) {
        *self.username.write().unwrap() = Some(username);
    }

    pub fn inventory(&self) -> Inventory {
        self.inventory.lock().unwrap().clone()
    }

    pub fn set_inventory(&self, inventory: Inventory) {
        *self.inventory.lock().unwrap() = inventory;
    }

    pub fn send(&self, packet: ServerPacket) {
        // The writer is gone once the connection closed
        if self.protocol.send(Outbound::Packet(packet)).is_err() {
            trace!("Dropped packet for closed connection {}", self);
        }
    }

    pub fn send_chat(&self, message: &str, color: Color) {
        self.send(ServerPacket::Chat(message.to_owned(), color));
    }

    /// Tells the peer why and closes the connection after it.
    pub fn kick(&self, reason: &str, color: Color) {
        info!("Kicking {}: {}", self, reason);
        self.send_chat(reason, color);
        let _ = self.protocol.send(Outbound::Close);
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.username.read().unwrap().as_deref() {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address)
        }
    }
}
