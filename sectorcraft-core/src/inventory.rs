use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};

use crate::blocks::BlockId;

pub const INVENTORY_SLOTS: usize = 40;
const SLOT_LEN: usize = 4;
/// Size of the blob exchanged with peers
pub const INVENTORY_LEN: usize = INVENTORY_SLOTS * SLOT_LEN;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ItemStack {
    pub id: BlockId,
    pub amount: u8
}

impl ItemStack {
    pub fn is_empty(&self) -> bool {
        self.amount == 0 || self.id.is_air()
    }
}

/// Player inventory as the 160 byte blob peers exchange.
///
/// Each slot holds a little endian `u16` main id, the sub id (or durability)
/// and the stack size. The network layer treats the blob as opaque.
#[derive(Clone, PartialEq, Eq)]
pub struct Inventory {
    data: [u8; INVENTORY_LEN]
}

impl Inventory {
    pub const fn empty() -> Self {
        Self { data: [0; INVENTORY_LEN] }
    }

    /// `None` unless `bytes` is exactly `INVENTORY_LEN` long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let data = bytes.try_into().ok()?;
        Some(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// # Panics
    ///
    /// Panics if `index` is not below `INVENTORY_SLOTS`.
    pub fn slot(&self, index: usize) -> ItemStack {
        let raw = &self.data[index * SLOT_LEN..(index + 1) * SLOT_LEN];
        ItemStack {
            id: BlockId::new(LittleEndian::read_u16(raw), raw[2]),
            amount: raw[3]
        }
    }

    /// # Panics
    ///
    /// Panics if `index` is not below `INVENTORY_SLOTS`.
    pub fn set_slot(&mut self, index: usize, stack: ItemStack) {
        let raw = &mut self.data[index * SLOT_LEN..(index + 1) * SLOT_LEN];
        LittleEndian::write_u16(raw, stack.id.main);
        raw[2] = stack.id.sub;
        raw[3] = stack.amount;
    }

    pub fn is_empty(&self) -> bool {
        (0..INVENTORY_SLOTS).all(|i| self.slot(i).is_empty())
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Inventory::empty()
    }
}

impl fmt::Debug for Inventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries((0..INVENTORY_SLOTS).map(|i| self.slot(i)).filter(|s| !s.is_empty()))
            .finish()
    }
}

/// Persists inventories between sessions, keyed by username.
pub trait InventoryStore: Send + Sync {
    fn load(&self, username: &str) -> Option<Inventory>;
    fn save(&self, username: &str, inventory: &Inventory) -> io::Result<()>;

    /// Writes buffered state to its backing storage.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryInventoryStore {
    inventories: Mutex<HashMap<String, Inventory>>
}

impl MemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for MemoryInventoryStore {
    fn load(&self, username: &str) -> Option<Inventory> {
        self.inventories.lock().unwrap().get(username).cloned()
    }

    fn save(&self, username: &str, inventory: &Inventory) -> io::Result<()> {
        self.inventories.lock().unwrap().insert(username.to_owned(), inventory.clone());
        Ok(())
    }
}
