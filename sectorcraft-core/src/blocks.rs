use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

use crate::coord::{Coord, Position};

/// Identifies a block type. `(0, 0)` is air.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Default, PartialOrd, Ord)]
pub struct BlockId {
    pub main: u16,
    pub sub: u8
}

impl BlockId {
    pub const AIR: BlockId = BlockId::new(0, 0);

    pub const fn new(main: u16, sub: u8) -> Self {
        Self { main, sub }
    }

    #[inline]
    pub const fn is_air(self) -> bool {
        self.main == 0 && self.sub == 0
    }

    /// Two byte form used in sector slots and block packets.
    /// Returns `None` for ids that don't fit.
    #[inline]
    pub fn to_wire(self) -> Option<[u8; 2]> {
        u8::try_from(self.main).ok().map(|main| [main, self.sub])
    }

    #[inline]
    pub const fn from_wire(bytes: [u8; 2]) -> Self {
        Self::new(bytes[0] as u16, bytes[1])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.main, self.sub)
    }
}

#[repr(i8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockFace {
    /// -Y
    YM = 0,
    /// +Y
    YP = 1,
    /// -Z
    ZM = 2,
    /// +Z
    ZP = 3,
    /// -X
    XM = 4,
    /// +X
    XP = 5,
}

impl BlockFace {
    pub const ALL: [BlockFace; 6] = [
        BlockFace::YM,
        BlockFace::YP,
        BlockFace::ZM,
        BlockFace::ZP,
        BlockFace::XM,
        BlockFace::XP
    ];

    pub const fn offset(self) -> Position {
        match self {
            BlockFace::YM => Coord::new(0, -1, 0),
            BlockFace::YP => Coord::new(0, 1, 0),
            BlockFace::ZM => Coord::new(0, 0, -1),
            BlockFace::ZP => Coord::new(0, 0, 1),
            BlockFace::XM => Coord::new(-1, 0, 0),
            BlockFace::XP => Coord::new(1, 0, 0)
        }
    }

    /// The six face-adjacent positions of `pos`.
    pub fn neighbors(pos: Position) -> impl Iterator<Item = Position> {
        BlockFace::ALL.into_iter().map(move |face| pos + face.offset())
    }
}

bitflags! {
    #[derive(Default)]
    pub struct BlockFlags: u8 {
        /// Neighbouring faces stay visible through this block.
        const TRANSPARENT = 0x01;

        /// Entities collide with this block.
        const SOLID = 0x02;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockType {
    pub id: BlockId,
    pub name: &'static str,
    pub flags: BlockFlags
}

impl BlockType {
    pub const fn new(id: BlockId, name: &'static str, flags: BlockFlags) -> Self {
        Self { id, name, flags }
    }

    #[inline]
    pub fn is_transparent(&self) -> bool {
        self.flags.contains(BlockFlags::TRANSPARENT)
    }
}

pub const STONE: BlockId = BlockId::new(1, 0);
pub const GRASS: BlockId = BlockId::new(2, 0);
pub const DIRT: BlockId = BlockId::new(3, 0);
pub const COBBLESTONE: BlockId = BlockId::new(4, 0);
pub const PLANKS: BlockId = BlockId::new(5, 0);
pub const BEDROCK: BlockId = BlockId::new(7, 0);
pub const WATER: BlockId = BlockId::new(8, 0);
pub const SAND: BlockId = BlockId::new(12, 0);
pub const WOOD: BlockId = BlockId::new(17, 0);
pub const LEAVES: BlockId = BlockId::new(18, 0);
pub const GLASS: BlockId = BlockId::new(20, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("block id {0} is reserved for air")]
    Air(BlockId),
    #[error("block id {0} does not fit in a sector slot")]
    OutOfRange(BlockId),
    #[error("block id {0} is already registered")]
    Duplicate(BlockId)
}

/// Directory of the block types known to a world.
///
/// Built once and shared read-only, ids missing from it are treated as air
/// wherever they come off the wire.
#[derive(Clone, Debug)]
pub struct BlockRegistry {
    types: HashMap<BlockId, BlockType>
}

impl BlockRegistry {
    pub fn empty() -> Self {
        Self {
            types: HashMap::new()
        }
    }

    pub fn register(&mut self, block_type: BlockType) -> Result<(), RegistryError> {
        let id = block_type.id;
        if id.is_air() {
            return Err(RegistryError::Air(id));
        }

        if id.to_wire().is_none() {
            return Err(RegistryError::OutOfRange(id));
        }

        if self.types.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }

        self.types.insert(id, block_type);
        Ok(())
    }

    pub fn get(&self, id: BlockId) -> Option<&BlockType> {
        self.types.get(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.types.contains_key(&id)
    }

    /// Unknown ids count as opaque.
    pub fn is_transparent(&self, id: BlockId) -> bool {
        self.get(id).map_or(false, BlockType::is_transparent)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        let solid = BlockFlags::SOLID;
        let see_through = BlockFlags::SOLID | BlockFlags::TRANSPARENT;
        let mut registry = BlockRegistry::empty();
        for block_type in [
            BlockType::new(STONE, "stone", solid),
            BlockType::new(GRASS, "grass", solid),
            BlockType::new(DIRT, "dirt", solid),
            BlockType::new(COBBLESTONE, "cobblestone", solid),
            BlockType::new(PLANKS, "planks", solid),
            BlockType::new(BEDROCK, "bedrock", solid),
            BlockType::new(WATER, "water", BlockFlags::TRANSPARENT),
            BlockType::new(SAND, "sand", solid),
            BlockType::new(WOOD, "wood", solid),
            BlockType::new(LEAVES, "leaves", see_through),
            BlockType::new(GLASS, "glass", see_through),
        ] {
            // The default palette has unique, in-range ids
            let _ = registry.register(block_type);
        }

        registry
    }
}
