use log::*;
use thiserror::Error;

use crate::blocks::{BlockId, BlockRegistry};
use crate::coord::{Position, SectorCoord};
use crate::storage::sector::{Sector, SECTOR_BLOCK_COUNT};
use crate::storage::world::World;

use super::wire::{WireReadExt, WireWriteExt};

/// Length of the sector position header
pub const SECTOR_HEADER_LEN: usize = 12;
/// Two bytes per slot
pub const SLOTS_LEN: usize = SECTOR_BLOCK_COUNT * 2;
/// One ASCII byte per slot
pub const EXPOSURE_LEN: usize = SECTOR_BLOCK_COUNT;
pub const SECTOR_BLOB_LEN: usize = SECTOR_HEADER_LEN + SLOTS_LEN + EXPOSURE_LEN;
pub const BLANK_SECTOR_LEN: usize = SECTOR_HEADER_LEN;

const EXPOSED: u8 = b'1';
const HIDDEN: u8 = b'0';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedSector {
    pub sector: SectorCoord,
    /// Occupied slots in slot order
    pub blocks: Vec<(Position, BlockId, bool)>
}

impl DecodedSector {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Serializes the 512 slots of `sector`, absent blocks as `\0\0`.
pub fn encode_slots(world: &World, sector: SectorCoord) -> Vec<u8> {
    let mut slots = Vec::with_capacity(SLOTS_LEN);
    for pos in Sector::positions(sector) {
        let bytes = world.get(pos).and_then(BlockId::to_wire).unwrap_or([0, 0]);
        slots.extend_from_slice(&bytes);
    }

    slots
}

/// Occupied slots of a slot block. Ids missing from `registry` are dropped.
pub fn decode_slots(slots: &[u8], sector: SectorCoord, registry: &BlockRegistry)
        -> Result<Vec<(usize, Position, BlockId)>, DecodeError> {
    if slots.len() != SLOTS_LEN {
        return Err(DecodeError::WrongLength { expected: SLOTS_LEN, actual: slots.len() });
    }

    let mut blocks = Vec::new();
    for (i, slot) in slots.chunks_exact(2).enumerate() {
        if *slot == [0, 0] {
            continue;
        }

        let id = BlockId::from_wire([slot[0], slot[1]]);
        if !registry.contains(id) {
            debug!("Unknown block id {} in sector {}, treating it as air", id, sector);
            continue;
        }

        blocks.push((i, Sector::rel_to_abs(Sector::rel_pos_of_slot(i), sector), id));
    }

    Ok(blocks)
}

/// Serializes `sector` into the `SECTOR_BLOB_LEN` bytes of a sector data packet.
pub fn encode_sector(world: &World, sector: SectorCoord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SECTOR_BLOB_LEN);
    // Writing into a Vec can't fail
    let _ = buf.write_sector_coord(sector);
    buf.extend(encode_slots(world, sector));
    buf.extend(Sector::positions(sector)
        .map(|pos| if world.exposed(pos) { EXPOSED } else { HIDDEN }));
    buf
}

pub fn decode_sector(bytes: &[u8], registry: &BlockRegistry) -> Result<DecodedSector, DecodeError> {
    if bytes.len() != SECTOR_BLOB_LEN {
        return Err(DecodeError::WrongLength { expected: SECTOR_BLOB_LEN, actual: bytes.len() });
    }

    let sector = decode_blank_sector(&bytes[..SECTOR_HEADER_LEN])?;
    let slots = &bytes[SECTOR_HEADER_LEN..SECTOR_HEADER_LEN + SLOTS_LEN];
    let exposure = &bytes[SECTOR_HEADER_LEN + SLOTS_LEN..];

    let blocks = decode_slots(slots, sector, registry)?
        .into_iter()
        .map(|(i, pos, id)| (pos, id, exposure[i] == EXPOSED))
        .collect();

    Ok(DecodedSector { sector, blocks })
}

pub fn encode_blank_sector(sector: SectorCoord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLANK_SECTOR_LEN);
    let _ = buf.write_sector_coord(sector);
    buf
}

pub fn decode_blank_sector(bytes: &[u8]) -> Result<SectorCoord, DecodeError> {
    if bytes.len() != BLANK_SECTOR_LEN {
        return Err(DecodeError::WrongLength { expected: BLANK_SECTOR_LEN, actual: bytes.len() });
    }

    let mut slice = bytes;
    slice.read_sector_coord()
        .map_err(|_| DecodeError::WrongLength { expected: BLANK_SECTOR_LEN, actual: bytes.len() })
}
