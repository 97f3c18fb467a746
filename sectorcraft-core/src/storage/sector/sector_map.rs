use std::collections::{HashMap, HashSet};

use crate::coord::{sectorize, Position, SectorCoord};

/// Index of the occupied positions of every known sector.
///
/// A sector that is present with an empty set is known to be empty,
/// which is different from a sector that was never loaded.
#[derive(Default, Debug)]
pub struct SectorMap {
    sectors: HashMap<SectorCoord, HashSet<Position>>
}

impl SectorMap {
    pub fn new() -> Self {
        Self {
            sectors: HashMap::new()
        }
    }

    pub fn contains_sector(&self, coord: SectorCoord) -> bool {
        self.sectors.contains_key(&coord)
    }

    /// Marks the sector as known without adding positions to it.
    pub fn touch_sector(&mut self, coord: SectorCoord) {
        self.sectors.entry(coord).or_default();
    }

    /// Returns `false` if the position was already indexed.
    pub fn insert(&mut self, pos: Position) -> bool {
        self.sectors.entry(sectorize(pos)).or_default().insert(pos)
    }

    /// Returns `false` if the position wasn't indexed.
    pub fn remove(&mut self, pos: Position) -> bool {
        match self.sectors.get_mut(&sectorize(pos)) {
            Some(positions) => positions.remove(&pos),
            None => false
        }
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.sectors.get(&sectorize(pos))
            .map_or(false, |positions| positions.contains(&pos))
    }

    pub fn positions(&self, coord: SectorCoord) -> impl Iterator<Item = Position> + '_ {
        self.sectors.get(&coord).into_iter().flat_map(|positions| positions.iter().copied())
    }

    /// Unknown sectors count as empty.
    pub fn is_sector_empty(&self, coord: SectorCoord) -> bool {
        self.sectors.get(&coord).map_or(true, HashSet::is_empty)
    }

    /// Empties the sector, keeping it known, and returns what it held.
    pub fn take_sector(&mut self, coord: SectorCoord) -> Vec<Position> {
        match self.sectors.get_mut(&coord) {
            Some(positions) => positions.drain().collect(),
            None => Vec::new()
        }
    }

    pub fn sectors(&self) -> impl Iterator<Item = SectorCoord> + '_ {
        self.sectors.keys().copied()
    }

    pub fn clear(&mut self) {
        self.sectors.clear();
    }
}
