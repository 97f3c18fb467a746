pub mod sector_map;

use crate::coord::{Coord, Position, SectorCoord};

/// Edge length of a sector in blocks
pub const SECTOR_SIZE: i32 = 8;
pub const SECTOR_AREA: i32 = SECTOR_SIZE * SECTOR_SIZE;
/// Number of block slots in one sector
pub const SECTOR_BLOCK_COUNT: usize = (SECTOR_AREA * SECTOR_SIZE) as usize;

pub struct Sector;

impl Sector {
    /// Slot index of a position relative to its sector origin,
    /// x outer, y middle, z inner.
    #[inline]
    pub const fn slot_index(rel_pos: Position) -> usize {
        (rel_pos.x * SECTOR_AREA + rel_pos.y * SECTOR_SIZE + rel_pos.z) as usize
    }

    #[inline]
    pub const fn rel_pos_of_slot(index: usize) -> Position {
        let index = index as i32;
        Coord {
            x: index / SECTOR_AREA,
            y: (index / SECTOR_SIZE) % SECTOR_SIZE,
            z: index % SECTOR_SIZE
        }
    }

    #[inline]
    pub const fn abs_to_rel(pos: Position, sector: SectorCoord) -> Position {
        let origin = sector.origin();
        Coord {
            x: pos.x - origin.x,
            y: pos.y - origin.y,
            z: pos.z - origin.z
        }
    }

    #[inline]
    pub const fn rel_to_abs(rel_pos: Position, sector: SectorCoord) -> Position {
        let origin = sector.origin();
        Coord {
            x: rel_pos.x + origin.x,
            y: rel_pos.y + origin.y,
            z: rel_pos.z + origin.z
        }
    }

    /// Every absolute position of `sector` in slot order.
    pub fn positions(sector: SectorCoord) -> impl Iterator<Item = Position> {
        (0..SECTOR_BLOCK_COUNT).map(move |i| Sector::rel_to_abs(Sector::rel_pos_of_slot(i), sector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_order_is_x_outer_z_inner() {
        assert_eq!(Sector::slot_index(Coord::new(0, 0, 1)), 1);
        assert_eq!(Sector::slot_index(Coord::new(0, 1, 0)), 8);
        assert_eq!(Sector::slot_index(Coord::new(1, 0, 0)), 64);
        assert_eq!(Sector::rel_pos_of_slot(SECTOR_BLOCK_COUNT - 1), Coord::new(7, 7, 7));
    }

    #[test]
    fn positions_cover_the_sector() {
        let sector = SectorCoord::new(-1, 2, 0);
        let positions: Vec<_> = Sector::positions(sector).collect();
        assert_eq!(positions.len(), SECTOR_BLOCK_COUNT);
        assert_eq!(positions[0], Coord::new(-8, 16, 0));
        assert_eq!(positions[SECTOR_BLOCK_COUNT - 1], Coord::new(-1, 23, 7));
        for (i, pos) in positions.into_iter().enumerate() {
            assert_eq!(Sector::slot_index(Sector::abs_to_rel(pos, sector)), i);
        }
    }
}
