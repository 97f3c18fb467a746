use std::fmt;
use std::ops::Add;

use num_traits::Num;

use crate::storage::sector::SECTOR_SIZE;

/// Block position in world space.
pub type Position = Coord<i32>;

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Default)]
pub struct Coord<T: Num + PartialOrd + Copy> {
    pub x: T,
    pub y: T,
    pub z: T
}

impl<T: Num + PartialOrd + Copy> Coord<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Coord { x, y, z }
    }
}

impl<T: Num + PartialOrd + Copy> Add for Coord<T> {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Coord {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z
        }
    }
}

impl<T: Num + PartialOrd + Copy + fmt::Display> fmt::Display for Coord<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Identifies a cubical `SECTOR_SIZE`³ region of the world.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Default)]
pub struct SectorCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32
}

impl SectorCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        SectorCoord { x, y, z }
    }

    /// Position of the block at relative (0, 0, 0) in this sector.
    #[inline]
    pub const fn origin(self) -> Position {
        Coord {
            x: self.x * SECTOR_SIZE,
            y: self.y * SECTOR_SIZE,
            z: self.z * SECTOR_SIZE
        }
    }
}

impl fmt::Display for SectorCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

/// Returns the sector owning `pos`, rounding towards negative infinity.
#[inline]
pub const fn sectorize(pos: Position) -> SectorCoord {
    SectorCoord {
        x: pos.x.div_euclid(SECTOR_SIZE),
        y: pos.y.div_euclid(SECTOR_SIZE),
        z: pos.z.div_euclid(SECTOR_SIZE)
    }
}
