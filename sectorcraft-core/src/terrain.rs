use log::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::blocks::{BlockId, BEDROCK, DIRT, GRASS, SAND, STONE, WATER};
use crate::coord::SectorCoord;
use crate::storage::sector::Sector;
use crate::storage::world::World;

/// Fills sectors the first time anyone asks for them.
pub trait TerrainGenerator: Send + Sync {
    /// Populates `sector` in `world`. The sector must be known afterwards,
    /// even if nothing was placed in it.
    fn generate_sector(&self, world: &mut World, sector: SectorCoord);

    /// Y of the topmost generated block in the column.
    fn height_at(&self, x: i32, z: i32) -> i32;
}

/// Rolling hills of value noise over bedrock, with water filling the valleys.
pub struct SimpleTerrainGenerator {
    seed: u64
}

impl SimpleTerrainGenerator {
    pub const SEA_LEVEL: i32 = 14;
    const BASE_HEIGHT: i32 = 12;
    const AMPLITUDE: f64 = 12.0;
    /// Distance between noise lattice points
    const SCALE: i32 = 16;
    const DIRT_DEPTH: i32 = 3;

    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Random value in `[0, 1)` attached to a lattice point.
    /// Stable across platforms and toolchains, saved worlds depend on it.
    fn lattice(&self, gx: i32, gz: i32) -> f64 {
        let mixed = splitmix64(splitmix64(self.seed ^ gx as u32 as u64) ^ ((gz as u32 as u64) << 32));
        ChaCha8Rng::seed_from_u64(mixed).gen()
    }

    fn noise(&self, x: i32, z: i32) -> f64 {
        let (gx, gz) = (x.div_euclid(Self::SCALE), z.div_euclid(Self::SCALE));
        let fx = smooth(x.rem_euclid(Self::SCALE) as f64 / Self::SCALE as f64);
        let fz = smooth(z.rem_euclid(Self::SCALE) as f64 / Self::SCALE as f64);

        let top = lerp(self.lattice(gx, gz), self.lattice(gx + 1, gz), fx);
        let bottom = lerp(self.lattice(gx, gz + 1), self.lattice(gx + 1, gz + 1), fx);
        lerp(top, bottom, fz)
    }

    fn block_at(&self, y: i32, height: i32) -> Option<BlockId> {
        match y {
            y if y < 0 => None,
            0 => Some(BEDROCK),
            y if y <= height - Self::DIRT_DEPTH - 1 => Some(STONE),
            y if y < height => Some(DIRT),
            y if y == height && height < Self::SEA_LEVEL => Some(SAND),
            y if y == height => Some(GRASS),
            y if y <= Self::SEA_LEVEL => Some(WATER),
            _ => None
        }
    }
}

impl TerrainGenerator for SimpleTerrainGenerator {
    fn generate_sector(&self, world: &mut World, sector: SectorCoord) {
        world.touch_sector(sector);

        let mut placed = 0;
        for pos in Sector::positions(sector) {
            if let Some(id) = self.block_at(pos.y, self.height_at(pos.x, pos.z)) {
                world.add_block(pos, id, false);
                placed += 1;
            }
        }

        world.sync_pending();
        debug!("Generated sector {} with {} blocks", sector, placed);
    }

    fn height_at(&self, x: i32, z: i32) -> i32 {
        Self::BASE_HEIGHT + (self.noise(x, z) * Self::AMPLITUDE) as i32
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn smooth(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}
