//! On-disk world format.
//!
//! Sectors are grouped in regions of `REGION_SIZE`³ sectors, one zlib
//! compressed file per region named `rx.ry.rz.region`. A region file holds a
//! little endian `u64` mask of the sectors it knows about followed by one
//! slot block per sector, laid out like the slots of a sector data packet.
//! Seed and spawn live next to the regions in `level.json`.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::*;
use serde_json::{json, Value};
use thiserror::Error;

use crate::coord::{Coord, Position, SectorCoord};
use crate::protocol::codec::{self, SLOTS_LEN};
use crate::storage::world::World;

/// Edge length of a region in sectors
pub const REGION_SIZE: i32 = 4;
const SECTORS_PER_REGION: usize = (REGION_SIZE * REGION_SIZE * REGION_SIZE) as usize;
const MASK_LEN: usize = 8;
const REGION_LEN: usize = MASK_LEN + SECTORS_PER_REGION * SLOTS_LEN;

const LEVEL_FILE: &str = "level.json";
const REGION_EXTENSION: &str = "region";
const FORMAT_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid level file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt world data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String }
}

/// Everything about a saved world that isn't a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelInfo {
    pub seed: u64,
    pub spawn: Option<Position>
}

pub type RegionCoord = Coord<i32>;

pub fn sector_to_region(sector: SectorCoord) -> RegionCoord {
    Coord::new(
        sector.x.div_euclid(REGION_SIZE),
        sector.y.div_euclid(REGION_SIZE),
        sector.z.div_euclid(REGION_SIZE))
}

/// Index of the sector inside its region file.
pub fn sector_to_offset(sector: SectorCoord) -> usize {
    let (x, y, z) = (
        sector.x.rem_euclid(REGION_SIZE),
        sector.y.rem_euclid(REGION_SIZE),
        sector.z.rem_euclid(REGION_SIZE));
    (x * REGION_SIZE * REGION_SIZE + y * REGION_SIZE + z) as usize
}

fn offset_to_sector(region: RegionCoord, offset: usize) -> SectorCoord {
    let offset = offset as i32;
    SectorCoord::new(
        region.x * REGION_SIZE + offset / (REGION_SIZE * REGION_SIZE),
        region.y * REGION_SIZE + (offset / REGION_SIZE) % REGION_SIZE,
        region.z * REGION_SIZE + offset % REGION_SIZE)
}

pub fn region_file_name(region: RegionCoord) -> String {
    format!("{}.{}.{}.{}", region.x, region.y, region.z, REGION_EXTENSION)
}

fn parse_region_file_name(name: &str) -> Option<RegionCoord> {
    let mut parts = name.strip_suffix(REGION_EXTENSION)?.strip_suffix('.')?.split('.');
    let region = Coord::new(parts.next()?.parse().ok()?, parts.next()?.parse().ok()?, parts.next()?.parse().ok()?);
    match parts.next() {
        Some(_) => None,
        None => Some(region)
    }
}

/// Writes the file through a temporary so a crash never leaves half a file behind.
pub fn write_atomic(path: &Path, write: impl FnOnce(&mut File) -> io::Result<()>) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    write(&mut file)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Saves every known sector of `world` plus `level` into `dir`.
/// Returns the number of region files written.
pub fn save_world(world: &World, dir: &Path, level: &LevelInfo) -> Result<usize, StorageError> {
    fs::create_dir_all(dir)?;

    let mut regions: HashMap<RegionCoord, Vec<SectorCoord>> = HashMap::new();
    for sector in world.sectors() {
        regions.entry(sector_to_region(sector)).or_default().push(sector);
    }

    for (region, sectors) in &regions {
        let mut data = vec![0u8; REGION_LEN];
        let mut mask = 0u64;
        for &sector in sectors {
            let offset = sector_to_offset(sector);
            mask |= 1u64 << offset;
            let start = MASK_LEN + offset * SLOTS_LEN;
            data[start..start + SLOTS_LEN].copy_from_slice(&codec::encode_slots(world, sector));
        }

        LittleEndian::write_u64(&mut data[..MASK_LEN], mask);

        write_atomic(&dir.join(region_file_name(*region)), |file| {
            let mut encoder = ZlibEncoder::new(file, Compression::default());
            encoder.write_all(&data)?;
            encoder.finish()?;
            Ok(())
        })?;
    }

    let spawn = level.spawn.map(|pos| json!([pos.x, pos.y, pos.z]));
    let level_json = json!({
        "version": FORMAT_VERSION,
        "seed": level.seed,
        "spawn": spawn
    });
    write_atomic(&dir.join(LEVEL_FILE), |file| {
        serde_json::to_writer_pretty(&mut *file, &level_json).map_err(io::Error::from)
    })?;

    info!("Saved {} sectors in {} regions to {}", world.sectors().count(), regions.len(), dir.display());
    Ok(regions.len())
}

pub fn read_level(dir: &Path) -> Result<Option<LevelInfo>, StorageError> {
    let path = dir.join(LEVEL_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let value: Value = serde_json::from_reader(File::open(&path)?)?;
    let corrupt = |reason: &str| StorageError::Corrupt { path: path.clone(), reason: reason.to_owned() };

    match value["version"].as_u64() {
        Some(FORMAT_VERSION) => (),
        Some(v) => return Err(corrupt(&format!("unsupported version {}", v))),
        None => return Err(corrupt("missing version"))
    }

    let seed = value["seed"].as_u64().ok_or_else(|| corrupt("missing seed"))?;
    let spawn = match &value["spawn"] {
        Value::Null => None,
        Value::Array(coords) if coords.len() == 3 => {
            let mut xyz = [0i32; 3];
            for (dst, src) in xyz.iter_mut().zip(coords) {
                *dst = src.as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| corrupt("invalid spawn"))?;
            }

            Some(Coord::new(xyz[0], xyz[1], xyz[2]))
        }
        _ => return Err(corrupt("invalid spawn"))
    };

    Ok(Some(LevelInfo { seed, spawn }))
}

fn load_region(world: &mut World, region: RegionCoord, path: &Path) -> Result<usize, StorageError> {
    let mut data = Vec::with_capacity(REGION_LEN);
    ZlibDecoder::new(File::open(path)?).read_to_end(&mut data)?;
    if data.len() != REGION_LEN {
        return Err(StorageError::Corrupt {
            path: path.to_owned(),
            reason: format!("expected {} bytes, got {}", REGION_LEN, data.len())
        });
    }

    let registry = world.registry().clone();
    let mask = LittleEndian::read_u64(&data[..MASK_LEN]);
    let mut loaded = 0;
    for offset in (0..SECTORS_PER_REGION).filter(|i| mask & (1u64 << i) != 0) {
        let sector = offset_to_sector(region, offset);
        let start = MASK_LEN + offset * SLOTS_LEN;
        let blocks = codec::decode_slots(&data[start..start + SLOTS_LEN], sector, &registry)
            .map_err(|e| StorageError::Corrupt { path: path.to_owned(), reason: e.to_string() })?;

        world.touch_sector(sector);
        for (_, pos, id) in blocks {
            world.add_block(pos, id, false);
        }

        loaded += 1;
    }

    Ok(loaded)
}

/// Loads every region file in `dir` into `world`, returning the level info if
/// there is one. A missing directory is an empty world.
pub fn load_world(world: &mut World, dir: &Path) -> Result<Option<LevelInfo>, StorageError> {
    if !dir.exists() {
        return Ok(None);
    }

    let level = read_level(dir)?;

    let mut sectors = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let region = match path.file_name().and_then(|name| name.to_str()).and_then(parse_region_file_name) {
            Some(region) => region,
            None => continue
        };

        sectors += load_region(world, region, &path)?;
    }

    world.sync_pending();
    info!("Loaded {} sectors ({} blocks) from {}", sectors, world.len(), dir.display());
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::blocks::{BlockRegistry, GLASS, STONE};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos();
        std::env::temp_dir().join(format!("sectorcraft-{}-{}-{}", name, std::process::id(), nanos))
    }

    fn world() -> World {
        World::new(Arc::new(BlockRegistry::default()))
    }

    #[test]
    fn offsets_cover_the_region() {
        let region = Coord::new(-1, 0, 2);
        for offset in 0..SECTORS_PER_REGION {
            let sector = offset_to_sector(region, offset);
            assert_eq!(sector_to_region(sector), region);
            assert_eq!(sector_to_offset(sector), offset);
        }
    }

    #[test]
    fn region_file_names() {
        let region = Coord::new(-3, 0, 12);
        assert_eq!(region_file_name(region), "-3.0.12.region");
        assert_eq!(parse_region_file_name("-3.0.12.region"), Some(region));
        assert_eq!(parse_region_file_name("1.2.region"), None);
        assert_eq!(parse_region_file_name("1.2.3.4.region"), None);
        assert_eq!(parse_region_file_name("level.json"), None);
    }

    #[test]
    fn save_then_load() {
        let dir = temp_dir("save");
        let mut saved = world();
        saved.add_block(Coord::new(0, 0, 0), STONE, true);
        saved.add_block(Coord::new(0, 1, 0), GLASS, true);
        saved.add_block(Coord::new(-40, 3, 100), STONE, true);
        let blank = SectorCoord::new(9, 9, 9);
        saved.touch_sector(blank);

        let level = LevelInfo { seed: 1234, spawn: Some(Coord::new(0, 2, 0)) };
        assert_eq!(save_world(&saved, &dir, &level).unwrap(), 3);

        let mut loaded = world();
        assert_eq!(load_world(&mut loaded, &dir).unwrap(), Some(level));
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get(Coord::new(0, 1, 0)), Some(GLASS));
        assert_eq!(loaded.get(Coord::new(-40, 3, 100)), Some(STONE));
        assert!(loaded.has_sector(blank));
        assert!(loaded.sector_is_empty(blank));
        assert!(loaded.is_shown(Coord::new(0, 0, 0)));
        assert_eq!(loaded.pending(), 0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_an_empty_world() {
        let mut world = world();
        assert_eq!(load_world(&mut world, &temp_dir("missing")).unwrap(), None);
        assert!(world.is_empty());
    }

    #[test]
    fn truncated_region_is_corrupt() {
        let dir = temp_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let mut encoder = ZlibEncoder::new(File::create(dir.join("0.0.0.region")).unwrap(), Compression::default());
        encoder.write_all(&[0; 100]).unwrap();
        encoder.finish().unwrap();

        assert!(matches!(load_world(&mut world(), &dir), Err(StorageError::Corrupt { .. })));
        fs::remove_dir_all(&dir).unwrap();
    }
}
