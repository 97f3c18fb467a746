use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::*;

use crate::blocks::{BlockFace, BlockId, BlockRegistry};
use crate::coord::{sectorize, Position, SectorCoord};
use crate::storage::sector::sector_map::SectorMap;

/// Receives visibility changes decided by the world.
/// The renderer owns whatever the callbacks allocate.
pub trait BlockView: Send {
    fn show_block(&mut self, pos: Position, id: BlockId);
    fn hide_block(&mut self, pos: Position);
}

/// View for worlds nobody looks at, like the server's.
pub struct NullView;

impl BlockView for NullView {
    fn show_block(&mut self, _pos: Position, _id: BlockId) {}
    fn hide_block(&mut self, _pos: Position) {}
}

#[derive(Copy, Clone, Debug)]
struct Block {
    id: BlockId,
    /// Cached exposure, `None` until computed or after a neighbour changed
    exposed: Option<bool>
}

impl Block {
    const fn new(id: BlockId) -> Self {
        Self { id, exposed: None }
    }
}

pub struct World {
    registry: Arc<BlockRegistry>,

    blocks: HashMap<Position, Block>,
    sectors: SectorMap,

    /// Positions the view currently shows
    shown: HashSet<Position>,
    /// Positions changed with `sync == false` since the last `sync_pending`
    dirty: HashSet<Position>,

    view: Box<dyn BlockView>
}

impl World {
    pub fn new(registry: Arc<BlockRegistry>) -> World {
        World::with_view(registry, Box::new(NullView))
    }

    pub fn with_view(registry: Arc<BlockRegistry>, view: Box<dyn BlockView>) -> World {
        World {
            registry,

            blocks: HashMap::new(),
            sectors: SectorMap::new(),

            shown: HashSet::new(),
            dirty: HashSet::new(),

            view
        }
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn get(&self, pos: Position) -> Option<BlockId> {
        self.blocks.get(&pos).map(|b| b.id)
    }

    pub fn contains(&self, pos: Position) -> bool {
        self.blocks.contains_key(&pos)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_shown(&self, pos: Position) -> bool {
        self.shown.contains(&pos)
    }

    /// Whether the sector was generated, loaded or streamed in.
    pub fn has_sector(&self, coord: SectorCoord) -> bool {
        self.sectors.contains_sector(coord)
    }

    pub fn sector_is_empty(&self, coord: SectorCoord) -> bool {
        self.sectors.is_sector_empty(coord)
    }

    pub fn sector_positions(&self, coord: SectorCoord) -> impl Iterator<Item = Position> + '_ {
        self.sectors.positions(coord)
    }

    pub fn sectors(&self) -> impl Iterator<Item = SectorCoord> + '_ {
        self.sectors.sectors()
    }

    /// Marks a sector as known even if nothing gets placed in it.
    pub fn touch_sector(&mut self, coord: SectorCoord) {
        self.sectors.touch_sector(coord);
    }

    /// Places a block, replacing whatever was at `pos`.
    ///
    /// With `sync` the exposure of the block and its neighbours is updated
    /// right away, otherwise the work is left for `sync_pending`.
    /// Returns the replaced block.
    pub fn add_block(&mut self, pos: Position, id: BlockId, sync: bool) -> Option<BlockId> {
        let previous = self.take(pos);
        if previous.is_some() && self.shown.remove(&pos) {
            self.view.hide_block(pos);
        }

        self.blocks.insert(pos, Block::new(id));
        self.sectors.insert(pos);

        if sync {
            self.refresh(pos);
            self.check_neighbors(pos);
        }
        else {
            self.dirty.insert(pos);
        }

        previous
    }

    /// Removes the block at `pos`. Removing an empty position does nothing.
    pub fn remove_block(&mut self, pos: Position, sync: bool) -> Option<BlockId> {
        let previous = self.take(pos)?;

        if sync {
            if self.shown.remove(&pos) {
                self.view.hide_block(pos);
            }

            self.check_neighbors(pos);
        }
        else {
            self.dirty.insert(pos);
        }

        Some(previous)
    }

    /// Drops the block from both the block map and the sector index.
    fn take(&mut self, pos: Position) -> Option<BlockId> {
        let block = self.blocks.remove(&pos)?;
        if !self.sectors.remove(pos) {
            warn!("Block {} at {} was missing from the index of sector {}, the sector index is stale",
                block.id, pos, sectorize(pos));
        }

        Some(block.id)
    }

    /// Returns whether any face of the block at `pos` is visible and caches the answer.
    pub fn is_exposed(&mut self, pos: Position) -> bool {
        match self.blocks.get(&pos) {
            None => return false,
            Some(Block { exposed: Some(exposed), .. }) => return *exposed,
            Some(_) => ()
        }

        let exposed = self.compute_exposed(pos);
        if let Some(block) = self.blocks.get_mut(&pos) {
            block.exposed = Some(exposed);
        }

        exposed
    }

    /// Same as `is_exposed` without touching the cache.
    pub fn exposed(&self, pos: Position) -> bool {
        match self.blocks.get(&pos) {
            None => false,
            Some(Block { exposed: Some(exposed), .. }) => *exposed,
            Some(_) => self.compute_exposed(pos)
        }
    }

    fn compute_exposed(&self, pos: Position) -> bool {
        BlockFace::neighbors(pos).any(|other| match self.blocks.get(&other) {
            Some(block) => self.registry.is_transparent(block.id),
            None => true
        })
    }

    /// Recomputes the exposure of the six neighbours of `pos` and shows or hides them.
    pub fn check_neighbors(&mut self, pos: Position) {
        for other in BlockFace::neighbors(pos) {
            match self.blocks.get_mut(&other) {
                Some(block) => block.exposed = None,
                None => continue
            }

            self.refresh(other);
        }
    }

    /// Brings the view of `pos` in line with its exposure.
    fn refresh(&mut self, pos: Position) {
        let id = match self.blocks.get(&pos) {
            Some(block) => block.id,
            None => {
                if self.shown.remove(&pos) {
                    self.view.hide_block(pos);
                }

                return;
            }
        };

        if self.is_exposed(pos) {
            if self.shown.insert(pos) {
                self.view.show_block(pos, id);
            }
        }
        else if self.shown.remove(&pos) {
            self.view.hide_block(pos);
        }
    }

    /// Number of positions changed without `sync` and not yet processed.
    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Processes every deferred change, visiting each affected position once.
    pub fn sync_pending(&mut self) {
        if self.dirty.is_empty() {
            return;
        }

        let changed: Vec<Position> = self.dirty.drain().collect();
        let count = changed.len();
        let mut affected = HashSet::with_capacity(changed.len() * 2);
        for pos in changed {
            // Shown blocks may have been replaced by another type
            if self.shown.remove(&pos) {
                self.view.hide_block(pos);
            }

            affected.insert(pos);
            affected.extend(BlockFace::neighbors(pos));
        }

        for pos in &affected {
            if let Some(block) = self.blocks.get_mut(pos) {
                block.exposed = None;
            }
        }

        for pos in affected {
            self.refresh(pos);
        }

        debug!("Synced {} pending positions, {} blocks shown", count, self.shown.len());
    }

    /// Replaces the contents of `coord` with streamed blocks, trusting the
    /// exposure the sender computed for them.
    pub fn load_sector<I>(&mut self, coord: SectorCoord, blocks: I)
        where I: IntoIterator<Item = (Position, BlockId, bool)> {

        // Neighbours in other sectors whose exposure may change
        let mut boundary = HashSet::new();
        let outside = move |pos: Position| BlockFace::neighbors(pos).filter(move |other| sectorize(*other) != coord);

        for pos in self.sectors.take_sector(coord) {
            self.blocks.remove(&pos);
            self.dirty.remove(&pos);
            if self.shown.remove(&pos) {
                self.view.hide_block(pos);
            }

            boundary.extend(outside(pos));
        }

        self.sectors.touch_sector(coord);

        for (pos, id, exposed) in blocks {
            if sectorize(pos) != coord {
                warn!("Dropping block at {} streamed as part of sector {}", pos, coord);
                continue;
            }

            self.blocks.insert(pos, Block { id, exposed: Some(exposed) });
            self.sectors.insert(pos);
            if exposed && self.shown.insert(pos) {
                self.view.show_block(pos, id);
            }

            boundary.extend(outside(pos));
        }

        for pos in &boundary {
            if let Some(block) = self.blocks.get_mut(pos) {
                block.exposed = None;
            }
        }

        for pos in boundary {
            if self.blocks.contains_key(&pos) {
                self.refresh(pos);
            }
        }
    }

    /// Records a sector the server reported as empty.
    pub fn mark_sector_blank(&mut self, coord: SectorCoord) {
        self.load_sector(coord, std::iter::empty());
    }

    /// Checks that the sector index holds exactly the positions of the block map.
    pub fn is_index_consistent(&self) -> bool {
        let indexed: usize = self.sectors.sectors().map(|s| self.sectors.positions(s).count()).sum();
        indexed == self.blocks.len() && self.blocks.keys().all(|pos| self.sectors.contains(*pos))
    }

    /// Rebuilds the sector index from the block map, keeping known empty sectors.
    pub fn rebuild_sector_index(&mut self) {
        let known: Vec<SectorCoord> = self.sectors.sectors().collect();
        self.sectors.clear();
        for coord in known {
            self.sectors.touch_sector(coord);
        }

        for pos in self.blocks.keys() {
            self.sectors.insert(*pos);
        }

        info!("Rebuilt sector index for {} blocks", self.blocks.len());
    }

    #[cfg(test)]
    pub(crate) fn drop_from_index(&mut self, pos: Position) {
        self.sectors.remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::blocks::{GLASS, STONE};
    use crate::coord::Coord;

    #[derive(Debug, PartialEq)]
    enum Event {
        Show(Position, BlockId),
        Hide(Position)
    }

    struct RecordingView(Arc<Mutex<Vec<Event>>>);

    impl BlockView for RecordingView {
        fn show_block(&mut self, pos: Position, id: BlockId) {
            self.0.lock().unwrap().push(Event::Show(pos, id));
        }

        fn hide_block(&mut self, pos: Position) {
            self.0.lock().unwrap().push(Event::Hide(pos));
        }
    }

    fn world() -> World {
        World::new(Arc::new(BlockRegistry::default()))
    }

    fn recording_world() -> (World, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let world = World::with_view(
            Arc::new(BlockRegistry::default()),
            Box::new(RecordingView(events.clone())));
        (world, events)
    }

    fn enclose(world: &mut World, pos: Position, id: BlockId) {
        for other in BlockFace::neighbors(pos) {
            world.add_block(other, id, true);
        }
    }

    #[test]
    fn add_twice_keeps_one_entry() {
        let mut world = world();
        let pos = Coord::new(3, 4, 5);
        assert_eq!(world.add_block(pos, STONE, true), None);
        assert_eq!(world.add_block(pos, GLASS, true), Some(STONE));
        assert_eq!(world.len(), 1);
        assert_eq!(world.sector_positions(sectorize(pos)).count(), 1);
        assert_eq!(world.get(pos), Some(GLASS));
        assert!(world.is_index_consistent());
    }

    #[test]
    fn remove_clears_both_maps() {
        let mut world = world();
        let pos = Coord::new(-1, -1, -1);
        world.add_block(pos, STONE, true);
        assert_eq!(world.remove_block(pos, true), Some(STONE));
        assert!(!world.contains(pos));
        assert_eq!(world.sector_positions(sectorize(pos)).count(), 0);
        assert!(world.has_sector(sectorize(pos)));
        assert!(world.is_index_consistent());
    }

    #[test]
    fn second_remove_is_a_no_op() {
        let mut world = world();
        let pos = Coord::new(0, 0, 0);
        world.add_block(pos, STONE, true);
        assert_eq!(world.remove_block(pos, true), Some(STONE));
        assert_eq!(world.remove_block(pos, true), None);
        assert!(world.is_index_consistent());
    }

    #[test]
    fn enclosed_block_is_hidden() {
        let mut world = world();
        let pos = Coord::new(1, 1, 1);
        world.add_block(pos, STONE, true);
        assert!(world.is_exposed(pos));
        enclose(&mut world, pos, STONE);
        assert!(!world.is_exposed(pos));
        assert!(!world.is_shown(pos));
    }

    #[test]
    fn transparent_neighbor_exposes() {
        let mut world = world();
        let pos = Coord::new(1, 1, 1);
        world.add_block(pos, STONE, true);
        enclose(&mut world, pos, STONE);
        world.add_block(pos + BlockFace::YP.offset(), GLASS, true);
        assert!(world.is_exposed(pos));
        assert!(world.exposed(pos));
        assert!(world.is_shown(pos));
    }

    #[test]
    fn removing_a_neighbor_reveals_the_block() {
        let (mut world, events) = recording_world();
        let pos = Coord::new(10, 10, 10);
        world.add_block(pos, STONE, true);
        enclose(&mut world, pos, STONE);
        events.lock().unwrap().clear();

        let above = pos + BlockFace::YP.offset();
        world.remove_block(above, true);
        let events = events.lock().unwrap();
        assert!(events.contains(&Event::Hide(above)));
        assert!(events.contains(&Event::Show(pos, STONE)));
    }

    #[test]
    fn deferred_changes_are_batched() {
        let (mut world, events) = recording_world();
        let pos = Coord::new(0, 0, 0);
        world.add_block(pos, STONE, false);
        for other in BlockFace::neighbors(pos) {
            world.add_block(other, STONE, false);
        }
        world.remove_block(pos + BlockFace::XP.offset(), false);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(world.pending(), 7);

        world.sync_pending();
        world.add_block(Coord::new(50, 50, 50), STONE, false);
        world.remove_block(Coord::new(50, 50, 50), false);
        world.sync_pending();

        assert_eq!(world.pending(), 0);
        assert!(world.is_shown(pos));
        assert!(!world.is_shown(pos + BlockFace::XP.offset()));
        assert!(!world.is_shown(Coord::new(50, 50, 50)));
        assert_eq!(world.len(), 6);
        assert!(world.is_index_consistent());
    }

    #[test]
    fn load_sector_replaces_stale_contents() {
        let (mut world, events) = recording_world();
        let coord = SectorCoord::new(0, 0, 0);
        world.add_block(Coord::new(1, 1, 1), STONE, true);
        world.load_sector(coord, vec![
            (Coord::new(2, 2, 2), GLASS, true),
            (Coord::new(3, 3, 3), STONE, false),
            (Coord::new(8, 0, 0), STONE, true),
        ]);

        assert!(!world.contains(Coord::new(1, 1, 1)));
        assert!(!world.contains(Coord::new(8, 0, 0)));
        assert!(world.is_shown(Coord::new(2, 2, 2)));
        assert!(!world.is_shown(Coord::new(3, 3, 3)));
        assert!(events.lock().unwrap().contains(&Event::Hide(Coord::new(1, 1, 1))));
        assert!(world.is_index_consistent());

        world.mark_sector_blank(coord);
        assert!(world.has_sector(coord));
        assert!(world.sector_is_empty(coord));
        assert!(world.is_empty());
    }

    #[test]
    fn load_sector_updates_neighbours_across_the_border() {
        let (mut world, events) = recording_world();
        let border = Coord::new(8, 1, 1);
        let inside = Coord::new(7, 1, 1);
        world.add_block(border, STONE, true);
        enclose(&mut world, border, STONE);
        assert!(!world.is_shown(border));

        world.mark_sector_blank(SectorCoord::new(0, 0, 0));
        assert!(!world.contains(inside));
        assert!(world.is_exposed(border));
        assert!(world.is_shown(border));
        assert!(events.lock().unwrap().contains(&Event::Show(border, STONE)));

        events.lock().unwrap().clear();
        world.load_sector(SectorCoord::new(0, 0, 0), vec![(inside, STONE, true)]);
        assert!(!world.is_exposed(border));
        assert!(!world.is_shown(border));
        assert!(events.lock().unwrap().contains(&Event::Hide(border)));
    }

    #[test]
    fn stale_index_warns_and_recovers() {
        let mut world = world();
        let pos = Coord::new(4, 4, 4);
        world.add_block(pos, STONE, true);
        world.add_block(Coord::new(4, 4, 5), STONE, true);
        world.drop_from_index(pos);
        assert!(!world.is_index_consistent());

        world.rebuild_sector_index();
        assert!(world.is_index_consistent());

        world.drop_from_index(pos);
        assert_eq!(world.remove_block(pos, true), Some(STONE));
        assert!(world.is_index_consistent());
    }
}
