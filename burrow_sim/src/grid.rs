// Grid query layer: cached voxel lookups over the `VoxelWorld`.
//
// Every other module reads terrain through `Grid`, never through the raw
// world. Two caches sit in front of the world:
// - `cells`: per-coordinate `CellInfo` (material, solidity, breakability).
// - `walkable`: per-(coordinate, body height) standability verdicts, which
//   cost three or more raw lookups each and are hammered by A*.
//
// Both caches are short-lived. `begin_tick()` flushes them once the tick has
// advanced `cache_ttl_ticks` past the last flush, and `break_cell()` drops
// every cached entry the mutation could affect before returning. Interior
// mutability (`RefCell`) lets read-only queries fill the cache through `&self`,
// so A* and the walkability test can share one `&Grid`.
//
// See also: `world.rs` for the dense storage, `carving.rs` for the only code
// path that mutates terrain during a run.
//
// **Critical constraint: determinism.** The caches are never iterated; they
// only memoize pure functions of world state, so hits and misses cannot
// change results.

use crate::error::CarveError;
use crate::types::{Vec3, VoxelCoord, VoxelType};
use crate::world::{LineObstruction, VoxelWorld};
use rustc_hash::FxHashMap;
use std::cell::RefCell;

/// Everything the engine asks about a single cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CellInfo {
    pub voxel: VoxelType,
    pub solid: bool,
    pub breakable: bool,
}

impl CellInfo {
    fn of(voxel: VoxelType) -> Self {
        Self {
            voxel,
            solid: voxel.is_solid(),
            breakable: voxel.is_breakable(),
        }
    }
}

/// Cached view of the voxel world.
#[derive(Debug, Default)]
pub struct Grid {
    world: VoxelWorld,
    cells: RefCell<FxHashMap<VoxelCoord, CellInfo>>,
    walkable: RefCell<FxHashMap<(VoxelCoord, u8), bool>>,
    cache_tick: u64,
    cache_ttl_ticks: u64,
}

impl Grid {
    pub fn new(world: VoxelWorld, cache_ttl_ticks: u64) -> Self {
        Self {
            world,
            cells: RefCell::default(),
            walkable: RefCell::default(),
            cache_tick: 0,
            cache_ttl_ticks: cache_ttl_ticks.max(1),
        }
    }

    /// Raw world access (bounds, sizes).
    pub fn world(&self) -> &VoxelWorld {
        &self.world
    }

    /// Flush the caches if they are older than the TTL.
    pub fn begin_tick(&mut self, tick: u64) {
        if tick.saturating_sub(self.cache_tick) >= self.cache_ttl_ticks || tick < self.cache_tick {
            self.cells.get_mut().clear();
            self.walkable.get_mut().clear();
            self.cache_tick = tick;
        }
    }

    /// Number of cached cell entries (for tests and diagnostics).
    pub fn cached_cells(&self) -> usize {
        self.cells.borrow().len()
    }

    pub fn cell(&self, coord: VoxelCoord) -> CellInfo {
        if let Some(info) = self.cells.borrow().get(&coord) {
            return *info;
        }
        let info = CellInfo::of(self.world.get(coord));
        self.cells.borrow_mut().insert(coord, info);
        info
    }

    pub fn is_solid(&self, coord: VoxelCoord) -> bool {
        self.cell(coord).solid
    }

    pub fn is_breakable(&self, coord: VoxelCoord) -> bool {
        self.cell(coord).breakable
    }

    /// A body can occupy the cell.
    pub fn is_passable(&self, coord: VoxelCoord) -> bool {
        !self.cell(coord).solid
    }

    /// `height` cells starting at `coord` are all passable.
    pub fn has_headroom(&self, coord: VoxelCoord, height: u8) -> bool {
        (0..height as i32).all(|k| self.is_passable(coord.up(k)))
    }

    /// An agent `height` cells tall can stand with its feet in `coord`: solid
    /// floor below, open body cells from the feet up.
    pub fn is_standable(&self, coord: VoxelCoord, height: u8) -> bool {
        let key = (coord, height);
        if let Some(&walkable) = self.walkable.borrow().get(&key) {
            return walkable;
        }
        let walkable = self.is_solid(coord.down(1)) && self.has_headroom(coord, height);
        self.walkable.borrow_mut().insert(key, walkable);
        walkable
    }

    /// Classify solid cells on the segment between two points.
    pub fn line_obstruction(&self, from: Vec3, to: Vec3) -> LineObstruction {
        self.world.line_obstruction(from, to)
    }

    /// Break a cell to air. Returns the voxel that was there.
    ///
    /// Only checks the material; protection, locks and reach are the carving
    /// engine's business.
    pub fn break_cell(&mut self, coord: VoxelCoord) -> Result<VoxelType, CarveError> {
        let voxel = self.world.get(coord);
        if !voxel.is_solid() {
            return Err(CarveError::NotSolid);
        }
        if !voxel.is_breakable() {
            return Err(CarveError::Unbreakable(voxel));
        }
        self.world.set(coord, VoxelType::Air);
        self.invalidate(coord);
        Ok(voxel)
    }

    /// Place a voxel. Scenario setup and host-driven edits only.
    pub fn set(&mut self, coord: VoxelCoord, voxel: VoxelType) {
        self.world.set(coord, voxel);
        self.invalidate(coord);
    }

    /// Fill the inclusive box `min..=max`.
    pub fn fill(&mut self, min: VoxelCoord, max: VoxelCoord, voxel: VoxelType) {
        self.world.fill(min, max, voxel);
        self.cells.get_mut().clear();
        self.walkable.get_mut().clear();
    }

    fn invalidate(&mut self, coord: VoxelCoord) {
        self.cells.get_mut().remove(&coord);
        // A changed cell affects standability of the cell above it (floor) and
        // of every cell whose body column contains it. Bodies are at most a
        // few cells tall, so drop the whole walkability cache instead of
        // tracking column extents.
        self.walkable.get_mut().clear();
    }
}
