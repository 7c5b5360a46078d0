// Cell-keyed registries shared by every agent, and the break policy.
//
// - `ProtectedBlocks`: cells that belong to a structure an agent just built
//   (stair footholds, supports, spiral pillar). A protected cell cannot be
//   broken by anyone, its builder included, until the protection window has
//   passed since it was (last) registered.
// - `CarveLocks`: a short-lived claim on a cell by the agent about to break
//   it. At most one agent holds an unexpired lock on a cell.
// - `CarveRegistry::check_break()`: the single policy every carving mode
//   uses to decide whether a candidate cell may be broken. Rules, in order:
//     1. material: not solid → `NotSolid`, solid but unbreakable (including
//        the out-of-bounds border) → `Unbreakable`;
//     2. the cell under the agent's feet → `OwnFoothold` (lifted only for a
//        downward escape, see `BreakContext::allow_foothold`);
//     3. a support of a stair someone is climbing → `StructuralSupport`,
//        with no override at all;
//     4. distance from the agent's eyes to the cell center → `OutOfReach`;
//     5. unexpired protection → `Protected`, unless the agent has been stuck
//        for at least `extended_ticks`;
//     6. unexpired lock held by another agent → `Locked`.
//
// - `ClimbSupports`: the step blocks and footholds under an agent's active
//   climb. They have no expiry; the controller releases them when the climb
//   ends or the agent is forgotten.
//
// Expiry is lazy: lookups ignore stale entries, and `compact()` (called
// periodically by the controller) removes them so the maps cannot grow
// without bound.
//
// See also: `carving.rs` for the candidate lists fed through the policy,
// `stuck.rs` for the stuck counter that grants the override.
//
// **Critical constraint: determinism.** Every registry is a `BTreeMap`;
// compaction and the release calls iterate them in coordinate order.

use crate::error::CarveError;
use crate::grid::Grid;
use crate::types::{AgentId, Vec3, VoxelCoord, VoxelType};
use std::collections::BTreeMap;

/// Who protected a cell, and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Protection {
    pub tick: u64,
    pub builder: AgentId,
}

/// Recently built structural cells.
#[derive(Clone, Debug, Default)]
pub struct ProtectedBlocks {
    entries: BTreeMap<VoxelCoord, Protection>,
    window: u64,
}

impl ProtectedBlocks {
    pub fn new(window: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            window,
        }
    }

    /// Protect `cell` from `tick` on. Re-protecting refreshes the stamp but
    /// never moves it backwards.
    pub fn protect(&mut self, cell: VoxelCoord, builder: AgentId, tick: u64) {
        let entry = self.entries.entry(cell).or_insert(Protection { tick, builder });
        if tick >= entry.tick {
            *entry = Protection { tick, builder };
        }
    }

    /// The unexpired protection on `cell`, if any.
    pub fn active(&self, cell: VoxelCoord, tick: u64) -> Option<Protection> {
        self.entries
            .get(&cell)
            .copied()
            .filter(|p| tick < p.tick.saturating_add(self.window))
    }

    /// Ticks of protection left on `cell` (0 when unprotected).
    pub fn remaining(&self, cell: VoxelCoord, tick: u64) -> u64 {
        self.active(cell, tick)
            .map_or(0, |p| p.tick.saturating_add(self.window) - tick)
    }

    /// Drop expired entries.
    pub fn compact(&mut self, tick: u64) {
        let window = self.window;
        self.entries.retain(|_, p| tick < p.tick.saturating_add(window));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A claim on a cell by the agent about to break it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CarveLock {
    pub holder: AgentId,
    pub tick: u64,
}

/// Per-cell carve locks.
#[derive(Clone, Debug, Default)]
pub struct CarveLocks {
    locks: BTreeMap<VoxelCoord, CarveLock>,
    duration: u64,
}

impl CarveLocks {
    pub fn new(duration: u64) -> Self {
        Self {
            locks: BTreeMap::new(),
            duration,
        }
    }

    fn live(&self, lock: &CarveLock, tick: u64) -> bool {
        tick < lock.tick.saturating_add(self.duration)
    }

    /// The agent holding an unexpired lock on `cell`.
    pub fn holder(&self, cell: VoxelCoord, tick: u64) -> Option<AgentId> {
        self.locks
            .get(&cell)
            .filter(|l| self.live(l, tick))
            .map(|l| l.holder)
    }

    /// Take or refresh the lock on `cell`. Fails while another agent holds
    /// an unexpired lock.
    pub fn try_acquire(&mut self, cell: VoxelCoord, agent: AgentId, tick: u64) -> Result<(), CarveError> {
        match self.holder(cell, tick) {
            Some(holder) if holder != agent => Err(CarveError::Locked { holder }),
            _ => {
                self.locks.insert(cell, CarveLock { holder: agent, tick });
                Ok(())
            }
        }
    }

    /// Release `cell` if `agent` holds it.
    pub fn release(&mut self, cell: VoxelCoord, agent: AgentId) {
        if self.locks.get(&cell).is_some_and(|l| l.holder == agent) {
            self.locks.remove(&cell);
        }
    }

    /// Release every lock `agent` holds.
    pub fn release_all(&mut self, agent: AgentId) {
        self.locks.retain(|_, l| l.holder != agent);
    }

    pub fn compact(&mut self, tick: u64) {
        let duration = self.duration;
        self.locks.retain(|_, l| tick < l.tick.saturating_add(duration));
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Cells holding up an active climb, keyed to the climbing agent.
#[derive(Clone, Debug, Default)]
pub struct ClimbSupports {
    cells: BTreeMap<VoxelCoord, AgentId>,
}

impl ClimbSupports {
    /// Mark `cell` as part of the stair `agent` is climbing.
    pub fn hold(&mut self, cell: VoxelCoord, agent: AgentId) {
        self.cells.insert(cell, agent);
    }

    /// The climber `cell` is holding up, if any.
    pub fn climber(&self, cell: VoxelCoord) -> Option<AgentId> {
        self.cells.get(&cell).copied()
    }

    /// Free every cell held for `agent`.
    pub fn release(&mut self, agent: AgentId) {
        self.cells.retain(|_, a| *a != agent);
    }

    /// Agents currently holding supports.
    pub fn climbers(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.cells.values().copied().collect();
        agents.sort();
        agents.dedup();
        agents
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// The agent-side facts the break policy needs.
#[derive(Clone, Copy, Debug)]
pub struct BreakContext {
    pub agent: AgentId,
    pub eye: Vec3,
    pub feet: VoxelCoord,
    pub stuck_ticks: u64,
    pub tick: u64,
    /// Lift the own-foothold rule (downward escape while extended-stuck).
    pub allow_foothold: bool,
}

/// Protection, locks and climb supports, plus the thresholds the policy
/// reads.
#[derive(Clone, Debug, Default)]
pub struct CarveRegistry {
    pub protected: ProtectedBlocks,
    pub locks: CarveLocks,
    pub supports: ClimbSupports,
    pub reach: f32,
    pub extended_ticks: u64,
}

impl CarveRegistry {
    pub fn new(protection_window: u64, lock_duration: u64, reach: f32, extended_ticks: u64) -> Self {
        Self {
            protected: ProtectedBlocks::new(protection_window),
            locks: CarveLocks::new(lock_duration),
            supports: ClimbSupports::default(),
            reach,
            extended_ticks,
        }
    }

    /// Whether the agent in `ctx` may break `cell` right now. Returns the
    /// cell's material on success. Does not take the lock.
    pub fn check_break(&self, grid: &Grid, cell: VoxelCoord, ctx: &BreakContext) -> Result<VoxelType, CarveError> {
        let info = grid.cell(cell);
        if !info.solid {
            return Err(CarveError::NotSolid);
        }
        if !info.breakable {
            return Err(CarveError::Unbreakable(info.voxel));
        }
        if cell == ctx.feet.down(1) && !ctx.allow_foothold {
            return Err(CarveError::OwnFoothold);
        }
        if self.supports.climber(cell).is_some() {
            return Err(CarveError::StructuralSupport);
        }
        let distance = ctx.eye.distance(cell.center());
        if distance > self.reach {
            return Err(CarveError::OutOfReach { distance });
        }
        if ctx.stuck_ticks < self.extended_ticks {
            if let Some(p) = self.protected.active(cell, ctx.tick) {
                return Err(CarveError::Protected {
                    builder: p.builder,
                    remaining: self.protected.remaining(cell, ctx.tick),
                });
            }
        }
        match self.locks.holder(cell, ctx.tick) {
            Some(holder) if holder != ctx.agent => Err(CarveError::Locked { holder }),
            _ => Ok(info.voxel),
        }
    }

    pub fn compact(&mut self, tick: u64) {
        self.protected.compact(tick);
        self.locks.compact(tick);
    }
}
