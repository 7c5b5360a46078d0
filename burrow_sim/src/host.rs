// The engine's window onto the surrounding game.
//
// Everything the navigation core cannot own (difficulty lookup, inventory,
// presentation cues) goes through the `Host` trait. Calls are
// fire-and-forget from the core's point of view: a failing call is logged at
// debug level and ignored (see `controller.rs`), because the AI is
// supplementary and must never destabilize the host.
//
// `HeadlessHost` is an in-memory implementation used by tests, benchmarks and
// the demo binary. It counts what it is asked to do instead of rendering it.
//
// See also: `sim.rs` for the headless world state (grid, agents, targets),
// `error.rs` for `HostError`.

use crate::error::HostError;
use crate::types::{AgentId, Difficulty, VoxelCoord, VoxelType};
use std::collections::BTreeMap;

/// Presentation cues the core asks the host to play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// A cell was broken.
    BlockBreak(VoxelType),
    /// An agent started pursuing a target.
    Alert,
}

/// Calls the core makes into the surrounding world.
pub trait Host {
    fn difficulty(&self) -> Difficulty;

    /// Put a carved block into the agent's inventory.
    fn store_block(&mut self, agent: AgentId, voxel: VoxelType) -> Result<(), HostError>;

    /// Drop a carved block into the world (inventory full or absent).
    fn drop_block(&mut self, at: VoxelCoord, voxel: VoxelType) -> Result<(), HostError>;

    fn play_effect(&mut self, effect: Effect, at: VoxelCoord);
}

/// In-memory host: fixed difficulty, bounded per-agent inventories.
#[derive(Clone, Debug)]
pub struct HeadlessHost {
    pub difficulty: Difficulty,
    /// Blocks each agent can carry.
    pub inventory_capacity: u32,
    pub inventories: BTreeMap<AgentId, u32>,
    pub dropped_blocks: u64,
    pub effects_played: u64,
}

impl HeadlessHost {
    pub fn new(difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            inventory_capacity: 64,
            inventories: BTreeMap::new(),
            dropped_blocks: 0,
            effects_played: 0,
        }
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new(Difficulty::Normal)
    }
}

impl Host for HeadlessHost {
    fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    fn store_block(&mut self, agent: AgentId, _voxel: VoxelType) -> Result<(), HostError> {
        let held = self.inventories.entry(agent).or_insert(0);
        if *held >= self.inventory_capacity {
            return Err(HostError::InventoryFull(agent));
        }
        *held += 1;
        Ok(())
    }

    fn drop_block(&mut self, _at: VoxelCoord, _voxel: VoxelType) -> Result<(), HostError> {
        self.dropped_blocks += 1;
        Ok(())
    }

    fn play_effect(&mut self, _effect: Effect, _at: VoxelCoord) {
        self.effects_played += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventory_fills_up() {
        let mut host = HeadlessHost::default();
        host.inventory_capacity = 2;
        let a = AgentId(1);
        assert!(host.store_block(a, VoxelType::Dirt).is_ok());
        assert!(host.store_block(a, VoxelType::Dirt).is_ok());
        assert_eq!(
            host.store_block(a, VoxelType::Dirt),
            Err(HostError::InventoryFull(a))
        );
        assert_eq!(host.inventories[&a], 2);
    }
}
