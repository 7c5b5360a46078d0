// Target acquisition and per-target coordination.
//
// `TargetCoordinator::acquire()` answers "who should this agent chase?":
// the nearest pursuable target within `acquire_radius` that the agent can
// see. Visibility is a line from the agent's eyes to the target's eyes that
// may cross a few breakable cells (`max_breakable_in_sight`, relaxed to
// `same_level_breakable_in_sight` when the target stands at roughly the
// agent's elevation and within `same_level_range`). Any unbreakable cell on
// the line blocks sight outright.
//
// Coordination: at most `max_agents_per_target` agents are registered
// against a target. An agent already registered always keeps its slot. An
// agent that cannot register still gets the target back, with
// `carve_rights == false`, so it can chase it like a non-mining hostile.
// Switching to a different target (or losing the target) releases the old
// registration.
//
// Results, including "no target", are cached per agent for `cache_ticks`.
// A cached hit is dropped early if the cached target stopped being
// pursuable.
//
// See also: `controller.rs` which calls `acquire()` once per agent per run
// and `prune()` once per run.
//
// **Critical constraint: determinism.** Candidates are scanned in `TargetId`
// order and ties on distance go to the lower ID.

use crate::config::TargetingConfig;
use crate::sim::{Agent, SimWorld, Target};
use crate::types::{AgentId, TargetId};
use std::collections::{BTreeMap, BTreeSet};

/// The outcome of a successful acquisition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Acquisition {
    pub target: TargetId,
    /// Feet-to-feet distance at acquisition time.
    pub distance: f32,
    /// Whether the agent is registered against the target and may carve.
    pub carve_rights: bool,
}

#[derive(Clone, Copy, Debug)]
struct CachedAcquisition {
    result: Option<Acquisition>,
    tick: u64,
}

/// Shared registration table plus per-agent acquisition cache.
#[derive(Clone, Debug, Default)]
pub struct TargetCoordinator {
    registrations: BTreeMap<TargetId, BTreeSet<AgentId>>,
    agent_target: BTreeMap<AgentId, TargetId>,
    cache: BTreeMap<AgentId, CachedAcquisition>,
}

impl TargetCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agents registered against `target`.
    pub fn registered(&self, target: TargetId) -> usize {
        self.registrations.get(&target).map_or(0, BTreeSet::len)
    }

    /// The target `agent` is registered against.
    pub fn registration_of(&self, agent: AgentId) -> Option<TargetId> {
        self.agent_target.get(&agent).copied()
    }

    /// Nearest visible pursuable target for `agent`, or `None`.
    pub fn acquire(&mut self, world: &SimWorld, agent_id: AgentId, cfg: &TargetingConfig) -> Option<Acquisition> {
        let tick = world.tick;
        if let Some(cached) = self.cache.get(&agent_id) {
            let fresh = tick < cached.tick.saturating_add(cfg.cache_ticks);
            let still_valid = cached
                .result
                .is_none_or(|a| world.target(a.target).is_some_and(Target::is_pursuable));
            if fresh && still_valid {
                return cached.result;
            }
        }

        let Some(agent) = world.agent(agent_id) else {
            self.release(agent_id);
            return None;
        };

        let mut best: Option<(TargetId, f32)> = None;
        for target in world.targets.values().filter(|t| t.is_pursuable()) {
            let distance = agent.position.distance(target.position);
            if distance > cfg.acquire_radius {
                continue;
            }
            if best.is_some_and(|(_, d)| distance >= d) {
                continue;
            }
            if can_see(world, agent, target, distance, cfg) {
                best = Some((target.id, distance));
            }
        }

        let result = match best {
            Some((target, distance)) => Some(Acquisition {
                target,
                distance,
                carve_rights: self.register(agent_id, target, cfg.max_agents_per_target),
            }),
            None => {
                self.release(agent_id);
                None
            }
        };
        self.cache.insert(agent_id, CachedAcquisition { result, tick });
        result
    }

    /// Register `agent` against `target`. Returns whether it holds a slot.
    fn register(&mut self, agent: AgentId, target: TargetId, cap: usize) -> bool {
        if self.agent_target.get(&agent) == Some(&target) {
            return true;
        }
        self.release(agent);
        let set = self.registrations.entry(target).or_default();
        if set.len() >= cap {
            return false;
        }
        set.insert(agent);
        self.agent_target.insert(agent, target);
        true
    }

    /// Drop `agent`'s registration, if any.
    pub fn release(&mut self, agent: AgentId) {
        if let Some(old) = self.agent_target.remove(&agent) {
            if let Some(set) = self.registrations.get_mut(&old) {
                set.remove(&agent);
                if set.is_empty() {
                    self.registrations.remove(&old);
                }
            }
        }
    }

    /// Forget the cached acquisition of `agent` so the next call rescans.
    pub fn invalidate(&mut self, agent: AgentId) {
        self.cache.remove(&agent);
    }

    /// Remove every trace of agents and targets that are gone from the world
    /// or no longer pursuable.
    pub fn prune(&mut self, world: &SimWorld) {
        let stale_agents: Vec<AgentId> = self
            .agent_target
            .keys()
            .chain(self.cache.keys())
            .filter(|id| !world.agents.contains_key(id))
            .copied()
            .collect();
        for id in stale_agents {
            self.release(id);
            self.cache.remove(&id);
        }

        let dead = |id: &TargetId| !world.target(*id).is_some_and(Target::is_pursuable);
        self.registrations.retain(|id, _| !dead(id));
        self.agent_target.retain(|_, id| !dead(id));
        self.cache
            .retain(|_, c| c.result.is_none_or(|a| !dead(&a.target)));
    }
}

/// Eye-to-eye line of sight through at most a few breakable cells.
fn can_see(world: &SimWorld, agent: &Agent, target: &Target, distance: f32, cfg: &TargetingConfig) -> bool {
    let obstruction = world
        .grid
        .line_obstruction(agent.eye(cfg.eye_inset), target.eye(cfg.eye_inset));
    if obstruction.unbreakable {
        return false;
    }
    let dy = (target.feet().y - agent.feet().y).abs();
    let limit = if dy <= cfg.same_level_max_dy && distance <= cfg.same_level_range {
        cfg.same_level_breakable_in_sight
    } else {
        cfg.max_breakable_in_sight
    };
    obstruction.breakable <= limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NavConfig;
    use crate::sim::TargetKind;
    use crate::types::{GameMode, VoxelCoord, VoxelType};
    use crate::world::VoxelWorld;

    fn open_world() -> SimWorld {
        let mut world = VoxelWorld::new(48, 16, 48);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(47, 3, 47), VoxelType::Stone);
        SimWorld::new(world, &NavConfig::default())
    }

    fn survivor() -> TargetKind {
        TargetKind::Player {
            mode: GameMode::Survival,
        }
    }

    #[test]
    fn picks_nearest_visible_target() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        let _far = sim.spawn_target(survivor(), VoxelCoord::new(20, 4, 5));
        let near = sim.spawn_target(TargetKind::Mob, VoxelCoord::new(9, 4, 5));
        let mut coord = TargetCoordinator::new();
        let acq = coord.acquire(&sim, a, &cfg).unwrap();
        assert_eq!(acq.target, near);
        assert!(acq.carve_rights);
        assert!((acq.distance - 4.0).abs() < 1e-4);
    }

    #[test]
    fn spectators_and_out_of_range_are_ignored() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        sim.spawn_target(
            TargetKind::Player {
                mode: GameMode::Spectator,
            },
            VoxelCoord::new(7, 4, 5),
        );
        sim.spawn_target(survivor(), VoxelCoord::new(45, 4, 45));
        let mut coord = TargetCoordinator::new();
        assert_eq!(coord.acquire(&sim, a, &cfg), None);
    }

    #[test]
    fn unbreakable_wall_blocks_sight() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        sim.spawn_target(survivor(), VoxelCoord::new(12, 4, 5));
        sim.grid.fill(VoxelCoord::new(8, 4, 0), VoxelCoord::new(8, 10, 10), VoxelType::Obsidian);
        let mut coord = TargetCoordinator::new();
        assert_eq!(coord.acquire(&sim, a, &cfg), None);
    }

    #[test]
    fn same_level_tolerates_thicker_walls() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        let t = sim.spawn_target(survivor(), VoxelCoord::new(16, 4, 5));
        // Five cells of dirt wall: too thick for the base tolerance of 3,
        // fine for the same-level tolerance of 6.
        sim.grid.fill(VoxelCoord::new(8, 4, 0), VoxelCoord::new(12, 10, 10), VoxelType::Dirt);
        let mut coord = TargetCoordinator::new();
        assert_eq!(coord.acquire(&sim, a, &cfg).map(|x| x.target), Some(t));

        // Raise the target well above the agent: base tolerance applies.
        let mut sim2 = open_world();
        let a2 = sim2.spawn_agent(VoxelCoord::new(5, 4, 5));
        sim2.grid.fill(VoxelCoord::new(14, 4, 3), VoxelCoord::new(18, 9, 7), VoxelType::Stone);
        sim2.spawn_target(survivor(), VoxelCoord::new(16, 10, 5));
        sim2.grid.fill(VoxelCoord::new(8, 4, 0), VoxelCoord::new(12, 15, 10), VoxelType::Dirt);
        let mut coord2 = TargetCoordinator::new();
        assert_eq!(coord2.acquire(&sim2, a2, &cfg), None);
    }

    #[test]
    fn third_agent_gets_target_without_carve_rights() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let agents: Vec<_> = (0..3).map(|i| sim.spawn_agent(VoxelCoord::new(5 + i, 4, 5))).collect();
        let t = sim.spawn_target(survivor(), VoxelCoord::new(12, 4, 8));
        let mut coord = TargetCoordinator::new();
        let results: Vec<_> = agents.iter().map(|&a| coord.acquire(&sim, a, &cfg).unwrap()).collect();
        assert!(results.iter().all(|r| r.target == t));
        assert_eq!(
            results.iter().map(|r| r.carve_rights).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert_eq!(coord.registered(t), 2);
    }

    #[test]
    fn registered_agent_keeps_slot_after_cache_expiry() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        let b = sim.spawn_agent(VoxelCoord::new(6, 4, 5));
        let c = sim.spawn_agent(VoxelCoord::new(7, 4, 5));
        let t = sim.spawn_target(survivor(), VoxelCoord::new(12, 4, 8));
        let mut coord = TargetCoordinator::new();
        coord.acquire(&sim, a, &cfg);
        coord.acquire(&sim, b, &cfg);
        sim.tick += cfg.cache_ticks;
        assert!(!coord.acquire(&sim, c, &cfg).unwrap().carve_rights);
        assert!(coord.acquire(&sim, a, &cfg).unwrap().carve_rights);
        assert_eq!(coord.registration_of(a), Some(t));
    }

    #[test]
    fn cached_none_is_honored_within_window() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        let mut coord = TargetCoordinator::new();
        assert_eq!(coord.acquire(&sim, a, &cfg), None);
        let t = sim.spawn_target(survivor(), VoxelCoord::new(8, 4, 5));
        sim.tick += 1;
        assert_eq!(coord.acquire(&sim, a, &cfg), None);
        sim.tick += cfg.cache_ticks;
        assert_eq!(coord.acquire(&sim, a, &cfg).map(|x| x.target), Some(t));
    }

    #[test]
    fn prune_releases_dead_targets_and_removed_agents() {
        let mut sim = open_world();
        let cfg = NavConfig::default().targeting;
        let a = sim.spawn_agent(VoxelCoord::new(5, 4, 5));
        let b = sim.spawn_agent(VoxelCoord::new(6, 4, 5));
        let t = sim.spawn_target(survivor(), VoxelCoord::new(12, 4, 8));
        let mut coord = TargetCoordinator::new();
        coord.acquire(&sim, a, &cfg);
        coord.acquire(&sim, b, &cfg);
        sim.remove_agent(a);
        coord.prune(&sim);
        assert_eq!(coord.registered(t), 1);
        sim.targets.get_mut(&t).unwrap().alive = false;
        coord.prune(&sim);
        assert_eq!(coord.registered(t), 0);
        assert_eq!(coord.registration_of(b), None);
    }
}
