// Stuck detection and the escape-direction scan.
//
// `StuckTracker` records, per agent, an anchor position and the tick it was
// set. Moving at least `move_threshold` from the anchor counts as progress
// and re-anchors. Otherwise, once `window_ticks` have passed since the
// anchor, the agent is stuck and its stuck counter is the number of ticks
// past the window (1 on the first stuck tick). The counter grows with every
// idle observation, so downstream checks can escalate:
// - `escape_after_ticks`: the controller asks `escape_direction()` for a
//   heading and carving switches to `Strategy::Escape`;
// - `extended_ticks`: the break policy ignores protection, and a downward
//   escape may break the agent's own foothold. `StuckStatus::newly_extended`
//   is set on the one observation that crosses this threshold.
//
// `escape_direction()` scores the axis directions by alignment with the
// vector to the target, a bonus for vertical directions, and a bonus for
// cells that are already open. A direction whose cells include unbreakable
// material is never chosen. Down digs out the agent's own foothold, so it
// is only considered once the agent is extended-stuck.
//
// See also: `registry.rs` (`check_break` reads the stuck counter),
// `controller.rs` which feeds positions in once per run.
//
// **Critical constraint: determinism.** Ties between equally scored
// directions resolve in `Direction::ALL` order.

use crate::config::StuckConfig;
use crate::grid::Grid;
use crate::types::{AgentId, Direction, Vec3, VoxelCoord};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug)]
struct ProgressRecord {
    anchor: Vec3,
    since: u64,
    extended: bool,
}

/// What one observation concluded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StuckStatus {
    /// Ticks past the stuck window, 0 while making progress.
    pub stuck_ticks: u64,
    /// This observation crossed the extended threshold.
    pub newly_extended: bool,
}

impl StuckStatus {
    pub fn is_stuck(self) -> bool {
        self.stuck_ticks > 0
    }
}

/// Per-agent displacement records.
#[derive(Clone, Debug, Default)]
pub struct StuckTracker {
    records: BTreeMap<AgentId, ProgressRecord>,
}

impl StuckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the agent at `position` on `tick`.
    pub fn observe(&mut self, agent: AgentId, position: Vec3, tick: u64, cfg: &StuckConfig) -> StuckStatus {
        let record = self.records.entry(agent).or_insert(ProgressRecord {
            anchor: position,
            since: tick,
            extended: false,
        });
        if position.distance(record.anchor) >= cfg.move_threshold {
            *record = ProgressRecord {
                anchor: position,
                since: tick,
                extended: false,
            };
            return StuckStatus::default();
        }

        let idle = tick.saturating_sub(record.since);
        let stuck_ticks = if idle >= cfg.window_ticks {
            idle - cfg.window_ticks + 1
        } else {
            0
        };
        let newly_extended = stuck_ticks >= cfg.extended_ticks && !record.extended;
        if newly_extended {
            record.extended = true;
        }
        StuckStatus {
            stuck_ticks,
            newly_extended,
        }
    }

    pub fn forget(&mut self, agent: AgentId) {
        self.records.remove(&agent);
    }

    pub fn prune(&mut self, alive: impl Fn(AgentId) -> bool) {
        self.records.retain(|&agent, _| alive(agent));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The cells an escape in `dir` would have to open.
fn escape_cells(feet: VoxelCoord, height: u8, dir: Direction) -> Vec<VoxelCoord> {
    let h = height as i32;
    match dir {
        Direction::Up => vec![feet.up(h), feet.up(h + 1)],
        Direction::Down => vec![feet.down(1)],
        horizontal => {
            let n = feet.step(horizontal);
            (0..h).map(|k| n.up(k)).collect()
        }
    }
}

/// Best escape heading for an agent at `feet`, or `None` when every
/// direction is walled by unbreakable material. `allow_down` admits the
/// downward escape.
pub fn escape_direction(
    grid: &Grid,
    feet: VoxelCoord,
    height: u8,
    to_target: Vec3,
    allow_down: bool,
    cfg: &StuckConfig,
) -> Option<Direction> {
    let toward = to_target.normalized_or_zero();
    let mut best: Option<(Direction, f32)> = None;
    for dir in Direction::ALL {
        if dir == Direction::Down && !allow_down {
            continue;
        }
        let cells = escape_cells(feet, height, dir);
        if cells.iter().any(|&c| {
            let info = grid.cell(c);
            info.solid && !info.breakable
        }) {
            continue;
        }
        let mut score = cfg.alignment_weight * dir.as_vec3().dot(toward);
        if dir.is_vertical() {
            score += cfg.vertical_bonus;
        }
        if cells.iter().all(|&c| grid.is_passable(c)) {
            score += cfg.open_bonus;
        }
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((dir, score));
        }
    }
    best.map(|(dir, _)| dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NavConfig;
    use crate::types::VoxelType;
    use crate::world::VoxelWorld;

    fn cfg() -> StuckConfig {
        NavConfig::default().stuck
    }

    #[test]
    fn progress_resets_the_counter() {
        let mut tracker = StuckTracker::new();
        let a = AgentId(0);
        let cfg = cfg();
        let origin = Vec3::new(0.5, 5.0, 0.5);
        for tick in 0..30 {
            tracker.observe(a, origin, tick, &cfg);
        }
        assert!(tracker.observe(a, origin, 30, &cfg).is_stuck());
        let moved = origin + Vec3::new(1.0, 0.0, 0.0);
        assert_eq!(tracker.observe(a, moved, 31, &cfg), StuckStatus::default());
        assert!(!tracker.observe(a, moved, 40, &cfg).is_stuck());
    }

    #[test]
    fn small_jitter_is_not_progress() {
        let mut tracker = StuckTracker::new();
        let a = AgentId(0);
        let cfg = cfg();
        let origin = Vec3::new(0.5, 5.0, 0.5);
        tracker.observe(a, origin, 0, &cfg);
        let jitter = origin + Vec3::new(0.2, 0.0, 0.1);
        let status = tracker.observe(a, jitter, cfg.window_ticks, &cfg);
        assert_eq!(status.stuck_ticks, 1);
    }

    #[test]
    fn walled_directions_are_never_chosen() {
        let mut world = VoxelWorld::new(8, 8, 8);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(7, 7, 7), VoxelType::Obsidian);
        let feet = VoxelCoord::new(3, 3, 3);
        world.set(feet, VoxelType::Air);
        world.set(feet.up(1), VoxelType::Air);
        world.set(VoxelCoord::new(2, 3, 3), VoxelType::Dirt);
        world.set(VoxelCoord::new(2, 4, 3), VoxelType::Dirt);
        let grid = Grid::new(world, 1);
        // Target due east, but only the west wall is breakable.
        let dir = escape_direction(&grid, feet, 2, Vec3::new(10.0, 0.0, 0.0), true, &cfg());
        assert_eq!(dir, Some(Direction::West));
    }

    #[test]
    fn fully_walled_agent_has_no_escape() {
        let mut world = VoxelWorld::new(8, 8, 8);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(7, 7, 7), VoxelType::Bedrock);
        let feet = VoxelCoord::new(3, 3, 3);
        world.set(feet, VoxelType::Air);
        world.set(feet.up(1), VoxelType::Air);
        let grid = Grid::new(world, 1);
        assert_eq!(escape_direction(&grid, feet, 2, Vec3::new(1.0, 0.0, 0.0), true, &cfg()), None);
    }

    #[test]
    fn target_above_favors_up() {
        let mut world = VoxelWorld::new(8, 12, 8);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(7, 11, 7), VoxelType::Dirt);
        let feet = VoxelCoord::new(3, 3, 3);
        world.set(feet, VoxelType::Air);
        world.set(feet.up(1), VoxelType::Air);
        let grid = Grid::new(world, 1);
        let dir = escape_direction(&grid, feet, 2, Vec3::new(0.5, 6.0, 0.0), false, &cfg());
        assert_eq!(dir, Some(Direction::Up));
    }

    #[test]
    fn digging_down_waits_for_extended_stuck() {
        let mut world = VoxelWorld::new(8, 12, 8);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(7, 11, 7), VoxelType::Dirt);
        let feet = VoxelCoord::new(3, 6, 3);
        world.set(feet, VoxelType::Air);
        world.set(feet.up(1), VoxelType::Air);
        let grid = Grid::new(world, 1);
        let below = Vec3::new(0.5, -6.0, 0.0);
        let early = escape_direction(&grid, feet, 2, below, false, &cfg());
        assert!(early.is_some());
        assert_ne!(early, Some(Direction::Down));
        assert_eq!(escape_direction(&grid, feet, 2, below, true, &cfg()), Some(Direction::Down));
    }
}
