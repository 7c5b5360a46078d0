// Build plans: cheap, search-free routes for carving agents.
//
// When an agent has to dig its way to a target there is usually no walkable
// path for A* to find, so the carving heading comes from a `BuildPlan`
// instead: a coarse route of feet cells from the agent toward the goal,
// stepping one axis at a time in the XZ plane (always toward the axis with
// more distance left, ties to X) and moving at most one level per step
// toward the goal's height. Generating one costs O(route length).
//
// Every planned cell is reserved for the planning agent in
// `CellReservations`. A cell reserved by someone else is sidestepped (the
// cell to the left or right of the heading, if free) or the plan is cut
// short there. So a reserved cell belongs to exactly one agent at a time.
// Reservations are released as the agent passes each cell, when the plan is
// abandoned, or when they expire after `reservation_ticks` without refresh.
//
// See also: `carving.rs` which turns the plan's heading into a strategy,
// `controller.rs` which abandons plans when the target moves away.
//
// **Critical constraint: determinism.** Route generation is a pure function
// of (start, goal, reservations); all maps are `BTreeMap`s.

use crate::types::{AgentId, Direction, VoxelCoord};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Reservation {
    agent: AgentId,
    tick: u64,
}

/// Which agent has claimed which route cell.
#[derive(Clone, Debug, Default)]
pub struct CellReservations {
    cells: BTreeMap<VoxelCoord, Reservation>,
    ttl: u64,
}

impl CellReservations {
    pub fn new(ttl: u64) -> Self {
        Self {
            cells: BTreeMap::new(),
            ttl,
        }
    }

    /// The agent holding an unexpired reservation on `cell`.
    pub fn holder(&self, cell: VoxelCoord, tick: u64) -> Option<AgentId> {
        self.cells
            .get(&cell)
            .filter(|r| tick < r.tick.saturating_add(self.ttl))
            .map(|r| r.agent)
    }

    /// Reserve (or refresh) `cell` for `agent`. Fails if another agent
    /// holds it.
    pub fn reserve(&mut self, cell: VoxelCoord, agent: AgentId, tick: u64) -> bool {
        match self.holder(cell, tick) {
            Some(other) if other != agent => false,
            _ => {
                self.cells.insert(cell, Reservation { agent, tick });
                true
            }
        }
    }

    pub fn release(&mut self, cell: VoxelCoord, agent: AgentId) {
        if self.cells.get(&cell).is_some_and(|r| r.agent == agent) {
            self.cells.remove(&cell);
        }
    }

    pub fn release_all(&mut self, agent: AgentId) {
        self.cells.retain(|_, r| r.agent != agent);
    }

    pub fn compact(&mut self, tick: u64) {
        let ttl = self.ttl;
        self.cells.retain(|_, r| tick < r.tick.saturating_add(ttl));
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A coarse route for one agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildPlan {
    pub goal: VoxelCoord,
    pub cells: Vec<VoxelCoord>,
    /// Index of the next cell not yet reached.
    pub next: usize,
    pub created_tick: u64,
}

impl BuildPlan {
    pub fn is_finished(&self) -> bool {
        self.next >= self.cells.len()
    }
}

/// One axis-aligned step of the coarse route from `from` toward `goal`.
fn route_step(from: VoxelCoord, goal: VoxelCoord) -> VoxelCoord {
    let dx = goal.x - from.x;
    let dz = goal.z - from.z;
    let dy = (goal.y - from.y).signum();
    if dx.abs() >= dz.abs() {
        from.offset(dx.signum(), dy, 0)
    } else {
        from.offset(0, dy, dz.signum())
    }
}

/// Build plans for every agent plus the shared reservation table.
#[derive(Clone, Debug, Default)]
pub struct BuildPlanner {
    plans: BTreeMap<AgentId, BuildPlan>,
    pub reservations: CellReservations,
    max_cells: usize,
    plan_ttl: u64,
}

impl BuildPlanner {
    pub fn new(max_cells: usize, plan_ttl: u64, reservation_ttl: u64) -> Self {
        Self {
            plans: BTreeMap::new(),
            reservations: CellReservations::new(reservation_ttl),
            max_cells,
            plan_ttl,
        }
    }

    /// Make sure `agent` has a live plan toward `goal`, regenerating it when
    /// missing, expired, finished, or aimed at a different goal.
    pub fn ensure_plan(&mut self, agent: AgentId, feet: VoxelCoord, goal: VoxelCoord, tick: u64) -> &BuildPlan {
        let stale = self.plans.get(&agent).is_none_or(|p| {
            p.goal != goal || p.is_finished() || tick >= p.created_tick.saturating_add(self.plan_ttl)
        });
        if stale {
            self.abandon(agent);
            let plan = self.generate(agent, feet, goal, tick);
            self.plans.insert(agent, plan);
        }
        self.plans.entry(agent).or_insert_with(|| BuildPlan {
            goal,
            cells: Vec::new(),
            next: 0,
            created_tick: tick,
        })
    }

    fn generate(&mut self, agent: AgentId, feet: VoxelCoord, goal: VoxelCoord, tick: u64) -> BuildPlan {
        let mut cells: Vec<VoxelCoord> = Vec::new();
        let mut current = feet;
        let mut sidestepped = false;
        while !current.same_column(goal) && cells.len() < self.max_cells {
            let step = route_step(current, goal);
            let cell = if !cells.contains(&step) && self.reservations.reserve(step, agent, tick) {
                sidestepped = false;
                step
            } else if sidestepped {
                // Two blocked steps in a row: cut the plan here.
                break;
            } else {
                let heading = Direction::toward_horizontal((step.x - current.x) as f32, (step.z - current.z) as f32);
                let side = [heading.rotate_cw(), heading.rotate_ccw()]
                    .into_iter()
                    .map(|d| current.step(d).up(step.y - current.y))
                    .find(|&c| !cells.contains(&c) && self.reservations.reserve(c, agent, tick));
                match side {
                    Some(c) => {
                        sidestepped = true;
                        c
                    }
                    None => break,
                }
            };
            cells.push(cell);
            current = cell;
        }
        BuildPlan {
            goal,
            cells,
            next: 0,
            created_tick: tick,
        }
    }

    /// Mark cells the agent has reached (same column, within one level) as
    /// passed and release them. Returns the horizontal heading toward the
    /// next unreached cell.
    pub fn next_direction(&mut self, agent: AgentId, feet: VoxelCoord, tick: u64) -> Option<Direction> {
        let plan = self.plans.get_mut(&agent)?;
        // Skip ahead to the furthest cell the agent stands on, if any.
        if let Some(reached) = plan
            .cells
            .iter()
            .enumerate()
            .skip(plan.next)
            .filter(|(_, c)| c.same_column(feet) && (c.y - feet.y).abs() <= 1)
            .map(|(i, _)| i)
            .last()
        {
            for &cell in &plan.cells[plan.next..=reached] {
                self.reservations.release(cell, agent);
            }
            plan.next = reached + 1;
        }
        let next = *plan.cells.get(plan.next)?;
        // Keep the remaining claims alive.
        for &cell in &plan.cells[plan.next..] {
            self.reservations.reserve(cell, agent, tick);
        }
        if next.same_column(feet) {
            return None;
        }
        Some(Direction::toward_horizontal(
            (next.x - feet.x) as f32,
            (next.z - feet.z) as f32,
        ))
    }

    /// Drop the agent's plan and release its reservations.
    pub fn abandon(&mut self, agent: AgentId) {
        self.plans.remove(&agent);
        self.reservations.release_all(agent);
    }

    pub fn prune(&mut self, alive: impl Fn(AgentId) -> bool) {
        let stale: Vec<AgentId> = self.plans.keys().copied().filter(|&a| !alive(a)).collect();
        for agent in stale {
            self.abandon(agent);
        }
    }

    pub fn compact(&mut self, tick: u64) {
        self.reservations.compact(tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_alternates_axes_and_climbs() {
        let mut planner = BuildPlanner::new(64, 200, 100);
        let plan = planner.ensure_plan(AgentId(0), VoxelCoord::new(0, 0, 0), VoxelCoord::new(2, 3, 2), 0);
        assert_eq!(
            plan.cells,
            vec![
                VoxelCoord::new(1, 1, 0),
                VoxelCoord::new(1, 2, 1),
                VoxelCoord::new(2, 3, 1),
                VoxelCoord::new(2, 3, 2),
            ]
        );
    }

    #[test]
    fn route_is_capped() {
        let mut planner = BuildPlanner::new(10, 200, 100);
        let plan = planner.ensure_plan(AgentId(0), VoxelCoord::new(0, 0, 0), VoxelCoord::new(100, 0, 0), 0);
        assert_eq!(plan.cells.len(), 10);
        assert!(!plan.is_finished());
    }

    #[test]
    fn reserved_cells_are_exclusive() {
        let mut planner = BuildPlanner::new(64, 200, 100);
        let a = AgentId(0);
        let b = AgentId(1);
        let goal = VoxelCoord::new(8, 5, 0);
        let pa = planner.ensure_plan(a, VoxelCoord::new(0, 5, 0), goal, 0).clone();
        let pb = planner.ensure_plan(b, VoxelCoord::new(0, 5, 0), goal, 0).clone();
        assert!(!pa.cells.is_empty());
        for cell in &pb.cells {
            assert!(!pa.cells.contains(cell), "{cell} planned by both agents");
        }
        for cell in &pa.cells {
            assert_eq!(planner.reservations.holder(*cell, 1), Some(a));
        }
    }

    #[test]
    fn passing_cells_releases_them() {
        let mut planner = BuildPlanner::new(64, 200, 100);
        let a = AgentId(0);
        planner.ensure_plan(a, VoxelCoord::new(0, 5, 0), VoxelCoord::new(4, 5, 0), 0);
        assert_eq!(planner.next_direction(a, VoxelCoord::new(0, 5, 0), 1), Some(Direction::East));
        assert_eq!(planner.next_direction(a, VoxelCoord::new(2, 5, 0), 2), Some(Direction::East));
        assert_eq!(planner.reservations.holder(VoxelCoord::new(1, 5, 0), 2), None);
        assert_eq!(planner.reservations.holder(VoxelCoord::new(2, 5, 0), 2), None);
        assert_eq!(planner.reservations.holder(VoxelCoord::new(3, 5, 0), 2), Some(a));
        planner.abandon(a);
        assert!(planner.reservations.is_empty());
    }

    #[test]
    fn reservations_expire() {
        let mut res = CellReservations::new(10);
        let c = VoxelCoord::new(1, 1, 1);
        assert!(res.reserve(c, AgentId(0), 0));
        assert!(!res.reserve(c, AgentId(1), 9));
        assert!(res.reserve(c, AgentId(1), 10));
        res.compact(30);
        assert!(res.is_empty());
    }
}
