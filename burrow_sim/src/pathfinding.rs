// Incremental A* over grid cells, and the per-agent search engine.
//
// `SearchState` is one resumable A* search. `advance(grid, budget)` pops and
// expands at most `budget` nodes, then yields with a status
// (`InProgress`, `Completed(path)` or `Failed(reason)`). Nothing inside the
// search reschedules itself; a driver decides when to call `advance` again.
// The open set is a `BinaryHeap` (min-heap via reversed ordering on f-score,
// ties broken by coordinate), scores and predecessors live in `FxHashMap`s
// that are never iterated.
//
// Nodes are feet cells where the agent can stand (`Grid::is_standable`).
// From each node the search tries eight horizontal directions; in each it
// tries five vertical offsets in the order 0, +1, -1, +2, -2 and takes the
// first standable one. Climbing needs open cells above the agent's head;
// dropping needs an open column from the destination up to head height.
// Costs: `orthogonal_cost`/`diagonal_cost` per horizontal step plus
// `vertical_cost` when the level changes. A node satisfies the goal when it
// is in the goal's column within one cell vertically.
//
// `PathEngine` owns one search per agent and everything around it:
// - a global cap on searches in flight; further requests wait in a FIFO
//   queue and are promoted as slots free up;
// - `drive(grid, tick)` gives every in-flight search one chunk of
//   `nodes_per_tick` expansions per tick;
// - the path cache: the last completed path per agent keyed by the
//   quantized goal, returned as-is (same `Arc`) while fresh;
// - a failure memory so a failed goal is not searched again every tick;
// - cancellation when the agent drifts from the search origin or the goal
//   moves materially, or when the agent disappears (`forget`).
//
// See also: `grid.rs` for the walkability queries, `controller.rs` for the
// driver loop, `observer.rs` for the `PathEvent`s the engine emits.
//
// **Critical constraint: determinism.** Heap ties are broken by coordinate
// order; in-flight searches are driven in `AgentId` order.

use crate::config::PathfindingConfig;
use crate::error::SearchFailure;
use crate::grid::Grid;
use crate::observer::PathEvent;
use crate::types::{AgentId, Vec3, VoxelCoord};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::sync::Arc;

/// Horizontal neighbor offsets: orthogonals first, then diagonals.
const NEIGHBORS: [(i32, i32); 8] = [
    (0, -1),
    (1, 0),
    (0, 1),
    (-1, 0),
    (1, -1),
    (1, 1),
    (-1, 1),
    (-1, -1),
];

/// Vertical offset order for each horizontal neighbor.
const VERTICAL_OFFSETS: [i32; 5] = [0, 1, -1, 2, -2];

/// Where a search stands after an `advance` call.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchStatus {
    InProgress,
    /// Feet cells from start to goal (inclusive).
    Completed(Arc<[VoxelCoord]>),
    Failed(SearchFailure),
}

/// Entry in the A* open set (min-heap via reversed ordering).
struct OpenEntry {
    node: VoxelCoord,
    f_score: f32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_score.total_cmp(&other.f_score) == Ordering::Equal && self.node == other.node
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap: smallest f_score is "greatest".
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.node.cmp(&self.node))
    }
}

/// Per-step costs, copied out of the config at search creation.
#[derive(Clone, Copy, Debug)]
struct StepCosts {
    orthogonal: f32,
    diagonal: f32,
    vertical: f32,
}

/// One resumable A* search.
pub struct SearchState {
    start: VoxelCoord,
    goal: VoxelCoord,
    height: u8,
    radius: i32,
    max_nodes: u32,
    costs: StepCosts,
    open: BinaryHeap<OpenEntry>,
    g_score: FxHashMap<VoxelCoord, f32>,
    came_from: FxHashMap<VoxelCoord, VoxelCoord>,
    closed: FxHashSet<VoxelCoord>,
    expanded: u32,
    status: SearchStatus,
}

impl SearchState {
    /// Start a search for a body `height` cells tall. A goal outside the
    /// search radius fails immediately with `OutOfRange`.
    pub fn new(start: VoxelCoord, goal: VoxelCoord, height: u8, cfg: &PathfindingConfig) -> Self {
        let costs = StepCosts {
            orthogonal: cfg.orthogonal_cost,
            diagonal: cfg.diagonal_cost,
            vertical: cfg.vertical_cost,
        };
        let mut state = Self {
            start,
            goal,
            height: height.max(1),
            radius: cfg.search_radius,
            max_nodes: cfg.max_nodes,
            costs,
            open: BinaryHeap::new(),
            g_score: FxHashMap::default(),
            came_from: FxHashMap::default(),
            closed: FxHashSet::default(),
            expanded: 0,
            status: SearchStatus::InProgress,
        };
        let r = cfg.search_radius as i64;
        if start.horizontal_distance_sq(goal) > r * r {
            state.status = SearchStatus::Failed(SearchFailure::OutOfRange);
            return state;
        }
        state.g_score.insert(start, 0.0);
        state.open.push(OpenEntry {
            node: start,
            f_score: state.heuristic(start),
        });
        state
    }

    pub fn start(&self) -> VoxelCoord {
        self.start
    }

    pub fn goal(&self) -> VoxelCoord {
        self.goal
    }

    /// Nodes expanded over the life of the search.
    pub fn expanded(&self) -> u32 {
        self.expanded
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    /// Expand at most `budget` nodes and report where the search stands.
    /// A finished search returns its final status without doing any work.
    pub fn advance(&mut self, grid: &Grid, budget: u32) -> SearchStatus {
        if self.status != SearchStatus::InProgress {
            return self.status.clone();
        }
        let mut spent = 0;
        while spent < budget {
            let Some(current) = self.open.pop() else {
                self.status = SearchStatus::Failed(SearchFailure::Exhausted);
                return self.status.clone();
            };
            let node = current.node;
            if self.closed.contains(&node) {
                continue;
            }
            if self.is_goal(node) {
                self.status = SearchStatus::Completed(self.reconstruct_path(node));
                return self.status.clone();
            }
            if self.expanded >= self.max_nodes {
                self.status = SearchStatus::Failed(SearchFailure::NodeBudget {
                    expanded: self.expanded,
                });
                return self.status.clone();
            }
            self.closed.insert(node);
            self.expanded += 1;
            spent += 1;
            self.expand(grid, node);
        }
        SearchStatus::InProgress
    }

    fn is_goal(&self, node: VoxelCoord) -> bool {
        node.same_column(self.goal) && (node.y - self.goal.y).abs() <= 1
    }

    /// Octile distance in XZ plus the cheapest possible climb outside the
    /// vertical goal tolerance. Admissible: one step changes level by at
    /// most two cells for `vertical` cost.
    fn heuristic(&self, node: VoxelCoord) -> f32 {
        let dx = (node.x - self.goal.x).abs() as f32;
        let dz = (node.z - self.goal.z).abs() as f32;
        let (lo, hi) = if dx < dz { (dx, dz) } else { (dz, dx) };
        let flat = lo * self.costs.diagonal + (hi - lo) * self.costs.orthogonal;
        let dy = ((node.y - self.goal.y).abs() - 1).max(0) as f32;
        flat + dy * self.costs.vertical * 0.5
    }

    fn in_radius(&self, node: VoxelCoord) -> bool {
        let r = self.radius as i64;
        self.start.horizontal_distance_sq(node) <= r * r
    }

    /// First standable cell in the `(dx, dz)` column next to `from`, probing
    /// vertical offsets in order, with room to get there.
    fn step_target(&self, grid: &Grid, from: VoxelCoord, dx: i32, dz: i32) -> Option<VoxelCoord> {
        let h = self.height as i32;
        let base = from.offset(dx, 0, dz);
        VERTICAL_OFFSETS.into_iter().find_map(|dy| {
            let cand = base.up(dy);
            if !grid.is_standable(cand, self.height) {
                return None;
            }
            let clear = if dy > 0 {
                // Jump in place, then move over.
                (0..dy).all(|k| grid.is_passable(from.up(h + k)))
            } else if dy < 0 {
                // Walk out at the current level, then fall.
                (0..h - dy).all(|k| grid.is_passable(cand.up(k)))
            } else {
                true
            };
            clear.then_some(cand)
        })
    }

    fn expand(&mut self, grid: &Grid, node: VoxelCoord) {
        let current_g = self.g_score.get(&node).copied().unwrap_or(f32::INFINITY);
        for (dx, dz) in NEIGHBORS {
            let diagonal = dx != 0 && dz != 0;
            // No corner cutting: both orthogonal cells must be open at body
            // height.
            if diagonal
                && !(grid.has_headroom(node.offset(dx, 0, 0), self.height)
                    && grid.has_headroom(node.offset(0, 0, dz), self.height))
            {
                continue;
            }
            let Some(next) = self.step_target(grid, node, dx, dz) else {
                continue;
            };
            if !self.in_radius(next) || self.closed.contains(&next) {
                continue;
            }
            let mut cost = if diagonal {
                self.costs.diagonal
            } else {
                self.costs.orthogonal
            };
            if next.y != node.y {
                cost += self.costs.vertical;
            }
            let tentative = current_g + cost;
            if tentative < self.g_score.get(&next).copied().unwrap_or(f32::INFINITY) {
                self.g_score.insert(next, tentative);
                self.came_from.insert(next, node);
                self.open.push(OpenEntry {
                    node: next,
                    f_score: tentative + self.heuristic(next),
                });
            }
        }
    }

    fn reconstruct_path(&self, end: VoxelCoord) -> Arc<[VoxelCoord]> {
        let mut nodes = vec![end];
        let mut current = end;
        while current != self.start {
            match self.came_from.get(&current) {
                Some(&prev) => {
                    nodes.push(prev);
                    current = prev;
                }
                None => break,
            }
        }
        nodes.reverse();
        nodes.into()
    }
}

// ---------------------------------------------------------------------------
// Per-agent engine
// ---------------------------------------------------------------------------

/// Answer to a path request.
#[derive(Clone, Debug, PartialEq)]
pub enum PathResponse {
    /// A fresh path to (the quantized) goal.
    Ready(Arc<[VoxelCoord]>),
    /// A search is in flight.
    Pending,
    /// Waiting for a search slot.
    Queued,
    /// The last search to this goal failed; retry after the cooldown.
    Failed(SearchFailure),
}

struct ActiveSearch {
    state: SearchState,
    origin: Vec3,
    goal_key: VoxelCoord,
}

struct CachedPath {
    path: Arc<[VoxelCoord]>,
    goal_key: VoxelCoord,
    tick: u64,
}

struct FailedSearch {
    goal_key: VoxelCoord,
    failure: SearchFailure,
    tick: u64,
}

struct QueuedRequest {
    agent: AgentId,
    origin: Vec3,
    goal: VoxelCoord,
    height: u8,
}

/// All pathfinding state for all agents.
pub struct PathEngine {
    cfg: PathfindingConfig,
    active: BTreeMap<AgentId, ActiveSearch>,
    queue: VecDeque<QueuedRequest>,
    cache: BTreeMap<AgentId, CachedPath>,
    failures: BTreeMap<AgentId, FailedSearch>,
    events: Vec<(AgentId, PathEvent)>,
    last_drive_tick: Option<u64>,
    searches_started: u64,
}

impl PathEngine {
    pub fn new(cfg: PathfindingConfig) -> Self {
        Self {
            cfg,
            active: BTreeMap::new(),
            queue: VecDeque::new(),
            cache: BTreeMap::new(),
            failures: BTreeMap::new(),
            events: Vec::new(),
            last_drive_tick: None,
            searches_started: 0,
        }
    }

    fn goal_key(&self, goal: VoxelCoord) -> VoxelCoord {
        let q = self.cfg.goal_quantum.max(1);
        VoxelCoord::new(goal.x.div_euclid(q), goal.y.div_euclid(q), goal.z.div_euclid(q))
    }

    /// Searches currently in flight.
    pub fn active_searches(&self) -> usize {
        self.active.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Total searches ever started (diagnostics, tests).
    pub fn searches_started(&self) -> u64 {
        self.searches_started
    }

    /// The in-flight search of `agent`.
    pub fn search(&self, agent: AgentId) -> Option<&SearchState> {
        self.active.get(&agent).map(|a| &a.state)
    }

    /// Events since the last drain, in order.
    pub fn drain_events(&mut self) -> Vec<(AgentId, PathEvent)> {
        std::mem::take(&mut self.events)
    }

    /// Ask for a path from `origin` (the agent's feet position) to `goal`.
    /// Never searches inline; `drive` does the work.
    pub fn request_path(
        &mut self,
        agent: AgentId,
        origin: Vec3,
        goal: VoxelCoord,
        height: u8,
        tick: u64,
    ) -> PathResponse {
        let key = self.goal_key(goal);

        if let Some(cached) = self.cache.get(&agent) {
            if cached.goal_key == key && tick < cached.tick.saturating_add(self.cfg.cache_fresh_ticks) {
                return PathResponse::Ready(Arc::clone(&cached.path));
            }
        }
        if let Some(failed) = self.failures.get(&agent) {
            if failed.goal_key == key && tick < failed.tick.saturating_add(self.cfg.retry_cooldown_ticks) {
                return PathResponse::Failed(failed.failure);
            }
        }

        if let Some(active) = self.active.get(&agent) {
            let displaced = active.origin.distance(origin) > self.cfg.displacement_cancel;
            let goal_moved = active.state.goal().manhattan_distance(goal) > self.cfg.goal_change_cancel;
            if !displaced && !goal_moved {
                return PathResponse::Pending;
            }
            self.active.remove(&agent);
            self.events.push((agent, PathEvent::Cancelled));
        }

        if let Some(queued) = self.queue.iter_mut().find(|q| q.agent == agent) {
            queued.origin = origin;
            queued.goal = goal;
            queued.height = height;
            return PathResponse::Queued;
        }

        if self.active.len() >= self.cfg.max_concurrent_searches {
            self.queue.push_back(QueuedRequest {
                agent,
                origin,
                goal,
                height,
            });
            self.events.push((agent, PathEvent::Queued));
            return PathResponse::Queued;
        }

        self.start_search(agent, origin, goal, height, tick)
    }

    fn start_search(&mut self, agent: AgentId, origin: Vec3, goal: VoxelCoord, height: u8, tick: u64) -> PathResponse {
        let state = SearchState::new(VoxelCoord::containing(origin), goal, height, &self.cfg);
        let goal_key = self.goal_key(goal);
        self.searches_started += 1;
        self.events.push((agent, PathEvent::Started));
        if let SearchStatus::Failed(failure) = state.status().clone() {
            self.record_failure(agent, goal_key, failure, tick);
            return PathResponse::Failed(failure);
        }
        self.active.insert(
            agent,
            ActiveSearch {
                state,
                origin,
                goal_key,
            },
        );
        PathResponse::Pending
    }

    fn record_failure(&mut self, agent: AgentId, goal_key: VoxelCoord, failure: SearchFailure, tick: u64) {
        self.failures.insert(
            agent,
            FailedSearch {
                goal_key,
                failure,
                tick,
            },
        );
        self.events.push((agent, PathEvent::Failed(failure)));
    }

    /// Give every in-flight search one chunk of work, then fill free slots
    /// from the queue. A second call within the same tick does nothing.
    pub fn drive(&mut self, grid: &Grid, tick: u64) {
        if self.last_drive_tick == Some(tick) {
            return;
        }
        self.last_drive_tick = Some(tick);

        let budget = self.cfg.nodes_per_tick;
        let mut finished = Vec::new();
        for (&agent, search) in &mut self.active {
            match search.state.advance(grid, budget) {
                SearchStatus::InProgress => {}
                status => finished.push((agent, search.goal_key, status)),
            }
        }
        for (agent, goal_key, status) in finished {
            self.active.remove(&agent);
            match status {
                SearchStatus::Completed(path) => {
                    self.events.push((agent, PathEvent::Completed { len: path.len() }));
                    self.failures.remove(&agent);
                    self.cache.insert(agent, CachedPath { path, goal_key, tick });
                }
                SearchStatus::Failed(failure) => self.record_failure(agent, goal_key, failure, tick),
                SearchStatus::InProgress => {}
            }
        }

        while self.active.len() < self.cfg.max_concurrent_searches {
            let Some(req) = self.queue.pop_front() else {
                break;
            };
            self.start_search(req.agent, req.origin, req.goal, req.height, tick);
        }
    }

    /// Drop the cached path of `agent` (terrain changed under it).
    pub fn invalidate_path(&mut self, agent: AgentId) {
        self.cache.remove(&agent);
    }

    /// Drop every piece of state belonging to `agent`.
    pub fn forget(&mut self, agent: AgentId) {
        if self.active.remove(&agent).is_some() {
            self.events.push((agent, PathEvent::Cancelled));
        }
        self.queue.retain(|q| q.agent != agent);
        self.cache.remove(&agent);
        self.failures.remove(&agent);
    }

    /// Forget every agent for which `alive` is false.
    pub fn prune(&mut self, alive: impl Fn(AgentId) -> bool) {
        let stale: Vec<AgentId> = self
            .active
            .keys()
            .chain(self.cache.keys())
            .chain(self.failures.keys())
            .copied()
            .chain(self.queue.iter().map(|q| q.agent))
            .filter(|&a| !alive(a))
            .collect();
        for agent in stale {
            self.forget(agent);
        }
    }
}
