// Terrain carving: strategy selection and execution.
//
// Carving is split in two steps:
//
// 1. `select_strategy()` is a pure function of the grid and an agent/target
//    snapshot (`StrategyInput`). It returns a tagged `Strategy`, checked in
//    priority order:
//    - no carve rights → `Walk` (the agent chases like a non-mining hostile);
//    - an escape heading from the stuck scan → `Escape`;
//    - target close, not far above, standing on elevated breakable support
//      (pillar or bridge) whose top is within reach below → `Pitfall`;
//    - the walkability test passes → `Walk`;
//    - |dy| <= 1 → `Tunnel`;
//    - dy >= 2 → `StairUp` (or `Spiral` when enabled and the target is
//      nearly straight above);
//    - dy <= -2 → `Spiral` (enabled, straight below), `Ramp` (moderate drop
//      with horizontal room) or `StairDown`.
//
// 2. `CarveEngine::execute()` turns the strategy into an ordered candidate
//    list for the agent's current position, runs each candidate through the
//    break policy (`CarveRegistry::check_break`) and the carve lock, and
//    works on the first cell that passes. Exactly one cell is worked per
//    call. Mining progress accrues per call (the agent's mining budget
//    scaled by difficulty, and by the tunnel multiplier while tunneling);
//    the cell breaks once progress reaches its hardness. After a break the
//    strategy's structural cells (stair footholds, supports, spiral pillar)
//    are registered as protected, and the cells an upward climb stands on
//    are held as climb supports until `end_climb()`.
//
// Candidate geometry, with F = feet cell, H = body height, d = heading,
// N = F + d:
// - Tunnel: N's body column, top first. The foot-level cell is skipped
//   while the agent is airborne or rising, and a one-cell step up keeps its
//   step block and instead opens the space above it.
// - StairUp: N+1 (where the feet go next), F+H (above the head, for the
//   jump), N+2..=N+H. N, the block under F and the foothold behind are
//   structure: protected, and held as climb supports.
// - StairDown: N's body column, then N-1, but only if something solid lies
//   within `max_safe_drop` below it.
// - Ramp: N's body column, then the column of N + d one level down:
//   one level lower every two cells.
// - Pitfall: the target's support column, top first, bounded by
//   `pitfall_max_depth` and by `pitfall_max_reach_down` below the agent.
// - Spiral: a one-cell stair that walks the 3x3 ring around a center pillar
//   column, turning 90° whenever the next cell would leave the ring
//   (clockwise ascending with the pillar on the right, counter-clockwise
//   descending). The pillar, the last foothold and the next foothold are
//   never broken.
// - Escape: the cells in the stuck scan's direction.
//
// See also: `registry.rs` for the break policy and registries,
// `build_plan.rs` for the heading hint, `stuck.rs` for escape directions.
//
// **Critical constraint: determinism.** Candidate lists are fixed-order;
// per-agent maps are `BTreeMap`s.

use crate::config::{CarvingConfig, DifficultyScaling};
use crate::error::CarveError;
use crate::grid::Grid;
use crate::registry::{BreakContext, CarveRegistry};
use crate::sim::Agent;
use crate::types::{AgentId, Direction, Vec3, VoxelCoord, VoxelType};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// What an agent does about the terrain between it and its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// No carving: move with the path or direct steering.
    Walk,
    Tunnel { dir: Direction },
    StairUp { dir: Direction },
    StairDown { dir: Direction },
    Ramp { dir: Direction },
    /// Break the support under the target standing at `column`.
    Pitfall { column: VoxelCoord },
    Spiral { ascending: bool },
    Escape { dir: Direction },
}

impl Strategy {
    pub fn carves(self) -> bool {
        self != Strategy::Walk
    }

    /// Whether an agent on a stair keeps its climb supports under this
    /// strategy. Escaping from a stuck climb does not end it.
    pub fn holds_climb(self) -> bool {
        matches!(
            self,
            Strategy::StairUp { .. } | Strategy::Spiral { ascending: true } | Strategy::Escape { .. }
        )
    }
}

/// Snapshot of agent and target that strategy selection reads.
#[derive(Clone, Copy, Debug)]
pub struct StrategyInput {
    pub agent_position: Vec3,
    pub height: u8,
    pub target_position: Vec3,
    pub carve_rights: bool,
    /// Heading suggested by the agent's build plan.
    pub heading: Option<Direction>,
    /// Escape heading from the stuck scan.
    pub escape: Option<Direction>,
}

impl StrategyInput {
    fn agent_feet(&self) -> VoxelCoord {
        VoxelCoord::containing(self.agent_position)
    }

    fn target_feet(&self) -> VoxelCoord {
        VoxelCoord::containing(self.target_position)
    }
}

/// Pick the carving strategy for one agent.
pub fn select_strategy(grid: &Grid, input: &StrategyInput, cfg: &CarvingConfig) -> Strategy {
    if !input.carve_rights {
        return Strategy::Walk;
    }
    if let Some(dir) = input.escape {
        return Strategy::Escape { dir };
    }

    if let Some(column) = pitfall_column(grid, input.agent_position, input.target_position, cfg) {
        return Strategy::Pitfall { column };
    }

    let feet = input.agent_feet();
    let target_feet = input.target_feet();
    let delta = input.target_position - input.agent_position;
    let horizontal = delta.horizontal_length();
    let dy = target_feet.y - feet.y;

    if is_walkable(grid, input.agent_position, input.target_position, input.height, cfg) {
        return Strategy::Walk;
    }

    let primary = input
        .heading
        .unwrap_or_else(|| Direction::toward_horizontal(delta.x, delta.z));
    if dy.abs() <= 1 {
        return Strategy::Tunnel { dir: primary };
    }

    let shaft = cfg.spiral_enabled && horizontal < cfg.shaft_radius;
    if dy >= 2 {
        if shaft {
            Strategy::Spiral { ascending: true }
        } else {
            Strategy::StairUp {
                dir: stair_up_direction(grid, feet, primary, delta),
            }
        }
    } else if shaft {
        Strategy::Spiral { ascending: false }
    } else if (cfg.ramp_min_drop..=cfg.ramp_max_drop).contains(&-dy) && horizontal >= cfg.ramp_min_horizontal {
        Strategy::Ramp { dir: primary }
    } else {
        Strategy::StairDown {
            dir: stair_down_direction(grid, feet, primary, delta, cfg.max_safe_drop),
        }
    }
}

/// The target's feet cell, when a pitfall can drop it: the target is close,
/// not far above, up on elevated breakable support, and the top support cell
/// lies within `pitfall_max_reach_down` below the agent's feet.
pub fn pitfall_column(grid: &Grid, agent_position: Vec3, target_position: Vec3, cfg: &CarvingConfig) -> Option<VoxelCoord> {
    let feet = VoxelCoord::containing(agent_position);
    let target_feet = VoxelCoord::containing(target_position);
    let horizontal = (target_position - agent_position).horizontal_length();
    let dy = target_feet.y - feet.y;
    let reachable = target_feet.down(1).y >= pitfall_floor(feet, cfg);
    (horizontal <= cfg.pitfall_max_horizontal
        && dy <= cfg.pitfall_max_dy
        && reachable
        && target_elevated(grid, target_feet, cfg.pitfall_scan_depth))
    .then_some(target_feet)
}

/// Lowest level a pitfall dug by an agent at `feet` may break.
fn pitfall_floor(feet: VoxelCoord, cfg: &CarvingConfig) -> i32 {
    feet.y - cfg.pitfall_max_reach_down
}

/// Headings worth trying for a stair, best first: the primary heading, the
/// minor axis toward the target, then the two perpendiculars.
fn heading_candidates(primary: Direction, delta: Vec3) -> SmallVec<[Direction; 4]> {
    let mut dirs: SmallVec<[Direction; 4]> = SmallVec::new();
    for d in [
        primary,
        Direction::secondary_horizontal(delta.x, delta.z),
        primary.rotate_cw(),
        primary.rotate_ccw(),
    ] {
        if !dirs.contains(&d) && d != primary.opposite() {
            dirs.push(d);
        }
    }
    dirs
}

/// First heading with a solid block ahead to climb onto.
fn stair_up_direction(grid: &Grid, feet: VoxelCoord, primary: Direction, delta: Vec3) -> Direction {
    heading_candidates(primary, delta)
        .into_iter()
        .find(|&d| grid.is_solid(feet.step(d)))
        .unwrap_or(primary)
}

/// First heading with safe support below the next step down.
fn stair_down_direction(grid: &Grid, feet: VoxelCoord, primary: Direction, delta: Vec3, max_drop: i32) -> Direction {
    heading_candidates(primary, delta)
        .into_iter()
        .find(|&d| support_within(grid, feet.step(d).down(1), max_drop).is_some())
        .unwrap_or(primary)
}

/// The first solid cell under feet cell `feet`, if it is at most `max_drop`
/// cells of fall away.
fn support_within(grid: &Grid, feet: VoxelCoord, max_drop: i32) -> Option<VoxelCoord> {
    (1..=max_drop + 1)
        .map(|k| feet.down(k))
        .find(|&c| grid.is_solid(c))
}

/// Whether a target standing at `feet` is up on breakable support with open
/// drops beside it: at least three of the eight surrounding columns are open
/// for two or more cells below the target's feet (scanning at most
/// `scan_depth` cells down).
pub fn target_elevated(grid: &Grid, feet: VoxelCoord, scan_depth: i32) -> bool {
    if !grid.is_breakable(feet.down(1)) {
        return false;
    }
    let mut open_sides = 0;
    for dx in -1..=1 {
        for dz in -1..=1 {
            if dx == 0 && dz == 0 {
                continue;
            }
            let drop = (1..=scan_depth)
                .take_while(|&k| grid.is_passable(feet.offset(dx, -k, dz)))
                .count();
            if drop >= 2 {
                open_sides += 1;
            }
        }
    }
    open_sides >= 3
}

/// Whether the agent can reach the target by moving, without carving.
///
/// Samples the straight line from agent feet to target feet every
/// `walk_sample_step`. Each sample's body cells may be obstructed by
/// breakable material (counted) or unbreakable material (fails at once).
/// More than one cell of consecutive floor gap fails, and so does a target
/// cell without headroom for the agent or a climb steeper than one level per
/// cell. Otherwise walkable when the obstructed fraction is below
/// `obstruction_tolerance`.
pub fn is_walkable(grid: &Grid, from: Vec3, to: Vec3, height: u8, cfg: &CarvingConfig) -> bool {
    let start = VoxelCoord::containing(from);
    let end = VoxelCoord::containing(to);
    let delta = to - from;
    let horizontal = delta.horizontal_length();
    let dy = end.y - start.y;
    if dy > 1 && dy as f32 > horizontal {
        return false;
    }
    if !grid.has_headroom(end, height) {
        return false;
    }

    let step = cfg.walk_sample_step.max(0.05);
    let samples = (horizontal / step).ceil() as usize;
    let mut total = 0usize;
    let mut obstructed = 0usize;
    let mut gap_run = 0.0f32;
    for i in 1..=samples {
        let cell = VoxelCoord::containing(from + delta * (i as f32 / samples as f32));
        if cell == start {
            continue;
        }
        total += 1;
        let mut blocked = false;
        for k in 0..height as i32 {
            let info = grid.cell(cell.up(k));
            if info.solid {
                if !info.breakable {
                    return false;
                }
                blocked = true;
            }
        }
        if blocked {
            obstructed += 1;
        }
        if grid.is_passable(cell.down(1)) && grid.is_passable(cell.down(2)) {
            gap_run += step;
            if gap_run > 1.0 {
                return false;
            }
        } else {
            gap_run = 0.0;
        }
    }
    total == 0 || (obstructed as f32 / total as f32) < cfg.obstruction_tolerance
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Per-agent spiral staircase state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpiralState {
    /// The pillar column (y is the level the spiral started at).
    pub center: VoxelCoord,
    pub dir: Direction,
    pub ascending: bool,
    pub steps: u32,
    pub last_foothold: Option<VoxelCoord>,
    last_feet: VoxelCoord,
    last_used: u64,
}

impl SpiralState {
    fn in_ring(&self, cell: VoxelCoord) -> bool {
        let dx = (cell.x - self.center.x).abs();
        let dz = (cell.z - self.center.z).abs();
        dx <= 1 && dz <= 1 && (dx, dz) != (0, 0)
    }
}

#[derive(Clone, Copy, Debug)]
struct MiningProgress {
    cell: VoxelCoord,
    amount: f32,
}

/// The agent-side facts `execute` needs.
#[derive(Clone, Copy, Debug)]
pub struct CarveContext {
    pub agent: AgentId,
    pub position: Vec3,
    pub height: u8,
    pub eye: Vec3,
    /// Airborne or rising: the foot-level tunnel cell is left alone.
    pub climbing: bool,
    /// Mining progress per call, difficulty already applied.
    pub mining_rate: f32,
    pub tunnel_multiplier: f32,
    pub stuck_ticks: u64,
    /// The stuck counter has crossed the extended threshold.
    pub extended_stuck: bool,
    pub tick: u64,
    pub target_position: Vec3,
}

impl CarveContext {
    pub fn for_agent(
        agent: &Agent,
        scaling: &DifficultyScaling,
        eye_inset: f32,
        rising_speed: f32,
        target_position: Vec3,
        tick: u64,
    ) -> Self {
        Self {
            agent: agent.id,
            position: agent.position,
            height: agent.tunnel_height.max(1),
            eye: agent.eye(eye_inset),
            climbing: !agent.on_ground || agent.velocity.y > rising_speed,
            mining_rate: agent.mining_budget * scaling.mining_speed_multiplier,
            tunnel_multiplier: scaling.tunnel_break_multiplier,
            stuck_ticks: 0,
            extended_stuck: false,
            tick,
            target_position,
        }
    }

    fn feet(&self) -> VoxelCoord {
        VoxelCoord::containing(self.position)
    }
}

/// What one `execute` call did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CarveReport {
    pub broken: Option<(VoxelCoord, VoxelType)>,
    /// Cell being mined that has not broken yet.
    pub mining: Option<VoxelCoord>,
    /// Feet cell the agent should step toward.
    pub next_step: Option<VoxelCoord>,
    pub refusals: SmallVec<[(VoxelCoord, CarveError); 4]>,
}

/// Candidate cells and structure for one strategy at one position.
#[derive(Default)]
struct CarvePlan {
    candidates: SmallVec<[VoxelCoord; 8]>,
    protect: SmallVec<[VoxelCoord; 8]>,
    /// Cells the climb stands on; never broken while the climb lasts.
    supports: SmallVec<[VoxelCoord; 4]>,
    pillar: Option<VoxelCoord>,
    next_step: Option<VoxelCoord>,
    allow_foothold: bool,
    refusals: SmallVec<[(VoxelCoord, CarveError); 4]>,
}

impl CarvePlan {
    /// Push `column`'s body cells from `top` down to `bottom` offsets.
    fn column(&mut self, base: VoxelCoord, top: i32, bottom: i32) {
        for k in (bottom..=top).rev() {
            self.candidates.push(base.up(k));
        }
    }
}

/// Carving state for every agent plus the shared registries.
#[derive(Clone, Debug)]
pub struct CarveEngine {
    pub registry: CarveRegistry,
    spirals: BTreeMap<AgentId, SpiralState>,
    progress: BTreeMap<AgentId, MiningProgress>,
    cfg: CarvingConfig,
}

impl CarveEngine {
    pub fn new(cfg: CarvingConfig, extended_stuck_ticks: u64) -> Self {
        Self {
            registry: CarveRegistry::new(
                cfg.protection_window_ticks,
                cfg.lock_duration_ticks,
                cfg.reach,
                extended_stuck_ticks,
            ),
            spirals: BTreeMap::new(),
            progress: BTreeMap::new(),
            cfg,
        }
    }

    pub fn spiral(&self, agent: AgentId) -> Option<&SpiralState> {
        self.spirals.get(&agent)
    }

    /// Work on one cell for `strategy`. Never breaks more than one cell.
    pub fn execute(&mut self, grid: &mut Grid, strategy: Strategy, ctx: &CarveContext) -> CarveReport {
        let plan = match strategy {
            Strategy::Walk => return CarveReport::default(),
            Strategy::Tunnel { dir } => self.tunnel_plan(grid, dir, ctx),
            Strategy::StairUp { dir } => self.stair_up_plan(grid, ctx.feet(), dir, ctx.height),
            Strategy::StairDown { dir } => self.stair_down_plan(grid, ctx.feet(), dir, ctx.height),
            Strategy::Ramp { dir } => self.ramp_plan(grid, dir, ctx),
            Strategy::Pitfall { column } => self.pitfall_plan(column, ctx),
            Strategy::Spiral { ascending } => self.spiral_plan(grid, ascending, ctx),
            Strategy::Escape { dir } => self.escape_plan(dir, ctx),
        };

        let mut report = CarveReport {
            next_step: plan.next_step,
            refusals: plan.refusals,
            ..CarveReport::default()
        };
        let mut rate = ctx.mining_rate;
        if matches!(strategy, Strategy::Tunnel { .. }) {
            rate *= ctx.tunnel_multiplier;
        }
        if rate <= 0.0 {
            return report;
        }

        let bctx = BreakContext {
            agent: ctx.agent,
            eye: ctx.eye,
            feet: ctx.feet(),
            stuck_ticks: ctx.stuck_ticks,
            tick: ctx.tick,
            allow_foothold: plan.allow_foothold,
        };
        for &cell in &plan.candidates {
            if plan.pillar.is_some_and(|p| p.same_column(cell)) {
                report.refusals.push((cell, CarveError::CenterPillar));
                continue;
            }
            if !grid.is_solid(cell) {
                continue;
            }
            let voxel = match self.registry.check_break(grid, cell, &bctx) {
                Ok(voxel) => voxel,
                Err(reason) => {
                    report.refusals.push((cell, reason));
                    continue;
                }
            };
            if let Err(reason) = self.registry.locks.try_acquire(cell, ctx.agent, ctx.tick) {
                report.refusals.push((cell, reason));
                continue;
            }

            let progress = self.progress.entry(ctx.agent).or_insert(MiningProgress { cell, amount: 0.0 });
            if progress.cell != cell {
                self.registry.locks.release(progress.cell, ctx.agent);
                *progress = MiningProgress { cell, amount: 0.0 };
            }
            progress.amount += rate;
            let hardness = voxel.hardness().unwrap_or(f32::INFINITY);
            if progress.amount + 1e-4 < hardness {
                report.mining = Some(cell);
                return report;
            }

            self.progress.remove(&ctx.agent);
            self.registry.locks.release(cell, ctx.agent);
            match grid.break_cell(cell) {
                Ok(broken) => {
                    for &p in &plan.protect {
                        if grid.is_solid(p) {
                            self.registry.protected.protect(p, ctx.agent, ctx.tick);
                        }
                    }
                    for &p in &plan.supports {
                        if grid.is_solid(p) {
                            self.registry.supports.hold(p, ctx.agent);
                        }
                    }
                    report.broken = Some((cell, broken));
                }
                Err(reason) => report.refusals.push((cell, reason)),
            }
            return report;
        }
        report
    }

    fn tunnel_plan(&self, grid: &Grid, dir: Direction, ctx: &CarveContext) -> CarvePlan {
        let mut plan = CarvePlan::default();
        let feet = ctx.feet();
        let h = ctx.height as i32;
        let n = feet.step(dir);
        let dy = VoxelCoord::containing(ctx.target_position).y - feet.y;
        if dy >= 1 && grid.is_solid(n) {
            // Step up onto N: open the space above it and above our head.
            plan.candidates.push(n.up(h));
            plan.candidates.push(feet.up(h));
            plan.column(n, h - 1, 1);
            plan.next_step = Some(n.up(1));
            return plan;
        }
        let bottom = if ctx.climbing { 1 } else { 0 };
        plan.column(n, h - 1, bottom);
        if dy <= -1 && !ctx.climbing {
            match support_within(grid, n.down(1), self.cfg.max_safe_drop) {
                Some(_) => plan.candidates.push(n.down(1)),
                None => plan.refusals.push((n.down(1), CarveError::NoFoothold)),
            }
        }
        plan.next_step = Some(n);
        plan
    }

    fn stair_up_plan(&self, grid: &Grid, feet: VoxelCoord, dir: Direction, height: u8) -> CarvePlan {
        let mut plan = CarvePlan::default();
        let h = height as i32;
        let n = feet.step(dir);
        plan.candidates.push(n.up(1));
        plan.candidates.push(feet.up(h));
        for k in 2..=h {
            plan.candidates.push(n.up(k));
        }
        let behind = feet.step(dir.opposite()).down(2);
        plan.supports.push(n);
        plan.supports.push(feet.down(1));
        if grid.is_solid(behind) {
            plan.supports.push(behind);
        }
        plan.protect.extend_from_slice(&plan.supports);
        plan.next_step = Some(n.up(1));
        plan
    }

    fn stair_down_plan(&self, grid: &Grid, feet: VoxelCoord, dir: Direction, height: u8) -> CarvePlan {
        let mut plan = CarvePlan::default();
        let h = height as i32;
        let n = feet.step(dir);
        plan.column(n, h - 1, 0);
        let step = n.down(1);
        match support_within(grid, step, self.cfg.max_safe_drop) {
            Some(support) => {
                plan.candidates.push(step);
                plan.protect.push(support);
            }
            None => plan.refusals.push((step, CarveError::NoFoothold)),
        }
        plan.protect.push(feet.down(1));
        plan.next_step = Some(step);
        plan
    }

    fn ramp_plan(&self, grid: &Grid, dir: Direction, ctx: &CarveContext) -> CarvePlan {
        let mut plan = CarvePlan::default();
        let feet = ctx.feet();
        let h = ctx.height as i32;
        let n = feet.step(dir);
        let m = n.step(dir);
        plan.column(n, h - 1, 0);
        plan.column(m, h - 2, 0);
        match support_within(grid, m.down(1), self.cfg.max_safe_drop) {
            Some(support) => {
                plan.candidates.push(m.down(1));
                plan.protect.push(support);
            }
            None => plan.refusals.push((m.down(1), CarveError::NoFoothold)),
        }
        plan.protect.push(n.down(1));
        let n_open = (0..h).all(|k| grid.is_passable(n.up(k)));
        plan.next_step = Some(if n_open { m.down(1) } else { n });
        plan
    }

    fn pitfall_plan(&self, column: VoxelCoord, ctx: &CarveContext) -> CarvePlan {
        let mut plan = CarvePlan::default();
        let floor = pitfall_floor(ctx.feet(), &self.cfg);
        for k in 1..=self.cfg.pitfall_max_depth {
            let cell = column.down(k);
            if cell.y < floor {
                break;
            }
            plan.candidates.push(cell);
        }
        plan
    }

    fn escape_plan(&self, dir: Direction, ctx: &CarveContext) -> CarvePlan {
        let mut plan = CarvePlan::default();
        let feet = ctx.feet();
        let h = ctx.height as i32;
        match dir {
            Direction::Up => {
                plan.candidates.push(feet.up(h));
                plan.candidates.push(feet.up(h + 1));
            }
            Direction::Down => {
                plan.candidates.push(feet.down(1));
                plan.allow_foothold = ctx.extended_stuck;
            }
            horizontal => plan.column(feet.step(horizontal), h - 1, 0),
        }
        plan.next_step = Some(feet.step(dir));
        plan
    }

    fn spiral_plan(&mut self, grid: &Grid, ascending: bool, ctx: &CarveContext) -> CarvePlan {
        let feet = ctx.feet();
        let reset_after = self.cfg.spiral_reset_ticks;
        let keep = self.spirals.get(&ctx.agent).is_some_and(|s| {
            s.ascending == ascending
                && ctx.tick <= s.last_used.saturating_add(reset_after)
                && (s.in_ring(feet) || s.last_feet == feet)
        });
        if !keep {
            let delta = ctx.target_position - ctx.position;
            let dir = if delta.horizontal_length() > 0.5 {
                Direction::toward_horizontal(delta.x, delta.z)
            } else {
                Direction::East
            };
            let side = if ascending { dir.rotate_cw() } else { dir.rotate_ccw() };
            self.spirals.insert(
                ctx.agent,
                SpiralState {
                    center: feet.step(side),
                    dir,
                    ascending,
                    steps: 0,
                    last_foothold: None,
                    last_feet: feet,
                    last_used: ctx.tick,
                },
            );
        }
        let Some(state) = self.spirals.get_mut(&ctx.agent) else {
            return CarvePlan::default();
        };

        if state.last_feet != feet {
            state.steps += 1;
            state.last_foothold = Some(state.last_feet.down(1));
            state.last_feet = feet;
        }
        if !state.in_ring(feet.step(state.dir)) {
            state.dir = if ascending {
                state.dir.rotate_cw()
            } else {
                state.dir.rotate_ccw()
            };
        }
        state.last_used = ctx.tick;
        let state = state.clone();

        let mut plan = if ascending {
            self.stair_up_plan(grid, feet, state.dir, ctx.height)
        } else {
            self.stair_down_plan(grid, feet, state.dir, ctx.height)
        };
        plan.pillar = Some(state.center);
        let h = ctx.height as i32;
        for k in -2..=h + 1 {
            let pillar = VoxelCoord::new(state.center.x, feet.y + k, state.center.z);
            if grid.is_solid(pillar) {
                plan.protect.push(pillar);
            }
        }
        if let Some(last) = state.last_foothold {
            plan.protect.push(last);
            if ascending {
                plan.supports.push(last);
            }
        }
        plan
    }

    /// Drop the spiral of `agent` (target moved, strategy changed).
    pub fn reset_spiral(&mut self, agent: AgentId) {
        self.spirals.remove(&agent);
    }

    /// Free the supports of `agent`'s climb.
    pub fn end_climb(&mut self, agent: AgentId) {
        self.registry.supports.release(agent);
    }

    /// Drop every piece of per-agent carving state.
    pub fn forget(&mut self, agent: AgentId) {
        self.spirals.remove(&agent);
        self.progress.remove(&agent);
        self.registry.locks.release_all(agent);
        self.end_climb(agent);
    }

    pub fn prune(&mut self, alive: impl Fn(AgentId) -> bool) {
        let climbers = self.registry.supports.climbers();
        let stale: Vec<AgentId> = self
            .spirals
            .keys()
            .chain(self.progress.keys())
            .chain(climbers.iter())
            .copied()
            .filter(|&a| !alive(a))
            .collect();
        for agent in stale {
            self.forget(agent);
        }
    }

    /// Expire registry entries and abandoned spirals.
    pub fn compact(&mut self, tick: u64) {
        self.registry.compact(tick);
        let reset_after = self.cfg.spiral_reset_ticks;
        self.spirals
            .retain(|_, s| tick <= s.last_used.saturating_add(reset_after));
    }
}
