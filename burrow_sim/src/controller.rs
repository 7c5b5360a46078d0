// The engine entry point: one `run_ai()` call processes a batch of agents.
//
// `NavController` owns every subsystem and the config, and runs each agent
// through the same pipeline:
//
// 1. Target acquisition (`targeting.rs`). No target → drop the agent's
//    transient state and stop.
// 2. Moved-away check: if the target has moved more than
//    `moved_away_threshold` from where this agent last anchored on it, the
//    build plan is abandoned, the spiral reset, carve locks released and the
//    cached path invalidated.
// 3. Contact: an agent within `arrival_radius` of its target stops, unless
//    the target stands on support it can dig out (`pitfall_column`).
// 4. Stuck watchdog (`stuck.rs`), skipped while in contact.
// 5. Path request (`pathfinding.rs`). A ready path is followed with
//    `steer_along_path`, except while a pitfall applies.
// 6. Otherwise (searching, queued, or failed) the carving state machine:
//    build-plan heading, escape heading when stuck long enough, strategy
//    selection, one `execute` call, then a single-step impulse toward the
//    strategy's next foothold once it is standable.
//
// The host scheduler calls `run_ai()` every tick; the controller itself
// honors `tick_interval()`, which grows with the agent count, and skips
// calls that come too early. Each run drives the in-flight searches once,
// processes at most `max_agents_per_tick` agents in round-robin ID order
// (continuing after the last agent served), and periodically compacts the
// cell-keyed registries.
//
// Failures never escape: a failed host call is reported to the observer and
// ignored, a stale agent or target reference means "target lost".
//
// See also: `sim.rs` for the world the controller runs against, `host.rs`
// and `observer.rs` for the two outward interfaces.
//
// **Critical constraint: determinism.** Agents are visited in ID order from a
// stored cursor and every subsystem is deterministic, so a run is a pure
// function of (world, controller state, host difficulty).

use crate::build_plan::BuildPlanner;
use crate::carving::{CarveContext, CarveEngine, Strategy, StrategyInput, pitfall_column, select_strategy};
use crate::config::{DifficultyScaling, NavConfig};
use crate::grid::Grid;
use crate::host::{Effect, Host};
use crate::observer::NavObserver;
use crate::pathfinding::{PathEngine, PathResponse};
use crate::sim::SimWorld;
use crate::steering::{steer_along_path, steer_single_step};
use crate::stuck::{StuckStatus, StuckTracker, escape_direction};
use crate::targeting::TargetCoordinator;
use crate::types::{AgentId, Direction, TargetId, Vec3, VoxelCoord};
use std::collections::BTreeMap;

/// Where an agent last anchored on its target.
#[derive(Clone, Copy, Debug, PartialEq)]
struct TargetMemory {
    target: TargetId,
    anchor: Vec3,
}

/// What one `run_ai` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// The call was skipped because the interval had not elapsed.
    pub skipped: bool,
    pub agents_processed: usize,
    pub cells_carved: usize,
}

/// The whole navigation engine.
pub struct NavController {
    config: NavConfig,
    pub targets: TargetCoordinator,
    pub paths: PathEngine,
    pub carving: CarveEngine,
    pub plans: BuildPlanner,
    pub stuck: StuckTracker,
    memory: BTreeMap<AgentId, TargetMemory>,
    /// Last (target, carve rights) reported to the observer.
    pursuits: BTreeMap<AgentId, (TargetId, bool)>,
    strategies: BTreeMap<AgentId, Strategy>,
    cursor: Option<AgentId>,
    last_run: Option<u64>,
    last_compaction: u64,
}

impl NavController {
    pub fn new(config: NavConfig) -> Self {
        Self {
            targets: TargetCoordinator::new(),
            paths: PathEngine::new(config.pathfinding.clone()),
            carving: CarveEngine::new(config.carving.clone(), config.stuck.extended_ticks),
            plans: BuildPlanner::new(
                config.carving.plan_max_cells,
                config.carving.plan_ttl_ticks,
                config.carving.reservation_ticks,
            ),
            stuck: StuckTracker::new(),
            memory: BTreeMap::new(),
            pursuits: BTreeMap::new(),
            strategies: BTreeMap::new(),
            cursor: None,
            last_run: None,
            last_compaction: 0,
            config,
        }
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    /// Ticks between runs for `agent_count` agents: `base_interval_ticks`
    /// plus one per `agents_per_interval_step` agents, capped.
    pub fn tick_interval(&self, agent_count: usize) -> u64 {
        let s = &self.config.scheduler;
        let extra = if s.agents_per_interval_step == 0 {
            0
        } else {
            (agent_count / s.agents_per_interval_step) as u64
        };
        (s.base_interval_ticks + extra).min(s.max_interval_ticks.max(s.base_interval_ticks))
    }

    /// The strategy last selected for `agent`.
    pub fn strategy(&self, agent: AgentId) -> Option<Strategy> {
        self.strategies.get(&agent).copied()
    }

    /// Run one batch of agents, if the interval has elapsed.
    pub fn run_ai(&mut self, world: &mut SimWorld, host: &mut dyn Host, observer: &mut dyn NavObserver) -> RunSummary {
        let tick = world.tick;
        let interval = self.tick_interval(world.agents.len());
        if self.last_run.is_some_and(|last| tick < last.saturating_add(interval)) {
            return RunSummary {
                skipped: true,
                ..RunSummary::default()
            };
        }
        self.last_run = Some(tick);

        world.grid.begin_tick(tick);
        self.prune(world);
        self.paths.drive(&world.grid, tick);
        self.flush_path_events(observer);

        let scaling = self.config.scaling(host.difficulty());
        let mut summary = RunSummary::default();
        for id in self.next_batch(world) {
            summary.cells_carved += self.run_agent(world, host, observer, id, &scaling);
            summary.agents_processed += 1;
            self.cursor = Some(id);
        }
        self.flush_path_events(observer);

        if tick >= self.last_compaction.saturating_add(self.config.scheduler.compaction_interval_ticks) {
            self.compact(tick);
        }
        summary
    }

    /// Up to `max_agents_per_tick` agent IDs, starting after the cursor and
    /// wrapping around.
    fn next_batch(&self, world: &SimWorld) -> Vec<AgentId> {
        let ids: Vec<AgentId> = world.agents.keys().copied().collect();
        let start = match self.cursor {
            Some(cursor) => ids.iter().position(|&id| id > cursor).unwrap_or(0),
            None => 0,
        };
        let count = ids.len().min(self.config.scheduler.max_agents_per_tick);
        ids.iter().cycle().skip(start).take(count).copied().collect()
    }

    fn flush_path_events(&mut self, observer: &mut dyn NavObserver) {
        for (agent, event) in self.paths.drain_events() {
            observer.path_event(agent, event);
        }
    }

    /// One agent through the whole pipeline. Returns cells carved (0 or 1).
    fn run_agent(
        &mut self,
        world: &mut SimWorld,
        host: &mut dyn Host,
        observer: &mut dyn NavObserver,
        id: AgentId,
        scaling: &DifficultyScaling,
    ) -> usize {
        let tick = world.tick;
        let Some(agent) = world.agent(id).cloned() else {
            self.forget(id);
            return 0;
        };

        let acquisition = self.targets.acquire(world, id, &self.config.targeting);
        let pursuit = acquisition.map(|a| (a.target, a.carve_rights));
        let reported = self.pursuits.get(&id).copied();
        if pursuit != reported {
            observer.target_changed(id, pursuit.map(|p| p.0), pursuit.is_some_and(|p| p.1));
            if reported.is_none() {
                host.play_effect(Effect::Alert, agent.feet());
            }
        }
        let Some((acquisition, target)) =
            acquisition.and_then(|a| world.target(a.target).map(|t| (a, t.clone())))
        else {
            self.lose_target(id);
            return 0;
        };
        self.pursuits.insert(id, (acquisition.target, acquisition.carve_rights));

        self.check_moved_away(id, acquisition.target, target.position);

        let pitfall = if acquisition.carve_rights {
            pitfall_column(&world.grid, agent.position, target.position, &self.config.carving)
        } else {
            None
        };

        // In contact: standing still is not stuck, and unless the target's
        // support can be dug out there is nothing to navigate.
        let in_contact = agent.position.distance(target.position) <= self.config.steering.arrival_radius;
        let status = if in_contact {
            self.stuck.forget(id);
            if pitfall.is_none() {
                self.record_strategy(id, observer, Strategy::Walk);
                return 0;
            }
            StuckStatus::default()
        } else {
            self.stuck.observe(id, agent.position, tick, &self.config.stuck)
        };
        if status.stuck_ticks == 1 || status.newly_extended {
            observer.stuck(id, status.stuck_ticks);
        }

        let goal = target.feet();
        let extended = status.stuck_ticks >= self.config.stuck.extended_ticks;
        let escaping = acquisition.carve_rights && status.stuck_ticks >= self.config.stuck.escape_after_ticks;
        let response = self.paths.request_path(id, agent.position, goal, agent.tunnel_height, tick);
        if let PathResponse::Ready(path) = &response {
            if !escaping && pitfall.is_none() && path.len() > 1 {
                self.record_strategy(id, observer, Strategy::Walk);
                let impulse = steer_along_path(&world.grid, &agent, path, &self.config.steering);
                self.push(world, observer, id, impulse);
                return 0;
            }
        }

        let feet = agent.feet();
        let heading = if acquisition.carve_rights {
            self.plans.ensure_plan(id, feet, goal, tick);
            self.plans.next_direction(id, feet, tick)
        } else {
            None
        };
        let escape = if escaping {
            escape_direction(
                &world.grid,
                feet,
                agent.tunnel_height,
                target.position - agent.position,
                extended,
                &self.config.stuck,
            )
        } else {
            None
        };
        let input = StrategyInput {
            agent_position: agent.position,
            height: agent.tunnel_height,
            target_position: target.position,
            carve_rights: acquisition.carve_rights,
            heading,
            escape,
        };
        let strategy = select_strategy(&world.grid, &input, &self.config.carving);
        self.record_strategy(id, observer, strategy);

        if !strategy.carves() {
            let step = direct_step(&world.grid, feet, goal, agent.tunnel_height);
            let impulse = steer_single_step(&world.grid, &agent, step, &self.config.steering);
            self.push(world, observer, id, impulse);
            return 0;
        }

        let mut ctx = CarveContext::for_agent(
            &agent,
            scaling,
            self.config.targeting.eye_inset,
            self.config.steering.rising_speed,
            target.position,
            tick,
        );
        ctx.stuck_ticks = status.stuck_ticks;
        ctx.extended_stuck = extended;
        let report = self.carving.execute(&mut world.grid, strategy, &ctx);
        for &(cell, reason) in &report.refusals {
            observer.carve_refused(id, cell, reason);
        }

        let mut carved = 0;
        if let Some((cell, voxel)) = report.broken {
            carved = 1;
            observer.cell_carved(id, cell, voxel);
            host.play_effect(Effect::BlockBreak(voxel), cell);
            if let Err(e) = host.store_block(id, voxel) {
                observer.host_call_failed(id, &e);
                if let Err(e) = host.drop_block(cell, voxel) {
                    observer.host_call_failed(id, &e);
                }
            }
        }

        if let Some(step) = report.next_step {
            if world.grid.is_standable(step, agent.tunnel_height) {
                let impulse = steer_single_step(&world.grid, &agent, step, &self.config.steering);
                self.push(world, observer, id, impulse);
            }
        }
        carved
    }

    /// Record the strategy and report changes. Leaving the spiral drops its
    /// state; leaving a climb frees the stair it stood on.
    fn record_strategy(&mut self, id: AgentId, observer: &mut dyn NavObserver, strategy: Strategy) {
        let previous = self.strategies.insert(id, strategy);
        if previous != Some(strategy) {
            observer.strategy_selected(id, strategy);
            if matches!(previous, Some(Strategy::Spiral { .. })) {
                self.carving.reset_spiral(id);
            }
            if !strategy.holds_climb() {
                self.carving.end_climb(id);
            }
        }
    }

    fn push(&mut self, world: &mut SimWorld, observer: &mut dyn NavObserver, id: AgentId, impulse: Vec3) {
        if impulse == Vec3::ZERO {
            return;
        }
        if let Err(e) = world.apply_impulse(id, impulse) {
            observer.host_call_failed(id, &e);
        }
    }

    /// Abandon carving progress toward a target that ran off.
    fn check_moved_away(&mut self, id: AgentId, target: TargetId, position: Vec3) {
        let threshold = self.config.targeting.moved_away_threshold;
        match self.memory.get(&id) {
            Some(m) if m.target == target && m.anchor.distance(position) <= threshold => {}
            Some(m) if m.target == target => {
                self.plans.abandon(id);
                self.carving.reset_spiral(id);
                self.carving.registry.locks.release_all(id);
                self.paths.invalidate_path(id);
                self.memory.insert(id, TargetMemory { target, anchor: position });
            }
            _ => {
                self.memory.insert(id, TargetMemory { target, anchor: position });
            }
        }
    }

    /// Drop everything tied to the agent's current pursuit.
    fn lose_target(&mut self, id: AgentId) {
        self.targets.release(id);
        self.memory.remove(&id);
        self.pursuits.remove(&id);
        self.plans.abandon(id);
        self.carving.forget(id);
        self.paths.forget(id);
        self.strategies.remove(&id);
    }

    /// Drop every piece of state held for `id`.
    pub fn forget(&mut self, id: AgentId) {
        self.lose_target(id);
        self.targets.invalidate(id);
        self.stuck.forget(id);
    }

    /// Remove state for agents and targets that left the world.
    pub fn prune(&mut self, world: &SimWorld) {
        self.targets.prune(world);
        let alive = |id: AgentId| world.agents.contains_key(&id);
        self.paths.prune(alive);
        self.plans.prune(alive);
        self.carving.prune(alive);
        self.stuck.prune(alive);
        self.memory.retain(|&id, m| alive(id) && world.targets.contains_key(&m.target));
        self.pursuits.retain(|&id, _| alive(id));
        self.strategies.retain(|&id, _| alive(id));
    }

    /// Expire protection, locks, reservations and abandoned spirals.
    pub fn compact(&mut self, tick: u64) {
        self.carving.compact(tick);
        self.plans.compact(tick);
        self.last_compaction = tick;
    }
}

/// Next feet cell toward `goal` for an agent walking without a path: straight
/// ahead, or the cell above it when a one-block step is in the way.
fn direct_step(grid: &Grid, feet: VoxelCoord, goal: VoxelCoord, height: u8) -> VoxelCoord {
    if feet.same_column(goal) {
        return feet;
    }
    let dir = Direction::toward_horizontal((goal.x - feet.x) as f32, (goal.z - feet.z) as f32);
    let ahead = feet.step(dir);
    if grid.is_solid(ahead) && grid.has_headroom(ahead.up(1), height) {
        ahead.up(1)
    } else {
        ahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use crate::observer::{NullObserver, Recorded, RecordingObserver};
    use crate::sim::TargetKind;
    use crate::types::{Difficulty, GameMode, VoxelType};
    use crate::world::VoxelWorld;

    fn flat_world(config: &NavConfig) -> SimWorld {
        let mut world = VoxelWorld::new(32, 24, 32);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(31, 4, 31), VoxelType::Stone);
        SimWorld::new(world, config)
    }

    fn player() -> TargetKind {
        TargetKind::Player {
            mode: GameMode::Survival,
        }
    }

    #[test]
    fn interval_grows_with_agent_count() {
        let controller = NavController::new(NavConfig::default());
        assert_eq!(controller.tick_interval(0), 1);
        assert_eq!(controller.tick_interval(8), 2);
        assert_eq!(controller.tick_interval(1000), 4);
    }

    #[test]
    fn early_calls_are_skipped() {
        let config = NavConfig::default();
        let mut world = flat_world(&config);
        for x in 0..16 {
            world.spawn_agent(VoxelCoord::new(x, 5, 2));
        }
        let mut controller = NavController::new(config);
        let mut host = HeadlessHost::default();
        assert!(!controller.run_ai(&mut world, &mut host, &mut NullObserver).skipped);
        world.tick += 1;
        // 16 agents: interval 3.
        assert!(controller.run_ai(&mut world, &mut host, &mut NullObserver).skipped);
        world.tick += 2;
        assert!(!controller.run_ai(&mut world, &mut host, &mut NullObserver).skipped);
    }

    #[test]
    fn batches_rotate_through_agents() {
        let mut config = NavConfig::default();
        config.scheduler.max_agents_per_tick = 3;
        let mut world = flat_world(&config);
        for x in 0..5 {
            world.spawn_agent(VoxelCoord::new(x, 5, 2));
        }
        let controller = NavController::new(config);
        assert_eq!(controller.next_batch(&world), vec![AgentId(0), AgentId(1), AgentId(2)]);
        let mut controller = controller;
        controller.cursor = Some(AgentId(2));
        assert_eq!(controller.next_batch(&world), vec![AgentId(3), AgentId(4), AgentId(0)]);
    }

    #[test]
    fn agent_walks_toward_visible_target() {
        let config = NavConfig::default();
        let physics = config.physics.clone();
        let mut world = flat_world(&config);
        let agent = world.spawn_agent(VoxelCoord::new(2, 5, 2));
        world.spawn_target(player(), VoxelCoord::new(12, 5, 2));
        let mut controller = NavController::new(config);
        let mut host = HeadlessHost::default();
        let start = world.agent(agent).unwrap().position.x;
        for _ in 0..60 {
            controller.run_ai(&mut world, &mut host, &mut NullObserver);
            world.step(&physics);
        }
        let end = world.agent(agent).unwrap().position.x;
        assert!(end > start + 3.0, "agent only moved from {start} to {end}");
    }

    #[test]
    fn removed_agent_state_is_pruned() {
        let config = NavConfig::default();
        let mut world = flat_world(&config);
        let agent = world.spawn_agent(VoxelCoord::new(2, 5, 2));
        let target = world.spawn_target(player(), VoxelCoord::new(6, 5, 2));
        let mut controller = NavController::new(config);
        let mut host = HeadlessHost::default();
        controller.run_ai(&mut world, &mut host, &mut NullObserver);
        assert_eq!(controller.targets.registered(target), 1);
        world.remove_agent(agent);
        world.tick += 1;
        controller.run_ai(&mut world, &mut host, &mut NullObserver);
        assert_eq!(controller.targets.registered(target), 0);
        assert!(controller.stuck.is_empty());
        assert_eq!(controller.strategy(agent), None);
    }

    #[test]
    fn acquisition_is_reported_once() {
        let config = NavConfig::default();
        let mut world = flat_world(&config);
        world.spawn_agent(VoxelCoord::new(2, 5, 2));
        world.spawn_target(player(), VoxelCoord::new(6, 5, 2));
        let mut controller = NavController::new(config);
        let mut host = HeadlessHost::new(Difficulty::Normal);
        let mut observer = RecordingObserver::default();
        for _ in 0..5 {
            controller.run_ai(&mut world, &mut host, &mut observer);
            world.tick += 1;
        }
        let changes = observer
            .events
            .iter()
            .filter(|e| matches!(e, Recorded::Target(..)))
            .count();
        assert_eq!(changes, 1);
        assert_eq!(host.effects_played, 1);
    }

    #[test]
    fn peaceful_difficulty_never_carves() {
        let config = NavConfig::default();
        let physics = config.physics.clone();
        let mut raw = VoxelWorld::new(16, 16, 16);
        raw.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(15, 12, 15), VoxelType::Dirt);
        let mut world = SimWorld::new(raw, &config);
        world.grid.fill(VoxelCoord::new(2, 5, 2), VoxelCoord::new(2, 6, 2), VoxelType::Air);
        world.grid.fill(VoxelCoord::new(8, 5, 2), VoxelCoord::new(8, 6, 2), VoxelType::Air);
        world.spawn_agent(VoxelCoord::new(2, 5, 2));
        world.spawn_target(player(), VoxelCoord::new(8, 5, 2));
        let mut controller = NavController::new(config);
        let mut host = HeadlessHost::new(Difficulty::Peaceful);
        let mut carved = 0;
        for _ in 0..40 {
            carved += controller.run_ai(&mut world, &mut host, &mut NullObserver).cells_carved;
            world.step(&physics);
        }
        assert_eq!(carved, 0);
    }
}
