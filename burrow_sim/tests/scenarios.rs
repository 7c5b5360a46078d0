// End-to-end carving scenarios.
//
// Each test builds a small voxel world, places an agent and a target, and
// drives the carving engine (or the whole controller) the way the host
// would, asserting on the terrain and agent positions that result. The
// engine-level tests move the agent onto each finished step directly instead
// of simulating the jump, so they exercise carving order and protection
// without depending on physics tuning.

use burrow_sim::carving::{CarveContext, CarveEngine, Strategy, StrategyInput, select_strategy};
use burrow_sim::config::NavConfig;
use burrow_sim::controller::NavController;
use burrow_sim::grid::Grid;
use burrow_sim::host::HeadlessHost;
use burrow_sim::observer::RecordingObserver;
use burrow_sim::sim::{SimWorld, TargetKind};
use burrow_sim::stuck::StuckTracker;
use burrow_sim::types::{AgentId, Direction, GameMode, Vec3, VoxelCoord, VoxelType};
use burrow_sim::world::VoxelWorld;

fn input(feet: VoxelCoord, target: VoxelCoord) -> StrategyInput {
    StrategyInput {
        agent_position: feet.feet_center(),
        height: 2,
        target_position: target.feet_center(),
        carve_rights: true,
        heading: None,
        escape: None,
    }
}

fn context(feet: VoxelCoord, target: VoxelCoord, tick: u64) -> CarveContext {
    CarveContext {
        agent: AgentId(0),
        position: feet.feet_center(),
        height: 2,
        eye: feet.feet_center() + Vec3::new(0.0, 1.8, 0.0),
        climbing: false,
        mining_rate: 0.5,
        tunnel_multiplier: 1.0,
        stuck_ticks: 0,
        extended_stuck: false,
        tick,
        target_position: target.feet_center(),
    }
}

#[test]
fn ascent_builds_a_rising_staircase_toward_the_target() {
    let config = NavConfig::default();
    let mut world = VoxelWorld::new(8, 24, 8);
    world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(7, 20, 7), VoxelType::Dirt);
    let mut grid = Grid::new(world, 1);
    let mut feet = VoxelCoord::new(0, 10, 0);
    let target = VoxelCoord::new(0, 14, 3);
    for cell in [feet, feet.up(1), target, target.up(1)] {
        grid.set(cell, VoxelType::Air);
    }

    let mut engine = CarveEngine::new(config.carving.clone(), config.stuck.extended_ticks);
    let mut heights = vec![feet.y];
    for tick in 1..=60 {
        let strategy = select_strategy(&grid, &input(feet, target), &config.carving);
        if strategy == Strategy::Walk {
            break;
        }
        assert_eq!(strategy, Strategy::StairUp { dir: Direction::South }, "at {feet}");

        let report = engine.execute(&mut grid, strategy, &context(feet, target, tick));
        if let Some((cell, _)) = report.broken {
            assert_ne!(cell, feet.down(1), "broke own foothold at {feet}");
        }
        assert!(grid.is_solid(feet.down(1)));

        if let Some(step) = report.next_step {
            if grid.is_standable(step, 2) {
                assert_eq!(step, feet.offset(0, 1, 1));
                feet = step;
                heights.push(feet.y);
            }
        }
    }

    assert_eq!(feet, VoxelCoord::new(0, 13, 3));
    assert_eq!(heights, vec![10, 11, 12, 13]);
    // Every foothold of the staircase is still there.
    for step in [VoxelCoord::new(0, 10, 1), VoxelCoord::new(0, 11, 2), VoxelCoord::new(0, 12, 3)] {
        assert!(grid.is_solid(step), "foothold {step} was broken");
    }
}

#[test]
fn pitfall_digs_out_the_pillar_under_the_target() {
    let config = NavConfig::default();
    let mut world = VoxelWorld::new(12, 32, 12);
    world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(11, 16, 11), VoxelType::Stone);
    // The target's pillar and the agent's perch beside it.
    world.fill(VoxelCoord::new(5, 17, 5), VoxelCoord::new(5, 20, 5), VoxelType::Dirt);
    world.fill(VoxelCoord::new(6, 17, 5), VoxelCoord::new(6, 19, 5), VoxelType::Dirt);
    let mut grid = Grid::new(world, 1);
    let agent = VoxelCoord::new(6, 20, 5);
    let target = VoxelCoord::new(5, 21, 5);

    let strategy = select_strategy(&grid, &input(agent, target), &config.carving);
    assert_eq!(strategy, Strategy::Pitfall { column: target });

    let mut engine = CarveEngine::new(config.carving.clone(), config.stuck.extended_ticks);
    let mut broken = Vec::new();
    for tick in 1..=6 {
        let report = engine.execute(&mut grid, strategy, &context(agent, target, tick));
        broken.extend(report.broken.map(|(cell, _)| cell));
        assert!(broken.len() <= tick as usize);
    }
    assert_eq!(
        broken,
        vec![
            VoxelCoord::new(5, 20, 5),
            VoxelCoord::new(5, 19, 5),
            VoxelCoord::new(5, 18, 5),
            VoxelCoord::new(5, 17, 5),
        ]
    );
    assert!(grid.is_solid(VoxelCoord::new(5, 16, 5)));
    // The agent's own perch is untouched.
    assert!(grid.is_solid(agent.down(1)));
}

#[test]
fn controller_drops_an_adjacent_target_off_its_pillar() {
    let config = NavConfig::default();
    let physics = config.physics.clone();
    let mut raw = VoxelWorld::new(12, 32, 12);
    raw.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(11, 16, 11), VoxelType::Stone);
    raw.fill(VoxelCoord::new(5, 17, 5), VoxelCoord::new(5, 19, 5), VoxelType::Dirt);
    raw.fill(VoxelCoord::new(6, 17, 5), VoxelCoord::new(6, 18, 5), VoxelType::Dirt);
    let mut world = SimWorld::new(raw, &config);
    // Close enough to touch: the target is within arrival range.
    let agent = world.spawn_agent(VoxelCoord::new(6, 19, 5));
    let target = world.spawn_target(
        TargetKind::Player {
            mode: GameMode::Survival,
        },
        VoxelCoord::new(5, 20, 5),
    );

    let mut controller = NavController::new(config);
    let mut host = HeadlessHost::default();
    let mut observer = RecordingObserver::default();
    for _ in 0..200 {
        controller.run_ai(&mut world, &mut host, &mut observer);
        world.step(&physics);
    }

    let carved = observer.carved_cells();
    assert_eq!(carved, vec![VoxelCoord::new(5, 19, 5), VoxelCoord::new(5, 18, 5)]);
    let landed = world.target(target).map(|t| t.position.y).unwrap_or(f32::INFINITY);
    assert!(landed < 18.5, "target still up at y = {landed}");
    assert!(world.grid.is_solid(VoxelCoord::new(6, 18, 5)));
    assert!(world.agent(agent).is_some_and(|a| a.feet() == VoxelCoord::new(6, 19, 5)));
}

#[test]
fn pitfall_is_not_chosen_for_a_target_on_flat_ground() {
    let config = NavConfig::default();
    let mut world = VoxelWorld::new(12, 16, 12);
    world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(11, 4, 11), VoxelType::Dirt);
    let grid = Grid::new(world, 1);
    let strategy = select_strategy(
        &grid,
        &input(VoxelCoord::new(4, 5, 4), VoxelCoord::new(6, 5, 4)),
        &config.carving,
    );
    assert_eq!(strategy, Strategy::Walk);
}

#[test]
fn stuck_counter_rises_and_crosses_extended_once() {
    let cfg = NavConfig::default().stuck;
    let mut tracker = StuckTracker::new();
    let agent = AgentId(7);
    let idle = Vec3::new(3.5, 5.0, 3.5);

    let mut last = 0;
    let mut crossings = 0;
    for tick in 0..200 {
        let status = tracker.observe(agent, idle, tick, &cfg);
        if tick < cfg.window_ticks {
            assert_eq!(status.stuck_ticks, 0);
        } else {
            assert!(status.stuck_ticks > last, "counter did not grow at tick {tick}");
        }
        if status.newly_extended {
            crossings += 1;
            assert_eq!(status.stuck_ticks, cfg.extended_ticks);
        }
        last = status.stuck_ticks;
    }
    assert_eq!(crossings, 1);

    // Progress starts a new episode that may cross again.
    let moved = idle + Vec3::new(2.0, 0.0, 0.0);
    assert!(!tracker.observe(agent, moved, 200, &cfg).is_stuck());
    let crossed_again = (201..400).any(|tick| tracker.observe(agent, moved, tick, &cfg).newly_extended);
    assert!(crossed_again);
}

#[test]
fn buried_agent_tunnels_toward_a_level_target() {
    let config = NavConfig::default();
    let physics = config.physics.clone();
    let mut raw = VoxelWorld::new(24, 16, 8);
    raw.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(23, 12, 7), VoxelType::Dirt);
    let mut world = SimWorld::new(raw, &config);
    world.grid.fill(VoxelCoord::new(2, 5, 3), VoxelCoord::new(2, 6, 3), VoxelType::Air);
    world.grid.fill(VoxelCoord::new(8, 5, 3), VoxelCoord::new(8, 6, 3), VoxelType::Air);
    let agent = world.spawn_agent(VoxelCoord::new(2, 5, 3));
    world.spawn_target(
        TargetKind::Player {
            mode: GameMode::Survival,
        },
        VoxelCoord::new(8, 5, 3),
    );

    let mut controller = NavController::new(config);
    let mut host = HeadlessHost::default();
    let mut observer = RecordingObserver::default();
    for _ in 0..400 {
        controller.run_ai(&mut world, &mut host, &mut observer);
        world.step(&physics);
    }

    let carved = observer.carved_cells();
    assert!(!carved.is_empty());
    // Only the tunnel body (two cells tall, on the agent's row) was dug.
    for cell in &carved {
        assert_eq!(cell.z, 3, "carved off-row cell {cell}");
        assert!(cell.y == 5 || cell.y == 6, "carved off-level cell {cell}");
    }
    let end = world.agent(agent).map(|a| a.position.x).unwrap_or(0.0);
    assert!(end > 5.0, "agent stalled at x = {end}");
    // Carved blocks went to the agent's inventory.
    assert_eq!(host.inventories.get(&agent).copied(), Some(carved.len() as u32));
}
