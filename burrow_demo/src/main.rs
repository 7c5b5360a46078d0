// Headless demo driver for the burrow navigation engine.
//
// Builds a layered voxel world (bedrock, stone, dirt, a stepped hill and a
// dirt pillar), drops a player target on top of the pillar and a crowd of
// agents at the far corner, then runs the controller for a fixed number of
// ticks. Progress is reported through `tracing`; the engine's own
// diagnostics arrive through `TracingObserver`, so `RUST_LOG=burrow_sim=debug`
// shows every path search and carve.
//
// Usage:
//   burrow_demo [OPTIONS]
//     --config <PATH>          NavConfig JSON (default: built-in defaults)
//     --ticks <N>              Ticks to simulate (default: 600)
//     --agents <N>             Base agent count, scaled by difficulty (default: 6)
//     --difficulty <LEVEL>     peaceful | easy | normal | hard (default: normal)
//     --report-every <N>       Ticks between progress lines (default: 100)

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use burrow_sim::NavController;
use burrow_sim::config::NavConfig;
use burrow_sim::host::HeadlessHost;
use burrow_sim::observer::TracingObserver;
use burrow_sim::sim::{SimWorld, TargetKind};
use burrow_sim::types::{Difficulty, GameMode, VoxelCoord, VoxelType};
use burrow_sim::world::VoxelWorld;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

const WORLD_X: u32 = 48;
const WORLD_Y: u32 = 32;
const WORLD_Z: u32 = 48;

#[derive(Parser, Debug)]
#[command(name = "burrow_demo", about = "Run burrowing agents against a target in a headless voxel world")]
struct Args {
    /// NavConfig JSON file. Built-in defaults when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 600)]
    ticks: u64,

    /// Agent count before the difficulty's spawn multiplier.
    #[arg(long, default_value_t = 6)]
    agents: u32,

    #[arg(long, value_enum, default_value_t = DifficultyArg::Normal)]
    difficulty: DifficultyArg,

    #[arg(long, default_value_t = 100)]
    report_every: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DifficultyArg {
    Peaceful,
    Easy,
    Normal,
    Hard,
}

impl From<DifficultyArg> for Difficulty {
    fn from(arg: DifficultyArg) -> Self {
        match arg {
            DifficultyArg::Peaceful => Difficulty::Peaceful,
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Normal => Difficulty::Normal,
            DifficultyArg::Hard => Difficulty::Hard,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.report_every == 0 {
        bail!("--report-every must be at least 1");
    }
    let config = match &args.config {
        Some(path) => NavConfig::from_json_file(path).with_context(|| format!("loading {}", path.display()))?,
        None => NavConfig::default(),
    };
    config.validate().context("invalid config")?;

    let difficulty = Difficulty::from(args.difficulty);
    let scaling = config.scaling(difficulty);
    let agent_count = (args.agents as f32 * scaling.spawn_multiplier).round() as u32;

    let mut world = SimWorld::new(build_terrain(), &config);
    let pillar_top = VoxelCoord::new(36, 14, 36);
    let target = world.spawn_target(
        TargetKind::Player {
            mode: GameMode::Survival,
        },
        pillar_top,
    );
    for i in 0..agent_count as i32 {
        world.spawn_agent(VoxelCoord::new(3 + (i % 6) * 2, 9, 3 + (i / 6) * 2));
    }
    info!(
        ?difficulty,
        agents = agent_count,
        ticks = args.ticks,
        "starting demo run"
    );

    let mut controller = NavController::new(config.clone());
    let mut host = HeadlessHost::new(difficulty);
    let mut observer = TracingObserver;
    let mut carved = 0usize;
    let mut runs = 0u64;

    for _ in 0..args.ticks {
        let summary = controller.run_ai(&mut world, &mut host, &mut observer);
        if !summary.skipped {
            runs += 1;
            carved += summary.cells_carved;
        }
        world.step(&config.physics);

        if world.tick % args.report_every == 0 {
            let closest = world
                .target(target)
                .map(|t| {
                    world
                        .agents
                        .values()
                        .map(|a| a.position.distance(t.position))
                        .fold(f32::INFINITY, f32::min)
                })
                .unwrap_or(f32::INFINITY);
            info!(
                tick = world.tick,
                carved,
                pursuing = controller.targets.registered(target),
                closest,
                "progress"
            );
        }
    }

    let stored: u32 = host.inventories.values().sum();
    info!(
        runs,
        carved,
        stored,
        dropped = host.dropped_blocks,
        effects = host.effects_played,
        "demo finished"
    );
    Ok(())
}

/// Bedrock floor, stone to y = 4, dirt to y = 8, a stepped dirt hill in the
/// middle and a dirt pillar topped with stone for the target to stand on.
fn build_terrain() -> VoxelWorld {
    let max_x = WORLD_X as i32 - 1;
    let max_z = WORLD_Z as i32 - 1;
    let mut world = VoxelWorld::new(WORLD_X, WORLD_Y, WORLD_Z);
    world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(max_x, 0, max_z), VoxelType::Bedrock);
    world.fill(VoxelCoord::new(0, 1, 0), VoxelCoord::new(max_x, 4, max_z), VoxelType::Stone);
    world.fill(VoxelCoord::new(0, 5, 0), VoxelCoord::new(max_x, 8, max_z), VoxelType::Dirt);

    for level in 0..4 {
        let inset = 14 + level * 2;
        world.fill(
            VoxelCoord::new(inset, 9 + level, inset),
            VoxelCoord::new(max_x - inset, 9 + level, max_z - inset),
            VoxelType::Dirt,
        );
    }

    world.fill(VoxelCoord::new(36, 9, 36), VoxelCoord::new(36, 12, 36), VoxelType::Dirt);
    world.set(VoxelCoord::new(36, 13, 36), VoxelType::Stone);
    world
}
