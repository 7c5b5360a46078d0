// burrow_sim: agent navigation and terrain carving over a voxel world.
//
// This crate contains the navigation engine for burrowing agents: target
// acquisition with per-target caps, budgeted incremental A*, the carving
// state machine (walk, tunnel, stairs, ramps, pitfalls, spiral stairs), the
// shared protection and lock registries, velocity steering and stuck
// detection. It also carries a small headless host world (grid, agents,
// targets, physics) so the engine can be tested, benchmarked and run
// without a game attached.
//
// Module overview:
// - `types.rs`:       VoxelCoord, Vec3, Direction, entity IDs, voxel types, difficulty.
// - `world.rs`:       Dense 3D voxel storage + line-of-sight obstruction walk.
// - `grid.rs`:        Cached cell queries (solidity, breakability, standability).
// - `config.rs`:      NavConfig: all tunable parameters, loaded from JSON.
// - `error.rs`:       Search failures, carve refusals, host and config errors.
// - `host.rs`:        Host trait (difficulty, inventory, effects) + HeadlessHost.
// - `observer.rs`:    NavObserver diagnostics sink + tracing and recording sinks.
// - `sim.rs`:         SimWorld: agents, targets, tick clock.
// - `physics.rs`:     Gravity, collision and friction for the headless world.
// - `targeting.rs`:   Target acquisition, visibility, per-target registration cap.
// - `pathfinding.rs`: Incremental A* search + per-agent path engine (cache, queue).
// - `registry.rs`:    Protected blocks, carve locks, the single break policy.
// - `build_plan.rs`:  Coarse carving routes with per-cell reservations.
// - `carving.rs`:     Strategy selection and carving execution.
// - `steering.rs`:    Path and single-step velocity impulses.
// - `stuck.rs`:       Stuck counter and escape-direction scan.
// - `controller.rs`:  NavController: the per-tick `run_ai` entry point.
//
// **Critical constraint: determinism.** The engine is a pure function of
// world state, config and host difficulty. No system time, no OS entropy, no
// randomness at all. Iterated maps are `BTreeMap`s; `FxHashMap` is only used
// for memo caches that are never iterated.

pub mod build_plan;
pub mod carving;
pub mod config;
pub mod controller;
pub mod error;
pub mod grid;
pub mod host;
pub mod observer;
pub mod pathfinding;
pub mod physics;
pub mod registry;
pub mod sim;
pub mod steering;
pub mod stuck;
pub mod targeting;
pub mod types;
pub mod world;

pub use controller::{NavController, RunSummary};
