// Data-driven engine configuration.
//
// All tunable navigation parameters live here in `NavConfig`, loaded from
// JSON at startup. The engine never uses magic numbers for anything a
// designer might want to tune: search budgets, protection windows, impulse
// magnitudes, stuck thresholds. Impulse magnitudes in particular are tuning,
// not contract.
//
// Parameters are grouped into nested sub-structs, one per subsystem:
// `GridConfig`, `TargetingConfig`, `PathfindingConfig`, `CarvingConfig`,
// `SteeringConfig`, `StuckConfig`, `SchedulerConfig` and `PhysicsConfig`
// (the last is only read by the headless host world in `physics.rs`).
//
// Difficulty-dependent multipliers live in `DifficultyScaling` entries keyed
// by `Difficulty` in the `difficulty` map. The host reports the current
// difficulty through `Host::difficulty()`.
//
// See also: `controller.rs` which owns the `NavConfig`, each subsystem module
// for how its group is consumed.
//
// **Critical constraint: determinism.** Config values feed directly into
// engine logic. Identical configs give identical runs.

use crate::error::ConfigError;
use crate::types::Difficulty;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Grid query cache behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cached cell lookups are flushed once the tick has advanced this far
    /// past the last flush. 1 = flush every tick.
    pub cache_ttl_ticks: u64,
}

/// Target acquisition and per-target coordination.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TargetingConfig {
    /// Maximum distance at which a target can be acquired.
    pub acquire_radius: f32,
    /// Maximum number of agents registered against one target.
    pub max_agents_per_target: usize,
    /// Breakable cells line of sight may pass through.
    pub max_breakable_in_sight: u32,
    /// Relaxed breakable-cell tolerance for targets at the agent's elevation.
    pub same_level_breakable_in_sight: u32,
    /// Range within which the relaxed tolerance applies.
    pub same_level_range: f32,
    /// Maximum |dy| (cells) for a target to count as "same elevation".
    pub same_level_max_dy: i32,
    /// Ticks an acquisition result (including "none") is reused.
    pub cache_ticks: u64,
    /// Distance below the top of an entity where its eyes are.
    pub eye_inset: f32,
    /// A target that moved this far from where it was last seen invalidates
    /// the agent's build plan and spiral.
    pub moved_away_threshold: f32,
}

/// Incremental A* search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathfindingConfig {
    /// Horizontal search radius (cells) around the start.
    pub search_radius: i32,
    /// Node expansions one search may perform per tick.
    pub nodes_per_tick: u32,
    /// Total expansions one search may perform before failing.
    pub max_nodes: u32,
    /// Searches allowed in flight at once; further requests queue.
    pub max_concurrent_searches: usize,
    pub orthogonal_cost: f32,
    pub diagonal_cost: f32,
    /// Added to the horizontal cost when a step changes level.
    pub vertical_cost: f32,
    /// Goal coordinates are divided by this before cache comparison.
    pub goal_quantum: i32,
    /// Ticks a completed path stays valid for re-queries.
    pub cache_fresh_ticks: u64,
    /// Cancel a search once the agent moved this far from its start.
    pub displacement_cancel: f32,
    /// Cancel a search once the goal moved this many cells (Manhattan).
    pub goal_change_cancel: u32,
    /// Ticks a failed request is answered with the failure before retrying.
    pub retry_cooldown_ticks: u64,
}

/// Terrain carving.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CarvingConfig {
    /// Fraction of sampled cells that may be obstructed before the direct
    /// route counts as blocked.
    pub obstruction_tolerance: f32,
    /// Distance between samples of the walkability test.
    pub walk_sample_step: f32,
    /// Maximum distance from the agent's eyes to a cell it breaks.
    pub reach: f32,
    /// Ticks a carved structure stays protected.
    pub protection_window_ticks: u64,
    /// Ticks a carve lock is held.
    pub lock_duration_ticks: u64,
    /// Horizontal distance under which a target counts as straight above or
    /// below (vertical shaft geometry).
    pub shaft_radius: f32,
    /// Drops of this many cells or more (and at most `ramp_max_drop`) use a ramp.
    pub ramp_min_drop: i32,
    pub ramp_max_drop: i32,
    /// Horizontal room needed for a ramp.
    pub ramp_min_horizontal: f32,
    /// Furthest a descending step may drop onto its support.
    pub max_safe_drop: i32,
    /// Maximum horizontal distance to a target for a pitfall.
    pub pitfall_max_horizontal: f32,
    /// Maximum (target feet y - agent feet y) for a pitfall.
    pub pitfall_max_dy: i32,
    /// Depth of the 3x3 column scan that detects elevated support.
    pub pitfall_scan_depth: i32,
    /// Cells beneath the target the pitfall may break.
    pub pitfall_max_depth: i32,
    /// How far below the agent's feet a pitfall cell may be.
    pub pitfall_max_reach_down: i32,
    /// The spiral staircase mode is archived and off by default.
    pub spiral_enabled: bool,
    /// Ticks of disuse after which spiral state is dropped.
    pub spiral_reset_ticks: u64,
    /// Ticks a build-plan reservation lives without being refreshed.
    pub reservation_ticks: u64,
    /// Longest build plan generated.
    pub plan_max_cells: usize,
    /// Build plans older than this are regenerated.
    pub plan_ttl_ticks: u64,
}

/// Velocity steering.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SteeringConfig {
    /// Maximum horizontal speed (cells per tick).
    pub max_speed: f32,
    /// Maximum steering impulse per run.
    pub max_force: f32,
    /// Path cells to look ahead of the nearest one.
    pub lookahead_cells: usize,
    /// Within this distance of the path end, desired speed scales down.
    pub arrival_radius: f32,
    /// Fraction of current horizontal velocity removed each run.
    pub velocity_damping: f32,
    /// Upward impulse for a climb on the path.
    pub climb_impulse: f32,
    /// Path cells past the nearest one checked for an upcoming climb.
    pub climb_lookahead: usize,
    /// Horizontal speed toward a single carved step.
    pub step_speed: f32,
    /// Upward impulse toward a step above the agent.
    pub step_jump_impulse: f32,
    /// Factor applied to the step jump when the agent already floats high.
    pub overshoot_reduction: f32,
    /// Lift above the floor cell past which the step jump is reduced.
    pub overshoot_margin: f32,
    /// Largest lift above a solid floor at which a grounded agent still
    /// counts as standing on it.
    pub ground_tolerance: f32,
    /// Vertical speed above which an agent is considered rising.
    pub rising_speed: f32,
}

/// Stuck and loop detection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StuckConfig {
    /// Displacement (cells) that counts as progress.
    pub move_threshold: f32,
    /// Ticks without progress before an agent counts as stuck.
    pub window_ticks: u64,
    /// Stuck ticks after which the escape scan takes over.
    pub escape_after_ticks: u64,
    /// Stuck ticks after which protected cells may be broken.
    pub extended_ticks: u64,
    pub alignment_weight: f32,
    pub vertical_bonus: f32,
    /// Bonus for directions whose cells are already open.
    pub open_bonus: f32,
}

/// Per-tick scheduling budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Agents processed per `run_ai` call.
    pub max_agents_per_tick: usize,
    /// Interval between runs with few agents.
    pub base_interval_ticks: u64,
    /// Each this many agents add one tick to the interval.
    pub agents_per_interval_step: usize,
    pub max_interval_ticks: u64,
    /// Ticks between compaction passes over the cell-keyed registries.
    pub compaction_interval_ticks: u64,
}

/// Kinematics of the headless host world. The engine core never reads this.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub gravity: f32,
    /// Horizontal velocity multiplier per tick while on the ground.
    pub ground_friction: f32,
    /// Horizontal velocity multiplier per tick while airborne.
    pub air_drag: f32,
    pub vertical_drag: f32,
    pub terminal_velocity: f32,
}

/// Difficulty-dependent multipliers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DifficultyScaling {
    /// Scales how many agents a host spawns. Read by the demo driver.
    pub spawn_multiplier: f32,
    /// Scales mining progress per run. 0 disables carving.
    pub mining_speed_multiplier: f32,
    /// Extra factor on mining progress while tunneling.
    pub tunnel_break_multiplier: f32,
}

/// Top-level engine configuration. Loaded from JSON, never mutated at runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavConfig {
    pub grid: GridConfig,
    pub targeting: TargetingConfig,
    pub pathfinding: PathfindingConfig,
    pub carving: CarvingConfig,
    pub steering: SteeringConfig,
    pub stuck: StuckConfig,
    pub scheduler: SchedulerConfig,
    pub physics: PhysicsConfig,
    /// Keyed by `Difficulty`. Missing entries fall back to `Normal`
    /// multipliers of 1.0.
    pub difficulty: BTreeMap<Difficulty, DifficultyScaling>,
}

impl Default for NavConfig {
    fn default() -> Self {
        let mut difficulty = BTreeMap::new();
        difficulty.insert(
            Difficulty::Peaceful,
            DifficultyScaling {
                spawn_multiplier: 0.0,
                mining_speed_multiplier: 0.0,
                tunnel_break_multiplier: 0.0,
            },
        );
        difficulty.insert(
            Difficulty::Easy,
            DifficultyScaling {
                spawn_multiplier: 0.5,
                mining_speed_multiplier: 0.6,
                tunnel_break_multiplier: 1.0,
            },
        );
        difficulty.insert(
            Difficulty::Normal,
            DifficultyScaling {
                spawn_multiplier: 1.0,
                mining_speed_multiplier: 1.0,
                tunnel_break_multiplier: 1.0,
            },
        );
        difficulty.insert(
            Difficulty::Hard,
            DifficultyScaling {
                spawn_multiplier: 1.5,
                mining_speed_multiplier: 1.5,
                tunnel_break_multiplier: 1.25,
            },
        );

        Self {
            grid: GridConfig { cache_ttl_ticks: 1 },
            targeting: TargetingConfig {
                acquire_radius: 32.0,
                max_agents_per_target: 2,
                max_breakable_in_sight: 3,
                same_level_breakable_in_sight: 6,
                same_level_range: 20.0,
                same_level_max_dy: 2,
                cache_ticks: 5,
                eye_inset: 0.2,
                moved_away_threshold: 4.0,
            },
            pathfinding: PathfindingConfig {
                search_radius: 48,
                nodes_per_tick: 25,
                max_nodes: 2000,
                max_concurrent_searches: 4,
                orthogonal_cost: 1.0,
                diagonal_cost: std::f32::consts::SQRT_2,
                vertical_cost: 2.0,
                goal_quantum: 2,
                cache_fresh_ticks: 40,
                displacement_cancel: 3.0,
                goal_change_cancel: 4,
                retry_cooldown_ticks: 20,
            },
            carving: CarvingConfig {
                obstruction_tolerance: 0.2,
                walk_sample_step: 0.5,
                reach: 4.5,
                protection_window_ticks: 200,
                lock_duration_ticks: 20,
                shaft_radius: 1.5,
                ramp_min_drop: 2,
                ramp_max_drop: 3,
                ramp_min_horizontal: 3.0,
                max_safe_drop: 3,
                pitfall_max_horizontal: 3.5,
                pitfall_max_dy: 1,
                pitfall_scan_depth: 6,
                pitfall_max_depth: 4,
                pitfall_max_reach_down: 4,
                spiral_enabled: false,
                spiral_reset_ticks: 100,
                reservation_ticks: 100,
                plan_max_cells: 64,
                plan_ttl_ticks: 200,
            },
            steering: SteeringConfig {
                max_speed: 0.28,
                max_force: 0.12,
                lookahead_cells: 2,
                arrival_radius: 1.5,
                velocity_damping: 0.1,
                climb_impulse: 0.5,
                climb_lookahead: 2,
                step_speed: 0.2,
                step_jump_impulse: 0.5,
                overshoot_reduction: 0.35,
                overshoot_margin: 0.05,
                ground_tolerance: 0.2,
                rising_speed: 0.05,
            },
            stuck: StuckConfig {
                move_threshold: 0.5,
                window_ticks: 20,
                escape_after_ticks: 40,
                extended_ticks: 60,
                alignment_weight: 1.0,
                vertical_bonus: 0.5,
                open_bonus: 0.25,
            },
            scheduler: SchedulerConfig {
                max_agents_per_tick: 16,
                base_interval_ticks: 1,
                agents_per_interval_step: 8,
                max_interval_ticks: 4,
                compaction_interval_ticks: 100,
            },
            physics: PhysicsConfig {
                gravity: 0.08,
                ground_friction: 0.6,
                air_drag: 0.91,
                vertical_drag: 0.98,
                terminal_velocity: 3.0,
            },
            difficulty,
        }
    }
}

impl NavConfig {
    /// Parse and validate a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: NavConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Reject values that would stall or break the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 7] = [
            (self.targeting.max_agents_per_target >= 1, "targeting.max_agents_per_target must be >= 1"),
            (self.pathfinding.nodes_per_tick >= 1, "pathfinding.nodes_per_tick must be >= 1"),
            (self.pathfinding.max_concurrent_searches >= 1, "pathfinding.max_concurrent_searches must be >= 1"),
            (self.pathfinding.goal_quantum >= 1, "pathfinding.goal_quantum must be >= 1"),
            (self.scheduler.max_agents_per_tick >= 1, "scheduler.max_agents_per_tick must be >= 1"),
            (self.scheduler.base_interval_ticks >= 1, "scheduler.base_interval_ticks must be >= 1"),
            (self.stuck.extended_ticks >= self.stuck.escape_after_ticks, "stuck.extended_ticks must be >= stuck.escape_after_ticks"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_string())),
            None => Ok(()),
        }
    }

    /// Multipliers for a difficulty. Unknown entries behave like an unscaled
    /// normal difficulty.
    pub fn scaling(&self, difficulty: Difficulty) -> DifficultyScaling {
        self.difficulty
            .get(&difficulty)
            .cloned()
            .unwrap_or(DifficultyScaling {
                spawn_multiplier: 1.0,
                mining_speed_multiplier: 1.0,
                tunnel_break_multiplier: 1.0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = NavConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let restored = NavConfig::from_json(&json).unwrap();
        assert_eq!(
            config.targeting.max_agents_per_target,
            restored.targeting.max_agents_per_target
        );
        assert_eq!(config.pathfinding.nodes_per_tick, restored.pathfinding.nodes_per_tick);
        assert_eq!(config.difficulty.len(), restored.difficulty.len());
        assert!(!restored.carving.spiral_enabled);
    }

    #[test]
    fn default_caps_match_design() {
        let config = NavConfig::default();
        assert_eq!(config.targeting.max_agents_per_target, 2);
        assert_eq!(config.pathfinding.nodes_per_tick, 25);
        assert_eq!(config.targeting.max_breakable_in_sight, 3);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            NavConfig::from_json("not valid json {{{"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let mut config = NavConfig::default();
        config.pathfinding.nodes_per_tick = 0;
        let json = serde_json::to_string(&config).unwrap();
        assert!(matches!(
            NavConfig::from_json(&json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn difficulty_table_keys_serialize_as_names() {
        let json = serde_json::to_value(NavConfig::default()).unwrap();
        let table = json["difficulty"].as_object().unwrap();
        assert!(table.contains_key("Peaceful"));
        assert!(table.contains_key("Hard"));
    }

    #[test]
    fn missing_difficulty_falls_back_to_unscaled() {
        let mut config = NavConfig::default();
        config.difficulty.clear();
        let s = config.scaling(Difficulty::Hard);
        assert_eq!(s.mining_speed_multiplier, 1.0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = NavConfig::from_json_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
