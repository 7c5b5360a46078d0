// Velocity steering: turn a path or a single next cell into an impulse.
//
// Both routines are pure. They read the agent and the grid and return the
// impulse to add to the agent's velocity; the controller applies it through
// the host. Two entry points:
//
// - `steer_along_path()`: find the path cell nearest the agent, aim at the
//   cell `lookahead_cells` further on, and ask for `max_speed` toward it
//   (scaled down inside `arrival_radius` of the path end). The horizontal
//   impulse is the difference from the current horizontal velocity, capped
//   at `max_force`, minus a `velocity_damping` share of the current
//   velocity. A `climb_impulse` is added when one of the next
//   `climb_lookahead` cells is a level up.
// - `steer_single_step()`: move toward one carved step at `step_speed`. A
//   step above the feet gets `step_jump_impulse`, cut by
//   `overshoot_reduction` when the agent already floats more than
//   `overshoot_margin` above its floor cell (or is moving upward), and
//   dropped entirely when the step has no solid floor under it
//   (an open shaft).
//
// Neither routine ever returns a vertical component for an agent that is not
// standing on solid ground: the host must report ground contact, the cell
// under the feet must be solid, and the feet may sit at most
// `ground_tolerance` above it. Airborne agents only get horizontal impulses.
//
// See also: `physics.rs` for how the headless world sets `on_ground`,
// `controller.rs`.

use crate::config::SteeringConfig;
use crate::grid::Grid;
use crate::sim::Agent;
use crate::types::{Vec3, VoxelCoord};

/// The agent stands on solid ground right now.
pub fn is_grounded(grid: &Grid, agent: &Agent, cfg: &SteeringConfig) -> bool {
    agent.on_ground && lift(agent) < cfg.ground_tolerance && grid.is_solid(agent.feet().down(1))
}

/// Height of the feet above the bottom of the feet cell.
fn lift(agent: &Agent) -> f32 {
    agent.position.y - agent.position.y.floor()
}

/// Index of the path cell nearest to `position` (first one on ties).
pub fn nearest_index(path: &[VoxelCoord], position: Vec3) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, cell) in path.iter().enumerate() {
        let d = cell.feet_center().distance(position);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

/// Horizontal part shared by both routines: reach `desired`, capped and
/// damped.
fn horizontal_force(agent: &Agent, desired: Vec3, cfg: &SteeringConfig) -> Vec3 {
    let current = agent.velocity.horizontal();
    let steer = (desired - current).clamp_length(cfg.max_force);
    steer - current * cfg.velocity_damping
}

/// Impulse that moves `agent` along `path`.
pub fn steer_along_path(grid: &Grid, agent: &Agent, path: &[VoxelCoord], cfg: &SteeringConfig) -> Vec3 {
    let Some(&last) = path.last() else {
        return Vec3::ZERO;
    };
    let nearest = nearest_index(path, agent.position);
    let look = path[(nearest + cfg.lookahead_cells).min(path.len() - 1)];

    let to_look = (look.feet_center() - agent.position).horizontal();
    let to_end = (last.feet_center() - agent.position).horizontal_length();
    let speed = if cfg.arrival_radius > 0.0 {
        cfg.max_speed * (to_end / cfg.arrival_radius).min(1.0)
    } else {
        cfg.max_speed
    };
    let mut impulse = horizontal_force(agent, to_look.normalized_or_zero() * speed, cfg);

    if is_grounded(grid, agent, cfg) {
        let feet = agent.feet();
        let climb_ahead = path
            .iter()
            .skip(nearest + 1)
            .take(cfg.climb_lookahead)
            .any(|c| c.y > feet.y && c.horizontal_distance_sq(feet) <= 2);
        if climb_ahead {
            impulse.y = cfg.climb_impulse;
        }
    }
    impulse
}

/// Impulse that moves `agent` onto the single cell `step`.
pub fn steer_single_step(grid: &Grid, agent: &Agent, step: VoxelCoord, cfg: &SteeringConfig) -> Vec3 {
    let offset = (step.feet_center() - agent.position).horizontal();
    let desired = if offset.horizontal_length() < 0.1 {
        Vec3::ZERO
    } else {
        offset.normalized_or_zero() * cfg.step_speed
    };
    let mut impulse = horizontal_force(agent, desired, cfg);

    let feet = agent.feet();
    if step.y > feet.y && is_grounded(grid, agent, cfg) && grid.is_solid(step.down(1)) {
        let mut jump = cfg.step_jump_impulse;
        if lift(agent) > cfg.overshoot_margin || agent.velocity.y > 0.0 {
            jump *= cfg.overshoot_reduction;
        }
        impulse.y = jump;
    }
    impulse
}
