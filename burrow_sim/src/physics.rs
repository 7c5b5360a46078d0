// Kinematics for the headless host world.
//
// A body is a vertical column of zero width: feet at `position`, extending
// `height` units up. Each tick `integrate()` moves it by its velocity one axis
// at a time (Y, then X, then Z), in sub-steps no longer than `MAX_SUBSTEP` so
// a fast body can never skip through a cell. A blocked axis zeroes that
// velocity component. Landing snaps the feet to the top of the supporting
// cell. Forces (gravity, drag, ground friction) are applied after the move,
// so an upward impulse is fully spent on the first tick of a jump.
//
// The engine core never calls this; only `SimWorld::step()` does. Real hosts
// have their own physics.
//
// See also: `sim.rs` for the entity types, `config.rs` (`PhysicsConfig`).

use crate::config::PhysicsConfig;
use crate::grid::Grid;
use crate::types::{Vec3, VoxelCoord};

const MAX_SUBSTEP: f32 = 0.45;
const EPS: f32 = 1e-3;

/// The kinematic state `integrate()` updates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body {
    pub position: Vec3,
    pub velocity: Vec3,
    pub height: f32,
    pub on_ground: bool,
}

/// Whether a body at `position` rests on solid ground.
pub fn resting_on_ground(grid: &Grid, position: Vec3) -> bool {
    let feet = VoxelCoord::containing(position);
    position.y - position.y.floor() < EPS && grid.is_solid(feet.down(1))
}

fn column_blocked(grid: &Grid, position: Vec3, height: f32) -> bool {
    let bottom = position.y.floor() as i32;
    let top = (position.y + height - EPS).floor() as i32;
    let x = position.x.floor() as i32;
    let z = position.z.floor() as i32;
    (bottom..=top).any(|y| grid.is_solid(VoxelCoord::new(x, y, z)))
}

fn substeps(delta: f32) -> u32 {
    (delta.abs() / MAX_SUBSTEP).ceil().max(1.0) as u32
}

fn move_vertical(grid: &Grid, body: &mut Body) {
    let n = substeps(body.velocity.y);
    let step = body.velocity.y / n as f32;
    for _ in 0..n {
        let new_y = body.position.y + step;
        let x = body.position.x.floor() as i32;
        let z = body.position.z.floor() as i32;
        if step < 0.0 {
            let feet = VoxelCoord::new(x, new_y.floor() as i32, z);
            if grid.is_solid(feet) {
                body.position.y = (feet.y + 1) as f32;
                body.velocity.y = 0.0;
                return;
            }
        } else if step > 0.0 {
            let head = VoxelCoord::new(x, (new_y + body.height - EPS).floor() as i32, z);
            if grid.is_solid(head) {
                body.position.y = head.y as f32 - body.height;
                body.velocity.y = 0.0;
                return;
            }
        }
        body.position.y = new_y;
    }
}

fn move_horizontal(grid: &Grid, body: &mut Body, along_x: bool) {
    let v = if along_x { body.velocity.x } else { body.velocity.z };
    let n = substeps(v);
    let step = v / n as f32;
    for _ in 0..n {
        let mut next = body.position;
        if along_x {
            next.x += step;
        } else {
            next.z += step;
        }
        if column_blocked(grid, next, body.height) {
            if along_x {
                body.velocity.x = 0.0;
            } else {
                body.velocity.z = 0.0;
            }
            return;
        }
        body.position = next;
    }
}

/// Advance a body by one tick.
pub fn integrate(grid: &Grid, body: &mut Body, cfg: &PhysicsConfig) {
    move_vertical(grid, body);
    move_horizontal(grid, body, true);
    move_horizontal(grid, body, false);

    body.on_ground = body.velocity.y <= 0.0 && resting_on_ground(grid, body.position);

    let horizontal = if body.on_ground { cfg.ground_friction } else { cfg.air_drag };
    body.velocity.x *= horizontal;
    body.velocity.z *= horizontal;
    body.velocity.y = ((body.velocity.y - cfg.gravity) * cfg.vertical_drag).max(-cfg.terminal_velocity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NavConfig;
    use crate::types::VoxelType;
    use crate::world::VoxelWorld;

    fn grid_with_floor() -> Grid {
        let mut world = VoxelWorld::new(8, 12, 8);
        world.fill(VoxelCoord::new(0, 0, 0), VoxelCoord::new(7, 0, 7), VoxelType::Stone);
        Grid::new(world, 1)
    }

    fn body_at(coord: VoxelCoord) -> Body {
        Body {
            position: coord.feet_center(),
            velocity: Vec3::ZERO,
            height: 2.0,
            on_ground: false,
        }
    }

    #[test]
    fn falling_body_lands_on_floor() {
        let grid = grid_with_floor();
        let cfg = NavConfig::default().physics;
        let mut body = body_at(VoxelCoord::new(3, 6, 3));
        for _ in 0..60 {
            integrate(&grid, &mut body, &cfg);
        }
        assert_eq!(body.position.y, 1.0);
        assert!(body.on_ground);
    }

    #[test]
    fn wall_blocks_horizontal_motion() {
        let mut grid = grid_with_floor();
        grid.set(VoxelCoord::new(4, 1, 3), VoxelType::Dirt);
        let cfg = NavConfig::default().physics;
        let mut body = body_at(VoxelCoord::new(3, 1, 3));
        body.velocity.x = 2.0;
        integrate(&grid, &mut body, &cfg);
        assert!(body.position.x < 4.0);
        assert_eq!(body.velocity.x, 0.0);
    }

    #[test]
    fn jump_clears_one_cell_step() {
        let mut grid = grid_with_floor();
        grid.set(VoxelCoord::new(4, 1, 3), VoxelType::Dirt);
        let cfg = NavConfig::default().physics;
        let mut body = body_at(VoxelCoord::new(3, 1, 3));
        body.on_ground = true;
        body.velocity = Vec3::new(0.0, 0.5, 0.0);
        let mut peak: f32 = 0.0;
        for _ in 0..12 {
            integrate(&grid, &mut body, &cfg);
            peak = peak.max(body.position.y);
        }
        assert!(peak > 2.0, "peak {peak}");
    }

    #[test]
    fn ceiling_stops_rise() {
        let mut grid = grid_with_floor();
        grid.set(VoxelCoord::new(3, 3, 3), VoxelType::Stone);
        let cfg = NavConfig::default().physics;
        let mut body = body_at(VoxelCoord::new(3, 1, 3));
        body.velocity.y = 1.0;
        integrate(&grid, &mut body, &cfg);
        assert_eq!(body.position.y, 1.0);
    }
}
