// Headless host world: the state the navigation engine runs against.
//
// `SimWorld` owns the cached voxel grid, every agent and every pursuable
// target, keyed by integer IDs in `BTreeMap`s so iteration order is the ID
// order. It stands in for the real game: the engine (`controller.rs`) reads
// positions and terrain from it, breaks cells through its grid, and pushes
// impulses into agent velocities. `step()` then integrates motion
// (`physics.rs`) and advances the tick counter.
//
// ## Entities
//
// - `Agent`: a carving creature. Feet position, velocity, body height in
//   cells (1 or 2), and a per-run mining budget in hardness units.
// - `Target`: a player or mob that agents pursue. Players carry a game mode;
//   only combat modes (survival, adventure) are pursuable.
//
// Removing an entity from its map is how it dies. The engine prunes its
// per-agent and per-target state for IDs that disappeared (see
// `NavController::prune`).
//
// See also: `physics.rs` for the integrator, `host.rs` for the presentation
// side of the host, `controller.rs` for the engine entry point.
//
// **Critical constraint: determinism.** IDs come from monotonic counters and
// all entity maps are `BTreeMap`s. Two worlds built by the same calls step
// identically.

use crate::config::{NavConfig, PhysicsConfig};
use crate::error::HostError;
use crate::grid::Grid;
use crate::physics;
use crate::types::{AgentId, GameMode, TargetId, Vec3, VoxelCoord};
use crate::world::VoxelWorld;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A carving creature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    /// Feet position (bottom center of the body).
    pub position: Vec3,
    pub velocity: Vec3,
    /// Body height in cells, 1 or 2.
    pub tunnel_height: u8,
    /// Mining progress (hardness units) accrued per AI run, before
    /// difficulty scaling.
    pub mining_budget: f32,
    pub on_ground: bool,
}

impl Agent {
    pub fn new(id: AgentId, position: Vec3) -> Self {
        Self {
            id,
            position,
            velocity: Vec3::ZERO,
            tunnel_height: 2,
            mining_budget: 0.5,
            on_ground: false,
        }
    }

    /// The cell holding the agent's feet.
    pub fn feet(&self) -> VoxelCoord {
        VoxelCoord::containing(self.position)
    }

    /// Eye position: `eye_inset` below the top of the body.
    pub fn eye(&self, eye_inset: f32) -> Vec3 {
        self.position + Vec3::new(0.0, self.tunnel_height as f32 - eye_inset, 0.0)
    }

    /// Add an impulse to the velocity. Rejects NaN and infinite impulses so a
    /// bad steering result can never poison the physics state.
    pub fn apply_impulse(&mut self, impulse: Vec3) -> Result<(), HostError> {
        if !impulse.is_finite() {
            return Err(HostError::InvalidImpulse);
        }
        self.velocity += impulse;
        Ok(())
    }
}

/// What a target is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Player { mode: GameMode },
    Mob,
}

/// A pursuable entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    /// Feet position.
    pub position: Vec3,
    pub velocity: Vec3,
    /// Body height in world units.
    pub height: f32,
    pub alive: bool,
    pub on_ground: bool,
}

impl Target {
    pub fn new(id: TargetId, kind: TargetKind, position: Vec3) -> Self {
        Self {
            id,
            kind,
            position,
            velocity: Vec3::ZERO,
            height: 1.8,
            alive: true,
            on_ground: false,
        }
    }

    pub fn feet(&self) -> VoxelCoord {
        VoxelCoord::containing(self.position)
    }

    pub fn eye(&self, eye_inset: f32) -> Vec3 {
        self.position + Vec3::new(0.0, self.height - eye_inset, 0.0)
    }

    /// Alive and, for players, in a combat game mode.
    pub fn is_pursuable(&self) -> bool {
        self.alive
            && match self.kind {
                TargetKind::Player { mode } => mode.is_combat(),
                TargetKind::Mob => true,
            }
    }
}

/// The whole headless world.
#[derive(Debug)]
pub struct SimWorld {
    pub tick: u64,
    pub grid: Grid,
    pub agents: BTreeMap<AgentId, Agent>,
    pub targets: BTreeMap<TargetId, Target>,
    next_agent_id: u32,
    next_target_id: u32,
}

impl SimWorld {
    pub fn new(world: VoxelWorld, config: &NavConfig) -> Self {
        Self {
            tick: 0,
            grid: Grid::new(world, config.grid.cache_ttl_ticks),
            agents: BTreeMap::new(),
            targets: BTreeMap::new(),
            next_agent_id: 0,
            next_target_id: 0,
        }
    }

    /// Spawn an agent standing at `feet`.
    pub fn spawn_agent(&mut self, feet: VoxelCoord) -> AgentId {
        let id = AgentId(self.next_agent_id);
        self.next_agent_id += 1;
        let mut agent = Agent::new(id, feet.feet_center());
        agent.on_ground = self.grid.is_solid(feet.down(1));
        self.agents.insert(id, agent);
        id
    }

    /// Spawn a target standing at `feet`.
    pub fn spawn_target(&mut self, kind: TargetKind, feet: VoxelCoord) -> TargetId {
        let id = TargetId(self.next_target_id);
        self.next_target_id += 1;
        let mut target = Target::new(id, kind, feet.feet_center());
        target.on_ground = self.grid.is_solid(feet.down(1));
        self.targets.insert(id, target);
        id
    }

    pub fn remove_agent(&mut self, id: AgentId) -> Option<Agent> {
        self.agents.remove(&id)
    }

    pub fn remove_target(&mut self, id: TargetId) -> Option<Target> {
        self.targets.remove(&id)
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(&id)
    }

    /// Apply an impulse to an agent by ID.
    pub fn apply_impulse(&mut self, id: AgentId, impulse: Vec3) -> Result<(), HostError> {
        self.agents
            .get_mut(&id)
            .ok_or(HostError::UnknownAgent(id))?
            .apply_impulse(impulse)
    }

    /// Integrate one tick of motion and advance the clock.
    pub fn step(&mut self, physics: &PhysicsConfig) {
        for agent in self.agents.values_mut() {
            let mut body = physics::Body {
                position: agent.position,
                velocity: agent.velocity,
                height: agent.tunnel_height as f32,
                on_ground: agent.on_ground,
            };
            physics::integrate(&self.grid, &mut body, physics);
            agent.position = body.position;
            agent.velocity = body.velocity;
            agent.on_ground = body.on_ground;
        }
        for target in self.targets.values_mut().filter(|t| t.alive) {
            let mut body = physics::Body {
                position: target.position,
                velocity: target.velocity,
                height: target.height,
                on_ground: target.on_ground,
            };
            physics::integrate(&self.grid, &mut body, physics);
            target.position = body.position;
            target.velocity = body.velocity;
            target.on_ground = body.on_ground;
        }
        self.tick += 1;
    }
}
