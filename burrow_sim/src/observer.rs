// Diagnostics sink for the navigation engine.
//
// The core never logs inline and never asks whether logging is on. It reports
// what it decided through `NavObserver` and moves on. Implementations:
// - `NullObserver`: drops everything.
// - `TracingObserver`: forwards to the `tracing` facade (`debug!` for
//   decisions, `trace!` for per-cell refusals). Filtering is left to the
//   subscriber the binary installs.
// - `RecordingObserver`: keeps events in memory for tests.
//
// Every method has an empty default body, so an observer only overrides what
// it cares about.
//
// See also: `controller.rs`, the only caller.

use crate::carving::Strategy;
use crate::error::{CarveError, HostError, SearchFailure};
use crate::types::{AgentId, TargetId, VoxelCoord, VoxelType};

/// Milestones of an agent's path request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathEvent {
    Started,
    Queued,
    Completed { len: usize },
    Failed(SearchFailure),
    Cancelled,
}

/// Receives the engine's decisions. All methods default to no-ops.
pub trait NavObserver {
    fn target_changed(&mut self, _agent: AgentId, _target: Option<TargetId>, _carve_rights: bool) {}
    fn strategy_selected(&mut self, _agent: AgentId, _strategy: Strategy) {}
    fn cell_carved(&mut self, _agent: AgentId, _cell: VoxelCoord, _voxel: VoxelType) {}
    fn carve_refused(&mut self, _agent: AgentId, _cell: VoxelCoord, _reason: CarveError) {}
    fn path_event(&mut self, _agent: AgentId, _event: PathEvent) {}
    fn stuck(&mut self, _agent: AgentId, _stuck_ticks: u64) {}
    fn host_call_failed(&mut self, _agent: AgentId, _error: &HostError) {}
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl NavObserver for NullObserver {}

/// Forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl NavObserver for TracingObserver {
    fn target_changed(&mut self, agent: AgentId, target: Option<TargetId>, carve_rights: bool) {
        tracing::debug!(%agent, ?target, carve_rights, "target changed");
    }

    fn strategy_selected(&mut self, agent: AgentId, strategy: Strategy) {
        tracing::trace!(%agent, ?strategy, "strategy selected");
    }

    fn cell_carved(&mut self, agent: AgentId, cell: VoxelCoord, voxel: VoxelType) {
        tracing::debug!(%agent, %cell, ?voxel, "carved");
    }

    fn carve_refused(&mut self, agent: AgentId, cell: VoxelCoord, reason: CarveError) {
        tracing::trace!(%agent, %cell, %reason, "carve refused");
    }

    fn path_event(&mut self, agent: AgentId, event: PathEvent) {
        tracing::debug!(%agent, ?event, "path");
    }

    fn stuck(&mut self, agent: AgentId, stuck_ticks: u64) {
        tracing::debug!(%agent, stuck_ticks, "stuck");
    }

    fn host_call_failed(&mut self, agent: AgentId, error: &HostError) {
        tracing::debug!(%agent, %error, "host call failed, ignoring");
    }
}

/// One recorded observer call.
#[derive(Clone, Debug, PartialEq)]
pub enum Recorded {
    Target(AgentId, Option<TargetId>, bool),
    Strategy(AgentId, Strategy),
    Carved(AgentId, VoxelCoord, VoxelType),
    Refused(AgentId, VoxelCoord, CarveError),
    Path(AgentId, PathEvent),
    Stuck(AgentId, u64),
    HostFailure(AgentId, HostError),
}

/// Keeps every event, in order.
#[derive(Clone, Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<Recorded>,
}

impl RecordingObserver {
    /// Cells carved so far, in order.
    pub fn carved_cells(&self) -> Vec<VoxelCoord> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Recorded::Carved(_, cell, _) => Some(*cell),
                _ => None,
            })
            .collect()
    }
}

impl NavObserver for RecordingObserver {
    fn target_changed(&mut self, agent: AgentId, target: Option<TargetId>, carve_rights: bool) {
        self.events.push(Recorded::Target(agent, target, carve_rights));
    }

    fn strategy_selected(&mut self, agent: AgentId, strategy: Strategy) {
        self.events.push(Recorded::Strategy(agent, strategy));
    }

    fn cell_carved(&mut self, agent: AgentId, cell: VoxelCoord, voxel: VoxelType) {
        self.events.push(Recorded::Carved(agent, cell, voxel));
    }

    fn carve_refused(&mut self, agent: AgentId, cell: VoxelCoord, reason: CarveError) {
        self.events.push(Recorded::Refused(agent, cell, reason));
    }

    fn path_event(&mut self, agent: AgentId, event: PathEvent) {
        self.events.push(Recorded::Path(agent, event));
    }

    fn stuck(&mut self, agent: AgentId, stuck_ticks: u64) {
        self.events.push(Recorded::Stuck(agent, stuck_ticks));
    }

    fn host_call_failed(&mut self, agent: AgentId, error: &HostError) {
        self.events.push(Recorded::HostFailure(agent, error.clone()));
    }
}
