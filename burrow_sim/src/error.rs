// Error types for the navigation engine.
//
// None of these ever reach a user. They classify why a step of the AI did
// not happen so the caller can fall back to a simpler behavior:
// - `SearchFailure`: terminal status of a path search. The controller falls
//   back to direct steering.
// - `CarveError`: why a candidate cell was not broken. The carving engine
//   moves on to the next candidate.
// - `HostError`: a call into the surrounding world failed. Logged and
//   ignored; the AI must never destabilize the host.
// - `ConfigError`: loading `NavConfig` from JSON failed. The only error that
//   is surfaced, and only at startup.
//
// See also: `carving.rs` and `registry.rs` which produce `CarveError`,
// `pathfinding.rs` for `SearchFailure`, `host.rs` for `HostError`.

use crate::types::{AgentId, VoxelType};
use std::path::PathBuf;
use thiserror::Error;

/// Why a path search ended without a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SearchFailure {
    /// The expansion cap was hit before reaching the goal.
    #[error("node budget exhausted after {expanded} expansions")]
    NodeBudget { expanded: u32 },
    /// The open set emptied: the goal is unreachable inside the search radius.
    #[error("open set exhausted")]
    Exhausted,
    /// The goal lies outside the search radius; no search was attempted.
    #[error("goal outside search radius")]
    OutOfRange,
}

/// Why a candidate cell was not carved.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum CarveError {
    #[error("{0:?} cannot be broken")]
    Unbreakable(VoxelType),
    #[error("cell is already open")]
    NotSolid,
    #[error("cell is the agent's own foothold")]
    OwnFoothold,
    #[error("cell supports the structure being climbed")]
    StructuralSupport,
    #[error("cell is {distance:.1} away, beyond reach")]
    OutOfReach { distance: f32 },
    #[error("protected by {builder} for {remaining} more ticks")]
    Protected { builder: AgentId, remaining: u64 },
    #[error("locked by {holder}")]
    Locked { holder: AgentId },
    #[error("cell is part of the spiral center pillar")]
    CenterPillar,
    #[error("no solid foothold in that direction")]
    NoFoothold,
}

/// A call into the host world failed.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum HostError {
    #[error("inventory of {0} is full")]
    InventoryFull(AgentId),
    #[error("impulse is not finite")]
    InvalidImpulse,
    #[error("unknown agent {0}")]
    UnknownAgent(AgentId),
}

/// Failure to load a `NavConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
