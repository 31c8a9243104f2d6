//! Error types for configuration loading and the public API.
//!
//! Configuration problems are fatal at load time. Logic errors inside the
//! tick (double pooling, damage to a parked actor) are not surfaced as
//! `Result`s; they go through [`sim_invariant!`] which asserts in debug
//! builds and logs-and-continues in release builds.

use crate::api::ActorHandle;

/// Errors produced while loading or validating an arena configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("failed to parse arena config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An actor kind id is referenced but never defined.
    #[error("actor kind {kind} referenced by {context} is not defined")]
    UnknownKind { kind: u32, context: String },

    /// Two actor kinds share the same id.
    #[error("actor kind {0} is defined more than once")]
    DuplicateKind(u32),

    /// An obstacle template id is referenced but never defined.
    #[error("obstacle template {template} referenced by {context} is not defined")]
    UnknownObstacle { template: u32, context: String },

    /// A spawn region index is out of range.
    #[error("spawn region {index} referenced by {context} does not exist")]
    UnknownRegion { index: usize, context: String },

    /// Wave spawning is enabled but has nowhere to place actors.
    #[error("wave spawning is enabled but no spawn regions are configured")]
    EmptyRegions,

    /// Wave spawning is enabled but has no actor kinds to pick from.
    #[error("wave spawning is enabled but no wave kinds are configured")]
    EmptyWaveKinds,

    /// A rate curve has its anchors reversed.
    #[error("invalid time window for {context}: t0={t0} is after t1={t1}")]
    InvalidTimeWindow { context: String, t0: f32, t1: f32 },

    /// The active bounds volume is empty or inverted.
    #[error("arena bounds are empty: min={min:?} max={max:?}")]
    InvalidBounds { min: glam::Vec2, max: glam::Vec2 },

    /// Pooled entities would be parked inside the active volume.
    #[error("park position {park:?} lies inside arena bounds min={min:?} max={max:?}")]
    ParkInsideBounds {
        park: glam::Vec2,
        min: glam::Vec2,
        max: glam::Vec2,
    },

    /// A turret template id is referenced but never defined.
    #[error("turret template {template} referenced by {context} is not defined")]
    UnknownTurret { template: u32, context: String },
}

/// Errors returned by [`crate::SimWorld`] inbound operations.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// The handle refers to an actor that was pooled or recycled since it
    /// was issued.
    #[error("handle {0:?} does not refer to a live actor")]
    StaleHandle(ActorHandle),

    /// An inbound request referenced unknown configuration data.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Checks a simulation invariant.
///
/// Fatal in debug builds, a logged no-op in release builds.
macro_rules! sim_invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            debug_assert!(false, $($arg)+);
            tracing::warn!($($arg)+);
        }
    };
}

pub(crate) use sim_invariant;
