//! Error types for the soil model.
//!
//! Geometry problems are reported before any state is touched. Mass and
//! consistency failures abort a step, leaving the previous committed state
//! in place.

use glam::Vec3;
use thiserror::Error;

use crate::bucket::WallId;
use crate::grid::Cell;

/// Invalid bucket geometry or pose.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("bucket shape has no walls")]
    Empty,
    #[error("wall {wall:?} has {count} vertices, at least 3 are required")]
    TooFewVertices { wall: WallId, count: usize },
    #[error("non-finite value in {what}")]
    NonFinite { what: &'static str },
    #[error("vertex {point} of wall {wall:?} lies outside the grid")]
    OutOfGrid { wall: WallId, point: Vec3 },
    #[error("wall {0:?} is degenerate (its vertices are collinear)")]
    DegenerateWall(WallId),
    #[error("wall {0:?} is not planar")]
    NonPlanar(WallId),
    #[error("outline of wall {0:?} intersects itself")]
    SelfIntersecting(WallId),
    #[error("wall {0:?} is defined more than once")]
    DuplicateWall(WallId),
    #[error("orientation quaternion has zero length")]
    ZeroQuaternion,
    #[error("bucket width must be positive, got {0}")]
    InvalidWidth(f32),
    #[error("bucket joint, base and teeth points are collinear")]
    CollinearAnchors,
}

/// Any failure raised by the simulator.
#[derive(Debug, Error)]
pub enum SoilError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(
        "mass drifted by {drift:.3e} m3 during {stage} (before {before:.6}, after {after:.6})"
    )]
    MassConservation {
        stage: &'static str,
        before: f64,
        after: f64,
        drift: f64,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("inconsistent soil state at ({}, {}): {reason}", cell.x, cell.z)]
    Consistency { cell: Cell, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SoilError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SoilError::InvalidConfig(msg.into())
    }

    pub(crate) fn consistency(cell: Cell, reason: impl Into<String>) -> Self {
        SoilError::Consistency {
            cell,
            reason: reason.into(),
        }
    }
}

pub type SoilResult<T> = Result<T, SoilError>;

/// Compare two volume totals and raise [`SoilError::MassConservation`] when
/// the drift exceeds `tolerance` relative to the larger of the two.
pub(crate) fn check_mass(
    stage: &'static str,
    before: f64,
    after: f64,
    tolerance: f64,
) -> SoilResult<()> {
    let drift = (after - before).abs();
    let scale = before.abs().max(after.abs()).max(1.0);
    if drift > tolerance * scale {
        return Err(SoilError::MassConservation {
            stage,
            before,
            after,
            drift,
        });
    }
    Ok(())
}
