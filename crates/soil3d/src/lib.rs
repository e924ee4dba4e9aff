//! Heightfield soil model for bucket excavation.
//!
//! The terrain is a grid of soil columns. A rigid bucket, described by planar
//! walls, moves through it step by step. Each step:
//!
//! 1. places the walls at the new pose and finds the intersected columns,
//! 2. carries the soil already on the bucket along and releases what lost support,
//! 3. cuts the terrain down to the bucket bottom, loading the bucket up to
//!    its capacity and pushing overburden and the uncovered share aside,
//! 4. relaxes the terrain to its angle of repose.
//!
//! Total volume (terrain plus body soil) is conserved and checked every step.
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use soil3d::{BucketShape, Grid, Pose, SimParams, SoilSimulator, StepInput};
//!
//! let grid = Grid::new(10, 10, 1.0, -5.0, 5.0, 0.0).unwrap();
//! let bucket = BucketShape::prism(
//!     Vec3::new(0.0, 0.5, 0.0),
//!     Vec3::ZERO,
//!     Vec3::new(0.8, 0.0, 0.0),
//!     0.8,
//! )
//! .unwrap();
//! let start = Pose::from_position(Vec3::new(5.1, 3.0, 5.5));
//! let mut sim = SoilSimulator::new(grid, bucket, start, SimParams::default()).unwrap();
//!
//! let before = sim.total_volume();
//! sim.step(StepInput::at(Pose::from_position(Vec3::new(5.1, -1.0, 5.5))))
//!     .unwrap();
//! assert!((sim.total_volume() - before).abs() < 1e-3);
//! ```

pub mod body_soil;
pub mod bucket;
pub mod checkpoint;
pub mod constants;
pub mod error;
pub mod grid;
pub mod intersect;
pub mod relax;
pub mod scan;
pub mod serde_utils;
pub mod simulator;
pub mod terrain_generator;

pub use body_soil::{BodySoil, BodySoilParcel, ExcavationSplit, ParcelEvent, ParcelKey, ReleaseReason};
pub use bucket::{max_vertex_displacement, BucketShape, Pose, Wall, WallId, WorldWall};
pub use checkpoint::Checkpoint;
pub use error::{GeometryError, SoilError, SoilResult};
pub use grid::{BucketSoilLayer, Cell, Column, Grid, LayerOrigin, SoilLayer};
pub use intersect::{detect, DetectParams, Envelope, Occupancy};
pub use relax::{
    relax, unstable_cells, unstable_pairs, Connectivity, RelaxOutcome, RelaxParams, SplitPolicy,
    StabilityWarning,
};
pub use scan::{DirectionOrder, ScanOrder};
pub use simulator::{SimParams, SoilSimulator, StepInput, StepReport, StepStatus};
pub use terrain_generator::{generate_noise_terrain, NoiseTerrainConfig};

pub use glam::{Quat, Vec3};
