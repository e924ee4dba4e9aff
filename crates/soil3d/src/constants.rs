//! Numerical constants shared by the soil model.
//!
//! Heights are stored as `f32` metres. Volume totals are accumulated in
//! `f64` so that mass checks are not dominated by summation error.

/// Height comparisons closer than this are treated as equal (m).
pub const HEIGHT_TOLERANCE: f32 = 1e-5;

/// Default relative drift allowed by the end-of-step mass check.
pub const MASS_TOLERANCE: f64 = 1e-5;

/// Maximum number of terrain layers kept per column before the two lowest merge.
pub const MAX_TERRAIN_LAYERS: usize = 8;

/// Maximum number of bucket-soil layers shown in a column view.
pub const MAX_BUCKET_SOIL_LAYERS: usize = 2;

/// Default number of sub-samples per column axis used by the detector.
pub const DEFAULT_SAMPLES_PER_AXIS: usize = 4;

/// Upper bound on sub-samples per axis (coverage is tracked in a `u64` mask).
pub const MAX_SAMPLES_PER_AXIS: usize = 8;

/// Fraction of the distance to the wall centroid that world vertices are pulled in by.
///
/// Keeps vertices that sit exactly on a cell boundary from flickering between columns.
pub const VERTEX_NUDGE: f32 = 1e-4;

/// Default angle of repose (rad), roughly 49 degrees.
pub const DEFAULT_REPOSE_ANGLE: f32 = 0.85;
