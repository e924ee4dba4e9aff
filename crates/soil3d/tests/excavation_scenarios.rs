//! End-to-end excavation scenarios
//!
//! Drives the simulator through short dig cycles and checks that soil ends
//! up where it should while total volume stays constant.

use soil3d::{
    unstable_pairs, BucketShape, Cell, Grid, LayerOrigin, ParcelEvent, Pose, ReleaseReason,
    SimParams, SoilSimulator, StepInput, StepStatus, Vec3, WallId,
};

const CELL_SIZE: f32 = 1.0;
const FLOOR: f32 = -5.0;
const CEILING: f32 = 5.0;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Flat grid at height 0
fn flat_grid(width: usize, depth: usize) -> Grid {
    Grid::new(width, depth, CELL_SIZE, FLOOR, CEILING, 0.0).unwrap()
}

/// Small bucket whose base (0.8 x 0.8) fits inside one column when placed at
/// x = n + 0.1, z = n + 0.5
fn small_bucket() -> BucketShape {
    BucketShape::prism(
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::ZERO,
        Vec3::new(0.8, 0.0, 0.0),
        0.8,
    )
    .unwrap()
}

/// Same footprint as [`small_bucket`] but tall enough to hold a full
/// metre of one column (capacity 1.024 m³)
fn deep_bucket() -> BucketShape {
    BucketShape::prism(
        Vec3::new(0.0, 3.2, 0.0),
        Vec3::ZERO,
        Vec3::new(0.8, 0.0, 0.0),
        0.8,
    )
    .unwrap()
}

/// Bucket with a 1.5 x 1.5 base (capacity 1.125 m³)
fn wide_bucket() -> BucketShape {
    BucketShape::prism(
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::ZERO,
        Vec3::new(1.5, 0.0, 0.0),
        1.5,
    )
    .unwrap()
}

fn at(x: f32, y: f32, z: f32) -> Pose {
    Pose::from_position(Vec3::new(x, y, z))
}

fn assert_volume(sim: &SoilSimulator, expected: f64) {
    let drift = (sim.total_volume() - expected).abs();
    assert!(
        drift < expected.abs() * 1e-5 + 1e-4,
        "volume drifted by {drift:.6} m³ (expected {expected:.4}, got {:.4})",
        sim.total_volume()
    );
}

// =============================================================================
// TEST 1: SINGLE COLUMN CUT
// A bucket lowered into one fully covered column moves exactly that soil
// onto the base wall
// =============================================================================

#[test]
fn lowered_bucket_cuts_one_column() {
    let grid = flat_grid(10, 10);
    let mut sim =
        SoilSimulator::new(grid, deep_bucket(), at(5.1, 1.5, 5.5), SimParams::default()).unwrap();
    let initial = sim.total_volume();

    let report = sim.step(StepInput::at(at(5.1, -1.0, 5.5))).unwrap();
    assert!(!report.skipped);
    assert_eq!(report.status, StepStatus::Clean);

    let target = Cell::new(5, 5);
    assert_eq!(sim.occupancy().len(), 1);
    assert!((sim.grid().surface_height(target) + 1.0).abs() < 1e-4);

    let parcel = sim.body_soil().get(WallId::Base, target).unwrap();
    assert!((parcel.volume - 1.0).abs() < 1e-4);
    assert_eq!(parcel.provenance, target);
    assert_eq!(sim.body_soil().len(), 1);

    // the view of the parcel sits on the bucket above the column
    let layers = sim.grid().column(target).bucket_soil();
    assert_eq!(layers.len(), 1);
    assert!((layers[0].top - layers[0].bottom - 1.0).abs() < 1e-4);

    // neighbours are untouched
    for (x, z) in [(4, 5), (6, 5), (5, 4), (5, 6)] {
        assert_eq!(sim.grid().surface_height(Cell::new(x, z)), 0.0);
    }
    assert_volume(&sim, initial);
}

// =============================================================================
// TEST 2: CUT THEN DUMP RESTORES THE TERRAIN
// Lifting and dumping in one step puts the soil back before the hole can
// collapse
// =============================================================================

#[test]
fn dump_over_the_cut_restores_heightfield() {
    let grid = flat_grid(10, 10);
    let original = grid.heightfield();
    let mut sim =
        SoilSimulator::new(grid, deep_bucket(), at(5.1, 1.5, 5.5), SimParams::default()).unwrap();

    sim.step(StepInput::at(at(5.1, -1.0, 5.5))).unwrap();
    let report = sim.step(StepInput::dump(at(5.1, 1.5, 5.5))).unwrap();

    assert!(!report.skipped);
    assert!(sim.body_soil().is_empty());
    assert!((report.released - 1.0).abs() < 1e-4);
    assert!(report.events.iter().any(|e| matches!(
        e,
        ParcelEvent::Released { reason: ReleaseReason::Dumped, .. }
    )));

    for (h, h0) in sim.heightfield().iter().zip(&original) {
        assert!((h - h0).abs() < 1e-4, "height {h} differs from {h0}");
    }
    assert_eq!(
        sim.grid().column(Cell::new(5, 5)).top_origin(),
        LayerOrigin::Deposited { from: Cell::new(5, 5) }
    );
}

// =============================================================================
// TEST 3: DIG CYCLE
// Lower, drag, lift, dump. Volume is conserved at every step and all body
// soil returns to the terrain at the end
// =============================================================================

#[test]
fn dig_cycle_conserves_volume() {
    let grid = flat_grid(20, 10);
    let mut sim =
        SoilSimulator::new(grid, wide_bucket(), at(2.2, 3.0, 5.0), SimParams::default()).unwrap();
    let initial = sim.total_volume();

    let mut path = vec![at(2.2, -0.5, 5.0)];
    for i in 1..=5 {
        path.push(at(2.2 + i as f32, -0.5, 5.0));
    }
    for pose in path {
        let report = sim.step(StepInput::at(pose)).unwrap();
        assert!(!report.skipped);
        assert_volume(&sim, initial);
    }
    let carried = sim.body_soil().volume();
    assert!(carried > 0.5, "bucket should be loaded, carries {carried}");

    // lifting keeps the soil on the bucket: the columns under it stay occupied
    sim.step(StepInput::at(at(7.2, 3.0, 5.0))).unwrap();
    assert!((sim.body_soil().volume() - carried).abs() < 1e-4);
    assert_volume(&sim, initial);

    // swing sideways over fresh ground and dump
    sim.step(StepInput::at(at(14.2, 3.0, 5.0))).unwrap();
    let report = sim.step(StepInput::dump(at(14.2, 3.0, 5.0))).unwrap();
    assert!(sim.body_soil().is_empty());
    assert!(report.released > 0.0);
    assert_volume(&sim, initial);

    // the trench is below ground, the dump site above
    assert!(sim.grid().surface_height(Cell::new(3, 5)) < -0.1);
    let dump_site = (14..16).flat_map(|x| (4..6).map(move |z| Cell::new(x, z)));
    assert!(dump_site.map(|c| sim.grid().surface_height(c)).fold(f32::MIN, f32::max) > 0.1);
}

// =============================================================================
// TEST 4: PARCELS RIDE WITH THE BUCKET
// =============================================================================

#[test]
fn parcels_move_with_bucket() {
    let grid = flat_grid(12, 12);
    let mut sim =
        SoilSimulator::new(grid, small_bucket(), at(3.1, 3.0, 5.5), SimParams::default()).unwrap();
    sim.step(StepInput::at(at(3.1, -1.0, 5.5))).unwrap();
    sim.step(StepInput::at(at(3.1, 1.0, 5.5))).unwrap();
    assert!(sim.body_soil().get(WallId::Base, Cell::new(3, 5)).is_some());

    let report = sim.step(StepInput::at(at(4.1, 1.0, 5.5))).unwrap();
    assert!(sim.body_soil().get(WallId::Base, Cell::new(4, 5)).is_some());
    assert!(sim.body_soil().get(WallId::Base, Cell::new(3, 5)).is_none());
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, ParcelEvent::Moved { .. })));
    // nothing fell off on the way
    assert_eq!(report.released, 0.0);
}

// =============================================================================
// TEST 5: PARTIAL COVERAGE PUSHES SOIL ASIDE
// =============================================================================

#[test]
fn partially_covered_columns_push_to_neighbours() {
    let grid = flat_grid(10, 10);
    let initial = grid.terrain_volume();
    let mut sim =
        SoilSimulator::new(grid, wide_bucket(), at(3.5, 3.0, 5.5), SimParams::default()).unwrap();

    // the base spans x in [3.5, 5.0) and z in [4.75, 6.25)
    let report = sim.step(StepInput::at(at(3.5, -0.5, 5.5))).unwrap();
    assert!(report.excavated > 0.0);
    assert!(report.pushed > 0.0, "partial columns should push soil aside");
    assert!(report.pushed < report.excavated);
    assert!((sim.body_soil().volume() - (report.excavated - report.pushed)).abs() < 1e-3);
    assert_volume(&sim, initial);
}

// =============================================================================
// TEST 6: BAD POSES ARE REJECTED WITHOUT SIDE EFFECTS
// =============================================================================

#[test]
fn out_of_grid_pose_is_rejected() {
    let grid = flat_grid(10, 10);
    let mut sim =
        SoilSimulator::new(grid, small_bucket(), at(5.1, 3.0, 5.5), SimParams::default()).unwrap();
    sim.step(StepInput::at(at(5.1, -1.0, 5.5))).unwrap();
    let snapshot = sim.checkpoint();

    assert!(sim.step(StepInput::at(at(9.5, -1.0, 5.5))).is_err());
    assert!(sim.step(StepInput::at(at(5.1, 4.8, 5.5))).is_err());
    assert!(sim.step(StepInput::at(at(f32::NAN, 0.0, 5.5))).is_err());

    assert_eq!(sim.checkpoint(), snapshot);
}

// =============================================================================
// TEST 7: BURIED DRAG THEN DUMP WHILE HOVERING
// Dragging a bucket well below the surface loads no more than it holds and
// bulldozes the rest. Dumping just above the ground spills what does not fit
// under the bucket
// =============================================================================

#[test]
fn buried_drag_stays_within_capacity_and_dumps() {
    let grid = flat_grid(20, 10);
    let bucket = wide_bucket();
    let capacity = bucket.capacity() as f64;
    let mut sim =
        SoilSimulator::new(grid, bucket, at(2.2, 3.0, 5.0), SimParams::default()).unwrap();
    let initial = sim.total_volume();

    for i in 0..8 {
        let report = sim.step(StepInput::at(at(2.2 + 0.75 * i as f32, -1.5, 5.0))).unwrap();
        assert!(!report.skipped);
        assert_volume(&sim, initial);
        let carried = sim.body_soil().volume();
        assert!(carried <= capacity + 1e-4, "bucket holds {carried}, capacity {capacity}");
        assert!(unstable_pairs(sim.grid(), sim.occupancy(), &sim.params().relax).is_empty());
    }
    assert!(sim.body_soil().volume() > 0.5);

    sim.step(StepInput::at(at(14.2, 0.05, 5.0))).unwrap();
    assert_volume(&sim, initial);
    let report = sim.step(StepInput::dump(at(14.2, 0.05, 5.0))).unwrap();
    assert!(sim.body_soil().is_empty());
    assert!(report.released > 0.0);
    assert_volume(&sim, initial);

    for (cell, envelope) in sim.occupancy().iter() {
        let h = sim.grid().surface_height(cell);
        assert!(h <= envelope.bottom + 1e-4, "soil at {h} above bucket bottom {}", envelope.bottom);
    }
    assert!(sim.heightfield().iter().all(|&h| h <= CEILING));
    sim.grid().validate().unwrap();
}
