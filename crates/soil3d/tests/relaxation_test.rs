//! Angle of Repose Relaxation Tests
//!
//! Piles and steps of soil on a flat grid must settle until no two
//! neighbouring columns differ by more than `max_slope * cell_size`,
//! without gaining or losing volume.

use soil3d::{
    generate_noise_terrain, relax, unstable_pairs, BucketShape, Cell, Connectivity,
    DirectionOrder, Grid, NoiseTerrainConfig, Occupancy, Pose, RelaxParams, ScanOrder,
    SimParams, SoilSimulator, SplitPolicy, Vec3,
};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Flat grid with a single tall column in the middle
fn pile_grid(size: usize, cell_size: f32, pile_height: f32) -> Grid {
    let mut heights = vec![0.0; size * size];
    let center = size / 2;
    heights[center * size + center] = pile_height;
    Grid::from_heightfield(size, size, cell_size, -1.0, pile_height + 1.0, &heights).unwrap()
}

fn params(max_slope: f32) -> RelaxParams {
    RelaxParams {
        max_slope,
        ..Default::default()
    }
}

fn fixed() -> DirectionOrder {
    DirectionOrder::new(ScanOrder::Fixed)
}

/// Largest cardinal height difference in the grid
fn max_cardinal_step(grid: &Grid) -> f32 {
    let mut max_step = 0.0f32;
    for cell in grid.cells() {
        for (dx, dz) in [(1, 0), (0, 1)] {
            if let Some(n) = grid.neighbor(cell, dx, dz) {
                max_step = max_step.max((grid.surface_height(cell) - grid.surface_height(n)).abs());
            }
        }
    }
    max_step
}

// =============================================================================
// TEST 1: TWO COLUMNS
// Heights 5 and 0 with a unit slope settle to a unit step
// =============================================================================

#[test]
fn two_columns_reach_unit_step() {
    let mut grid = Grid::from_heightfield(2, 1, 1.0, -1.0, 10.0, &[5.0, 0.0]).unwrap();
    let outcome = relax(&mut grid, &Occupancy::default(), &params(1.0), &mut fixed()).unwrap();

    let h = grid.heightfield();
    assert!((h[0] - h[1]).abs() <= 1.0 + 1e-4, "step is {}", h[0] - h[1]);
    assert!((h[0] + h[1] - 5.0).abs() < 1e-4, "volume changed: {h:?}");
    assert!(outcome.is_stable());
    assert!(outcome.deferred.is_empty());
}

// =============================================================================
// TEST 2: PILE COLLAPSE
// A single column collapses into a cone bounded by the repose slope
// =============================================================================

#[test]
fn pile_collapses_to_repose_slope() {
    let slope = 35.0f32.to_radians().tan();
    let mut grid = pile_grid(21, 0.5, 6.0);
    let before = grid.terrain_volume();

    let p = RelaxParams::from_repose_angle(35.0f32.to_radians());
    let outcome = relax(&mut grid, &Occupancy::default(), &p, &mut fixed()).unwrap();

    assert!(outcome.is_stable(), "{:?}", outcome.warning);
    assert!(outcome.moves > 0);
    assert!((grid.terrain_volume() - before).abs() < 1e-3);

    let bound = slope * grid.cell_size;
    let max_step = max_cardinal_step(&grid);
    assert!(
        max_step <= bound + 1e-3,
        "step {max_step} exceeds repose bound {bound}"
    );

    let center = grid.surface_height(Cell::new(10, 10));
    assert!(center < 6.0, "pile should have lost height, still {center}");
    assert!(grid.surface_height(Cell::new(11, 10)) > 0.0, "soil should have spread");
}

// =============================================================================
// TEST 3: IDEMPOTENCE
// A relaxed grid does not change on a second pass
// =============================================================================

#[test]
fn second_pass_is_a_no_op() {
    let config = NoiseTerrainConfig {
        amplitude: 2.0,
        feature_size: 4.0,
        ..Default::default()
    };
    let mut grid = generate_noise_terrain(24, 24, 0.5, -5.0, 5.0, &config).unwrap();
    let p = RelaxParams {
        max_moves_per_cell: 256,
        ..params(0.6)
    };

    let first = relax(&mut grid, &Occupancy::default(), &p, &mut fixed()).unwrap();
    assert!(first.is_stable());
    let settled = grid.heightfield();

    let outcome = relax(&mut grid, &Occupancy::default(), &p, &mut fixed()).unwrap();
    assert_eq!(outcome.moves, 0);
    assert_eq!(grid.heightfield(), settled);
}

// =============================================================================
// TEST 4: POLICIES AND CONNECTIVITY
// Every combination ends stable and conserves volume
// =============================================================================

#[test]
fn all_policies_settle() {
    for connectivity in [Connectivity::Four, Connectivity::Eight] {
        for split_policy in [SplitPolicy::SteepestFirst, SplitPolicy::Even] {
            let mut grid = pile_grid(15, 1.0, 8.0);
            let before = grid.terrain_volume();
            let p = RelaxParams {
                connectivity,
                split_policy,
                ..params(1.0)
            };
            let outcome = relax(&mut grid, &Occupancy::default(), &p, &mut fixed()).unwrap();
            assert!(outcome.is_stable(), "{connectivity:?}/{split_policy:?}");
            assert!(unstable_pairs(&grid, &Occupancy::default(), &p).is_empty());
            assert!((grid.terrain_volume() - before).abs() < 1e-3);
        }
    }
}

// =============================================================================
// TEST 5: SEEDED ORDER IS REPRODUCIBLE
// =============================================================================

#[test]
fn seeded_runs_match() {
    let run = || {
        let mut grid = pile_grid(11, 1.0, 6.0);
        let mut order = DirectionOrder::new(ScanOrder::Seeded(1234));
        relax(&mut grid, &Occupancy::default(), &params(0.8), &mut order).unwrap();
        grid.heightfield()
    };
    assert_eq!(run(), run());
}

// =============================================================================
// TEST 6: SETTLING AROUND A RESTING BUCKET
// Soil does not flow into the space the bucket occupies
// =============================================================================

#[test]
fn settle_respects_bucket() {
    let mut heights = vec![0.0; 10 * 10];
    heights[5 * 10 + 4] = 3.0;
    let grid = Grid::from_heightfield(10, 10, 1.0, -2.0, 6.0, &heights).unwrap();
    let bucket = BucketShape::prism(
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::ZERO,
        Vec3::new(0.8, 0.0, 0.0),
        0.8,
    )
    .unwrap();
    // base hovers 0.2 above the ground right next to the pile
    let pose = Pose::from_position(Vec3::new(5.1, 0.2, 5.5));
    let mut sim = SoilSimulator::new(grid, bucket, pose, SimParams::default()).unwrap();
    let before = sim.total_volume();

    let outcome = sim.settle().unwrap();
    assert!(outcome.moves > 0);
    let under_bucket = sim.grid().surface_height(Cell::new(5, 5));
    assert!(under_bucket <= 0.2 + 1e-4, "soil rose into the bucket: {under_bucket}");
    assert!((sim.total_volume() - before).abs() < 1e-3);
    assert!(unstable_pairs(sim.grid(), sim.occupancy(), &sim.params().relax).is_empty());
}

// =============================================================================
// TEST 7: DEFAULT BUDGET
// The stock parameters settle a tall pile and rough terrain without running
// out of moves
// =============================================================================

#[test]
fn default_params_settle_a_pile() {
    let p = RelaxParams::default();

    let mut grid = pile_grid(21, 0.5, 6.0);
    let before = grid.terrain_volume();
    let outcome = relax(&mut grid, &Occupancy::default(), &p, &mut fixed()).unwrap();
    assert!(outcome.is_stable(), "{:?}", outcome.warning);
    assert!(unstable_pairs(&grid, &Occupancy::default(), &p).is_empty());
    assert!((grid.terrain_volume() - before).abs() < 1e-3);

    let config = NoiseTerrainConfig {
        amplitude: 2.0,
        feature_size: 4.0,
        ..Default::default()
    };
    let mut grid = generate_noise_terrain(24, 24, 0.5, -5.0, 5.0, &config).unwrap();
    let before = grid.terrain_volume();
    let mut order = DirectionOrder::new(ScanOrder::Seeded(5));
    let outcome = relax(&mut grid, &Occupancy::default(), &p, &mut order).unwrap();
    assert!(outcome.is_stable(), "{:?}", outcome.warning);
    assert!(unstable_pairs(&grid, &Occupancy::default(), &p).is_empty());
    assert!((grid.terrain_volume() - before).abs() < 1e-3);
}
