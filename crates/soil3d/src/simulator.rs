//! Per-step driver tying geometry, excavation, body soil and relaxation together.
//!
//! Each [`SoilSimulator::step`] works on a copy of the grid and body soil and
//! only commits once every stage, the consistency check and the mass check
//! have passed. A failed step leaves the simulator exactly as it was.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::body_soil::{excavate, push_to_neighbors, BodySoil, BodySoilParcel, ParcelEvent};
use crate::bucket::{max_vertex_displacement, BucketShape, Pose};
use crate::constants::MASS_TOLERANCE;
use crate::error::{check_mass, SoilError, SoilResult};
use crate::grid::{Cell, Grid};
use crate::intersect::{detect, DetectParams, Occupancy};
use crate::relax::{relax, RelaxOutcome, RelaxParams, StabilityWarning};
use crate::scan::{DirectionOrder, ScanOrder};

/// Simulator settings. Missing fields take their defaults when loaded from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    pub detect: DetectParams,
    /// Coverage at or above which all excavated soil goes to the bucket.
    pub full_coverage_threshold: f32,
    pub relax: RelaxParams,
    pub scan_order: ScanOrder,
    /// Relative drift allowed by the end-of-step mass check.
    pub mass_tolerance: f64,
    /// Steps moving no vertex further than this many cells are skipped.
    pub min_movement_cells: f32,
    /// Steps moving a vertex further than this many cells log a warning.
    pub max_movement_cells: f32,
    /// Columns added around the occupied area in [`StepReport::body_area`].
    pub area_buffer: usize,
    pub record_pose_history: bool,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            detect: DetectParams::default(),
            full_coverage_threshold: 0.75,
            relax: RelaxParams::default(),
            scan_order: ScanOrder::Fixed,
            mass_tolerance: MASS_TOLERANCE,
            min_movement_cells: 0.5,
            max_movement_cells: 2.0,
            area_buffer: 2,
            record_pose_history: false,
        }
    }
}

impl SimParams {
    pub fn validate(&self) -> SoilResult<()> {
        self.detect.validate()?;
        self.relax.validate()?;
        if !(self.full_coverage_threshold > 0.0 && self.full_coverage_threshold <= 1.0) {
            return Err(SoilError::config(format!(
                "full_coverage_threshold must be in (0, 1], got {}",
                self.full_coverage_threshold
            )));
        }
        if !(self.mass_tolerance.is_finite() && self.mass_tolerance > 0.0) {
            return Err(SoilError::config(format!(
                "mass_tolerance must be positive, got {}",
                self.mass_tolerance
            )));
        }
        if !(self.min_movement_cells >= 0.0 && self.max_movement_cells >= self.min_movement_cells) {
            return Err(SoilError::config(format!(
                "movement gate [{}, {}] is invalid",
                self.min_movement_cells, self.max_movement_cells
            )));
        }
        Ok(())
    }

    /// Save params to a JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> SoilResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load params from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> SoilResult<Self> {
        let json = fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&json)?;
        params.validate()?;
        Ok(params)
    }
}

/// Input for one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepInput {
    pub pose: Pose,
    /// Release all body soil onto the terrain this step.
    pub dump: bool,
}

impl StepInput {
    pub fn at(pose: Pose) -> Self {
        Self { pose, dump: false }
    }

    pub fn dump(pose: Pose) -> Self {
        Self { pose, dump: true }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum StepStatus {
    #[default]
    Clean,
    Warning(StabilityWarning),
}

/// What happened during a step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u64,
    /// The bucket moved too little and nothing was computed.
    pub skipped: bool,
    pub events: Vec<ParcelEvent>,
    /// Volume cut from the terrain (m³).
    pub excavated: f64,
    /// Part of the excavated volume pushed to neighbouring columns (m³).
    pub pushed: f64,
    /// Volume returned from the bucket to the terrain (m³).
    pub released: f64,
    pub relax: RelaxOutcome,
    /// Occupied cell rectangle grown by `area_buffer`.
    pub body_area: Option<(Cell, Cell)>,
    pub status: StepStatus,
}

/// Bucket/soil simulator.
#[derive(Clone, Debug)]
pub struct SoilSimulator {
    grid: Grid,
    shape: BucketShape,
    pose: Pose,
    body_soil: BodySoil,
    occupancy: Occupancy,
    params: SimParams,
    pose_history: Vec<Pose>,
    step_count: u64,
}

impl SoilSimulator {
    /// Create a simulator with the bucket at `pose`. No soil is moved until
    /// the first step.
    pub fn new(grid: Grid, shape: BucketShape, pose: Pose, params: SimParams) -> SoilResult<Self> {
        params.validate()?;
        grid.validate()?;
        let pose = pose.validated()?;
        let walls = shape.world_walls(&pose)?;
        let occupancy = detect(&grid, &walls, &params.detect)?;
        let pose_history = if params.record_pose_history {
            vec![pose]
        } else {
            Vec::new()
        };
        Ok(Self {
            grid,
            shape,
            pose,
            body_soil: BodySoil::new(),
            occupancy,
            params,
            pose_history,
            step_count: 0,
        })
    }

    pub(crate) fn from_parts(
        grid: Grid,
        shape: BucketShape,
        pose: Pose,
        parcels: Vec<BodySoilParcel>,
        params: SimParams,
        pose_history: Vec<Pose>,
        step_count: u64,
    ) -> SoilResult<Self> {
        let mut sim = Self::new(grid, shape, pose, params)?;
        sim.body_soil = BodySoil::from_parcels(parcels);
        sim.body_soil.rebuild_column_views(&mut sim.grid, &sim.occupancy);
        sim.pose_history = pose_history;
        sim.step_count = step_count;
        Ok(sim)
    }

    /// Advance one step with the bucket at `input.pose`.
    ///
    /// Geometry errors are reported before anything changes. Any later
    /// failure discards the step's work.
    pub fn step(&mut self, input: StepInput) -> SoilResult<StepReport> {
        let pose = input.pose.validated()?;
        let cell_size = self.grid.cell_size;
        let displacement = max_vertex_displacement(&self.shape, &self.pose, &pose);

        if !input.dump && displacement < self.params.min_movement_cells * cell_size {
            debug!(
                "step {}: bucket moved {displacement:.4} m, below the movement gate",
                self.step_count
            );
            return Ok(StepReport {
                step: self.step_count,
                skipped: true,
                ..Default::default()
            });
        }
        if displacement > self.params.max_movement_cells * cell_size {
            warn!(
                "step {}: bucket moved {displacement:.3} m (more than {} cells)",
                self.step_count, self.params.max_movement_cells
            );
        }

        let walls = self.shape.world_walls(&pose)?;
        let occupancy = detect(&self.grid, &walls, &self.params.detect)?;

        let mut grid = self.grid.clone();
        let mut body_soil = self.body_soil.clone();
        let mut order = DirectionOrder::for_step(self.params.scan_order, self.step_count);
        let mut report = StepReport {
            step: self.step_count,
            ..Default::default()
        };
        let before = grid.terrain_volume() + body_soil.volume();

        body_soil.update_positions(&grid, &self.pose, &pose, &occupancy, &mut report.events);
        report.released +=
            body_soil.release_unsupported(&mut grid, &occupancy, &mut order, &mut report.events);

        let area = grid.cell_area();
        let capacity = self.shape.capacity() as f64;
        for (cell, envelope) in occupancy.iter() {
            let split = excavate(
                grid.column_mut(cell),
                envelope,
                area,
                self.params.full_coverage_threshold,
            );
            if split.removed <= 0.0 {
                continue;
            }
            report.excavated += split.removed as f64;

            // the bucket never holds more than its struck volume
            let room = (capacity - body_soil.volume()).max(0.0) as f32;
            let mut to_bucket = split.to_parcel.min(room);
            let to_push = split.removed - to_bucket;
            if to_push > 0.0 {
                report.pushed += to_push as f64;
                let leftover = push_to_neighbors(&mut grid, &occupancy, cell, to_push, &mut order);
                if leftover > 0.0 {
                    warn!(
                        "no room around ({}, {}) for {leftover:.4} m3, keeping it on the bucket",
                        cell.x, cell.z
                    );
                    report.pushed -= leftover as f64;
                    to_bucket += leftover;
                }
            }

            let center = grid.cell_center(cell);
            let anchor = pose.inverse_transform_point(center.with_y(envelope.top));
            body_soil.attach(
                envelope.contact,
                cell,
                cell,
                to_bucket,
                anchor,
                &mut report.events,
            );
        }

        if input.dump {
            report.released +=
                body_soil.dump_all(&mut grid, &occupancy, &mut order, &mut report.events);
        }

        report.relax = relax(&mut grid, &occupancy, &self.params.relax, &mut order)?;
        body_soil.rebuild_column_views(&mut grid, &occupancy);
        grid.validate()?;

        let after = grid.terrain_volume() + body_soil.volume();
        check_mass("step", before, after, self.params.mass_tolerance)?;

        report.body_area = occupancy.bounding_box(&grid, self.params.area_buffer);
        report.status = match report.relax.warning.clone() {
            Some(warning) => StepStatus::Warning(warning),
            None => StepStatus::Clean,
        };
        debug!(
            "step {}: {} columns under the bucket, excavated {:.4} m3, pushed {:.4} m3, released {:.4} m3, {} relax moves",
            self.step_count,
            occupancy.len(),
            report.excavated,
            report.pushed,
            report.released,
            report.relax.moves
        );

        self.grid = grid;
        self.body_soil = body_soil;
        self.occupancy = occupancy;
        self.pose = pose;
        if self.params.record_pose_history {
            self.pose_history.push(pose);
        }
        self.step_count += 1;
        Ok(report)
    }

    /// Run a relaxation pass against the current bucket without moving it.
    pub fn settle(&mut self) -> SoilResult<RelaxOutcome> {
        let mut grid = self.grid.clone();
        let mut order = DirectionOrder::for_step(self.params.scan_order, self.step_count);
        let outcome = relax(&mut grid, &self.occupancy, &self.params.relax, &mut order)?;
        self.body_soil.rebuild_column_views(&mut grid, &self.occupancy);
        grid.validate()?;
        self.grid = grid;
        Ok(outcome)
    }

    /// Terrain plus body soil volume (m³).
    pub fn total_volume(&self) -> f64 {
        self.grid.terrain_volume() + self.body_soil.volume()
    }

    pub fn heightfield(&self) -> Vec<f32> {
        self.grid.heightfield()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn shape(&self) -> &BucketShape {
        &self.shape
    }

    pub fn body_soil(&self) -> &BodySoil {
        &self.body_soil
    }

    pub fn parcels(&self) -> impl Iterator<Item = &BodySoilParcel> + '_ {
        self.body_soil.iter()
    }

    pub fn occupancy(&self) -> &Occupancy {
        &self.occupancy
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn pose_history(&self) -> &[Pose] {
        &self.pose_history
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }
}
