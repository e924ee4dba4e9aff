//! JSON checkpoints of the full simulator state.
//!
//! A checkpoint carries the terrain layer stacks (with a flat heightfield for
//! external tools), the body-soil parcels, the bucket shape and pose, and the
//! step counter. Restoring rebuilds the occupancy from the stored pose.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::body_soil::BodySoilParcel;
use crate::bucket::{BucketShape, Pose};
use crate::constants::HEIGHT_TOLERANCE;
use crate::error::{SoilError, SoilResult};
use crate::grid::{Grid, SoilLayer};
use crate::simulator::{SimParams, SoilSimulator};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub width: usize,
    pub depth: usize,
    pub cell_size: f32,
    pub floor: f32,
    pub ceiling: f32,
    pub step: u64,
    /// Surface heights, row-major.
    pub heightfield: Vec<f32>,
    pub layers: Vec<Vec<SoilLayer>>,
    pub parcels: Vec<BodySoilParcel>,
    pub shape: BucketShape,
    pub pose: Pose,
    #[serde(default)]
    pub pose_history: Vec<Pose>,
    pub params: SimParams,
}

impl Checkpoint {
    pub fn to_json(&self) -> SoilResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> SoilResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Save checkpoint to a JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> SoilResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load checkpoint from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> SoilResult<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Rebuild the grid, checking it against the stored heightfield.
    pub fn to_grid(&self) -> SoilResult<Grid> {
        let grid = Grid::from_layers(
            self.width,
            self.depth,
            self.cell_size,
            self.floor,
            self.ceiling,
            self.layers.clone(),
        )?;
        if self.heightfield.len() != grid.cell_count() {
            return Err(SoilError::config(format!(
                "checkpoint heightfield has {} entries, expected {}",
                self.heightfield.len(),
                grid.cell_count()
            )));
        }
        for (cell, &stored) in grid.cells().zip(&self.heightfield) {
            if (grid.surface_height(cell) - stored).abs() > HEIGHT_TOLERANCE {
                return Err(SoilError::consistency(
                    cell,
                    format!(
                        "layers end at {} but the heightfield says {stored}",
                        grid.surface_height(cell)
                    ),
                ));
            }
        }
        Ok(grid)
    }
}

impl SoilSimulator {
    /// Snapshot the committed state.
    pub fn checkpoint(&self) -> Checkpoint {
        let grid = self.grid();
        Checkpoint {
            width: grid.width,
            depth: grid.depth,
            cell_size: grid.cell_size,
            floor: grid.floor,
            ceiling: grid.ceiling,
            step: self.step_count(),
            heightfield: grid.heightfield(),
            layers: grid.layer_stacks(),
            parcels: self.parcels().cloned().collect(),
            shape: self.shape().clone(),
            pose: *self.pose(),
            pose_history: self.pose_history().to_vec(),
            params: self.params().clone(),
        }
    }

    /// Rebuild a simulator from a checkpoint.
    pub fn restore(checkpoint: &Checkpoint) -> SoilResult<Self> {
        let grid = checkpoint.to_grid()?;
        let parcels = checkpoint.parcels.clone();
        for parcel in &parcels {
            if parcel.cell.x >= grid.width || parcel.cell.z >= grid.depth {
                return Err(SoilError::consistency(parcel.cell, "parcel outside the grid"));
            }
            if !(parcel.volume.is_finite() && parcel.volume >= 0.0) {
                return Err(SoilError::consistency(
                    parcel.cell,
                    format!("parcel volume {}", parcel.volume),
                ));
            }
        }
        SoilSimulator::from_parts(
            grid,
            checkpoint.shape.clone(),
            checkpoint.pose,
            parcels,
            checkpoint.params.clone(),
            checkpoint.pose_history.clone(),
            checkpoint.step,
        )
    }
}
