//! Angle-of-repose relaxation.
//!
//! A column is unstable when it stands higher above a neighbour than the
//! repose bound allows: `h_c - h_n > max_slope * cell_size * distance`, with
//! distance 1 for cardinal and sqrt(2) for diagonal neighbours. Unstable
//! columns are processed from a work queue; every move re-queues the columns
//! it could have destabilized, so the pass stops exactly when the grid is
//! stable (or the move budget runs out).
//!
//! The bucket blocks soil. A move into an intersected column is capped by
//! the gap under the bucket, and soil pinned under the bucket (surface at or
//! above the envelope bottom) does not move out.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_REPOSE_ANGLE, HEIGHT_TOLERANCE, MASS_TOLERANCE};
use crate::error::{check_mass, SoilError, SoilResult};
use crate::grid::{Cell, Grid};
use crate::intersect::Occupancy;
use crate::scan::{DirectionOrder, LATERAL_4, LATERAL_8};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connectivity {
    #[default]
    Four,
    Eight,
}

impl Connectivity {
    pub fn offsets(self) -> &'static [(i32, i32)] {
        match self {
            Connectivity::Four => &LATERAL_4,
            Connectivity::Eight => &LATERAL_8,
        }
    }
}

/// How excess is shared when a column is unstable toward several neighbours.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// Move half of the excess toward the steepest neighbour only.
    #[default]
    SteepestFirst,
    /// Share among every violating neighbour in proportion to its excess.
    Even,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxParams {
    /// Maximum stable slope, `tan(repose angle)`.
    pub max_slope: f32,
    pub connectivity: Connectivity,
    pub split_policy: SplitPolicy,
    /// Move budget per column per pass.
    pub max_moves_per_cell: usize,
    /// Height excess ignored as noise (m).
    pub tolerance: f32,
    /// Relative drift allowed by the end-of-pass mass check.
    pub mass_tolerance: f64,
}

impl Default for RelaxParams {
    fn default() -> Self {
        Self {
            max_slope: DEFAULT_REPOSE_ANGLE.tan(),
            connectivity: Connectivity::Four,
            split_policy: SplitPolicy::SteepestFirst,
            max_moves_per_cell: 64,
            tolerance: HEIGHT_TOLERANCE,
            mass_tolerance: MASS_TOLERANCE,
        }
    }
}

impl RelaxParams {
    /// Parameters for a repose angle given in radians.
    pub fn from_repose_angle(angle: f32) -> Self {
        Self {
            max_slope: angle.tan(),
            ..Default::default()
        }
    }

    /// Allowed height difference to a cardinal neighbour.
    pub fn height_bound(&self, cell_size: f32) -> f32 {
        self.max_slope * cell_size
    }

    pub fn validate(&self) -> SoilResult<()> {
        if !(self.max_slope.is_finite() && self.max_slope >= 0.0) {
            return Err(SoilError::config(format!(
                "max_slope must be finite and non-negative, got {}",
                self.max_slope
            )));
        }
        if self.max_moves_per_cell == 0 {
            return Err(SoilError::config("max_moves_per_cell must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance >= 0.0) {
            return Err(SoilError::config(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if !(self.mass_tolerance.is_finite() && self.mass_tolerance > 0.0) {
            return Err(SoilError::config(format!(
                "mass_tolerance must be positive, got {}",
                self.mass_tolerance
            )));
        }
        Ok(())
    }
}

/// Relaxation gave up before reaching a stable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StabilityWarning {
    pub moves: usize,
    pub budget: usize,
    /// Columns still unstable when the budget ran out.
    pub unstable: Vec<Cell>,
}

impl fmt::Display for StabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relaxation stopped after {} of {} moves with {} unstable columns",
            self.moves,
            self.budget,
            self.unstable.len()
        )
    }
}

/// Result of one relaxation pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelaxOutcome {
    pub moves: usize,
    /// Volume moved between columns (m³).
    pub volume_moved: f64,
    /// Columns left unstable because the bucket blocks them.
    pub deferred: Vec<Cell>,
    pub warning: Option<StabilityWarning>,
}

impl RelaxOutcome {
    pub fn is_stable(&self) -> bool {
        self.warning.is_none()
    }
}

struct Candidate {
    cell: Cell,
    excess: f32,
    capacity: f32,
}

/// Relax `grid` until every column satisfies the repose bound or the move
/// budget (`max_moves_per_cell` times the column count) is exhausted.
///
/// Fails with [`SoilError::MassConservation`] if the terrain volume drifts.
pub fn relax(
    grid: &mut Grid,
    occupancy: &Occupancy,
    params: &RelaxParams,
    order: &mut DirectionOrder,
) -> SoilResult<RelaxOutcome> {
    let before = grid.terrain_volume();
    let bound = params.height_bound(grid.cell_size);
    let tol = params.tolerance;
    let area = grid.cell_area();
    let budget = params.max_moves_per_cell.saturating_mul(grid.cell_count());

    let mut dirs: Vec<(i32, i32)> = params.connectivity.offsets().to_vec();
    let mut queued = vec![false; grid.cell_count()];
    let mut queue: VecDeque<Cell> = unstable_cells(grid, params).into();
    order.shuffle(queue.make_contiguous());
    for cell in &queue {
        queued[grid.cell_index(*cell)] = true;
    }

    let mut outcome = RelaxOutcome::default();
    let mut deferred = BTreeSet::new();
    let mut visits = 0usize;

    while let Some(cell) = queue.pop_front() {
        queued[grid.cell_index(cell)] = false;
        if visits >= budget {
            queue.push_front(cell);
            break;
        }
        visits += 1;

        let h = grid.surface_height(cell);
        if let Some(env) = occupancy.get(cell) {
            if h >= env.bottom - tol {
                // pinned under the bucket
                if !violations(grid, cell, &dirs, bound, tol).is_empty() {
                    deferred.insert(cell);
                }
                continue;
            }
        }

        order.shuffle(&mut dirs);
        let mut candidates = violations(grid, cell, &dirs, bound, tol);
        if candidates.is_empty() {
            deferred.remove(&cell);
            continue;
        }
        for c in &mut candidates {
            c.capacity = match occupancy.get(c.cell) {
                Some(env) => env.bottom - grid.surface_height(c.cell),
                None => f32::INFINITY,
            };
        }
        let blocked = candidates.iter().any(|c| c.capacity <= tol);
        candidates.retain(|c| c.capacity > tol);
        if candidates.is_empty() {
            deferred.insert(cell);
            continue;
        }

        let shares: Vec<(Cell, f32, f32)> = match params.split_policy {
            SplitPolicy::SteepestFirst => {
                let steepest = candidates
                    .iter()
                    .fold(&candidates[0], |best, c| if c.excess > best.excess { c } else { best });
                vec![(steepest.cell, steepest.excess * 0.5, steepest.capacity)]
            }
            SplitPolicy::Even => {
                let k = candidates.len() as f32;
                candidates
                    .iter()
                    .map(|c| (c.cell, c.excess / (2.0 * k), c.capacity))
                    .collect()
            }
        };

        for (target, amount, capacity) in shares {
            let amount = amount.min(capacity);
            let origin = grid.column(cell).top_origin();
            let moved = grid.column_mut(cell).remove_top(amount);
            if moved <= 0.0 {
                continue;
            }
            grid.column_mut(target).deposit(moved, origin);
            outcome.moves += 1;
            outcome.volume_moved += (moved * area) as f64;

            enqueue(grid, &mut queue, &mut queued, target);
            for &(dx, dz) in params.connectivity.offsets() {
                if let Some(n) = grid.neighbor(cell, dx, dz) {
                    enqueue(grid, &mut queue, &mut queued, n);
                }
            }
        }
        if blocked {
            deferred.insert(cell);
        }
        enqueue(grid, &mut queue, &mut queued, cell);
    }

    if !queue.is_empty() {
        let unstable = unstable_cells(grid, params)
            .into_iter()
            .filter(|c| !deferred.contains(c))
            .collect::<Vec<_>>();
        if !unstable.is_empty() {
            let warning = StabilityWarning {
                moves: outcome.moves,
                budget,
                unstable,
            };
            log::warn!("{warning}");
            outcome.warning = Some(warning);
        }
    }

    let still_unstable: BTreeSet<Cell> = unstable_cells(grid, params).into_iter().collect();
    outcome.deferred = deferred.intersection(&still_unstable).copied().collect();

    check_mass("relaxation", before, grid.terrain_volume(), params.mass_tolerance)?;
    Ok(outcome)
}

fn enqueue(grid: &Grid, queue: &mut VecDeque<Cell>, queued: &mut [bool], cell: Cell) {
    let i = grid.cell_index(cell);
    if !queued[i] {
        queued[i] = true;
        queue.push_back(cell);
    }
}

fn distance_factor((dx, dz): (i32, i32)) -> f32 {
    if dx != 0 && dz != 0 {
        std::f32::consts::SQRT_2
    } else {
        1.0
    }
}

fn violations(grid: &Grid, cell: Cell, dirs: &[(i32, i32)], bound: f32, tol: f32) -> Vec<Candidate> {
    let h = grid.surface_height(cell);
    dirs.iter()
        .filter_map(|&dir| {
            let n = grid.neighbor(cell, dir.0, dir.1)?;
            let excess = h - grid.surface_height(n) - bound * distance_factor(dir);
            (excess > tol).then_some(Candidate {
                cell: n,
                excess,
                capacity: f32::INFINITY,
            })
        })
        .collect()
}

fn is_unstable(grid: &Grid, cell: Cell, params: &RelaxParams) -> bool {
    let bound = params.height_bound(grid.cell_size);
    let h = grid.surface_height(cell);
    params.connectivity.offsets().iter().any(|&dir| {
        grid.neighbor(cell, dir.0, dir.1).is_some_and(|n| {
            h - grid.surface_height(n) - bound * distance_factor(dir) > params.tolerance
        })
    })
}

/// Columns that exceed the repose bound toward at least one neighbour, in
/// row-major order.
#[cfg(not(feature = "parallel"))]
pub fn unstable_cells(grid: &Grid, params: &RelaxParams) -> Vec<Cell> {
    grid.cells().filter(|&c| is_unstable(grid, c, params)).collect()
}

/// Columns that exceed the repose bound toward at least one neighbour, in
/// row-major order.
#[cfg(feature = "parallel")]
pub fn unstable_cells(grid: &Grid, params: &RelaxParams) -> Vec<Cell> {
    (0..grid.cell_count())
        .into_par_iter()
        .map(|i| Cell::new(i % grid.width, i / grid.width))
        .filter(|&c| is_unstable(grid, c, params))
        .collect()
}

/// Neighbouring pairs `(high, low)` that violate the bound while neither
/// column is under the bucket.
pub fn unstable_pairs(grid: &Grid, occupancy: &Occupancy, params: &RelaxParams) -> Vec<(Cell, Cell)> {
    let bound = params.height_bound(grid.cell_size);
    let mut pairs = Vec::new();
    for cell in grid.cells() {
        if occupancy.is_occupied(cell) {
            continue;
        }
        let h = grid.surface_height(cell);
        for &dir in params.connectivity.offsets() {
            let Some(n) = grid.neighbor(cell, dir.0, dir.1) else {
                continue;
            };
            if occupancy.is_occupied(n) {
                continue;
            }
            if h - grid.surface_height(n) - bound * distance_factor(dir) > params.tolerance {
                pairs.push((cell, n));
            }
        }
    }
    pairs
}
