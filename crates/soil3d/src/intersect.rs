//! Bucket / grid intersection.
//!
//! [`detect`] rasterizes the placed walls onto the column grid. Each column
//! is sub-sampled on an `S x S` lattice; every sample that falls inside a
//! wall's footprint contributes the wall's height there to the column's
//! vertical envelope. Wall edges are then traced through the columns the
//! wall already touches so that the envelope also includes the rim heights.
//!
//! Walls whose footprint is thinner than half a cell (side walls seen
//! edge-on, a vertical back plate) would slip between samples, so they are
//! traced along their edges instead. Each traced point snaps to the
//! sub-sample containing it.

use std::collections::{BTreeMap, BTreeSet};

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::bucket::{WallId, WorldWall};
use crate::constants::{DEFAULT_SAMPLES_PER_AXIS, MAX_SAMPLES_PER_AXIS};
use crate::error::{GeometryError, SoilError, SoilResult};
use crate::grid::{Cell, Grid};

/// Vertical extent of the bucket over one column.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub bottom: f32,
    pub top: f32,
    /// Fraction of the column footprint under the bucket, in `[0, 1]`.
    pub coverage: f32,
    /// Wall that defines the envelope bottom.
    pub contact: WallId,
}

impl Envelope {
    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }
}

/// Columns intersected by the bucket, in deterministic cell order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Occupancy {
    cells: BTreeMap<Cell, Envelope>,
}

impl Occupancy {
    pub fn get(&self, cell: Cell) -> Option<&Envelope> {
        self.cells.get(&cell)
    }

    pub fn is_occupied(&self, cell: Cell) -> bool {
        self.cells.contains_key(&cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Cell, &Envelope)> + '_ {
        self.cells.iter().map(|(c, e)| (*c, e))
    }

    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.cells.keys().copied()
    }

    /// Smallest cell rectangle containing every occupied column, grown by
    /// `buffer` columns and clipped to the grid.
    pub fn bounding_box(&self, grid: &Grid, buffer: usize) -> Option<(Cell, Cell)> {
        let mut cells = self.cells.keys();
        let first = cells.next()?;
        let (mut min, mut max) = (*first, *first);
        for c in cells {
            min.x = min.x.min(c.x);
            min.z = min.z.min(c.z);
            max.x = max.x.max(c.x);
            max.z = max.z.max(c.z);
        }
        Some((
            Cell::new(min.x.saturating_sub(buffer), min.z.saturating_sub(buffer)),
            Cell::new(
                (max.x + buffer).min(grid.width - 1),
                (max.z + buffer).min(grid.depth - 1),
            ),
        ))
    }

    #[cfg(test)]
    pub(crate) fn from_envelopes(entries: impl IntoIterator<Item = (Cell, Envelope)>) -> Self {
        Self {
            cells: entries.into_iter().collect(),
        }
    }
}

/// Detector settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectParams {
    /// Sub-samples per column axis.
    pub samples_per_axis: usize,
    /// Minimum covered fraction for a column to count as occupied.
    pub occupancy_threshold: f32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            samples_per_axis: DEFAULT_SAMPLES_PER_AXIS,
            occupancy_threshold: 0.5,
        }
    }
}

impl DetectParams {
    pub fn validate(&self) -> SoilResult<()> {
        if !(1..=MAX_SAMPLES_PER_AXIS).contains(&self.samples_per_axis) {
            return Err(SoilError::config(format!(
                "samples_per_axis must be in 1..={MAX_SAMPLES_PER_AXIS}, got {}",
                self.samples_per_axis
            )));
        }
        if !(self.occupancy_threshold > 0.0 && self.occupancy_threshold <= 1.0) {
            return Err(SoilError::config(format!(
                "occupancy_threshold must be in (0, 1], got {}",
                self.occupancy_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct Accum {
    bottom: f32,
    top: f32,
    contact: WallId,
    mask: u64,
}

impl Accum {
    fn new(wall: WallId, y: f32) -> Self {
        Self {
            bottom: y,
            top: y,
            contact: wall,
            mask: 0,
        }
    }

    fn include(&mut self, wall: WallId, y: f32) {
        if y < self.bottom {
            self.bottom = y;
            self.contact = wall;
        }
        self.top = self.top.max(y);
    }
}

#[derive(Default)]
struct Raster {
    cells: BTreeMap<Cell, Accum>,
}

impl Raster {
    fn include(&mut self, cell: Cell, wall: WallId, y: f32, bits: u64) {
        let acc = self
            .cells
            .entry(cell)
            .or_insert_with(|| Accum::new(wall, y));
        acc.include(wall, y);
        acc.mask |= bits;
    }
}

/// Compute the occupancy of the walls over `grid`.
///
/// Fails with [`GeometryError::OutOfGrid`] when any vertex leaves the grid
/// laterally or the `[floor, ceiling]` range vertically. Nothing is mutated.
pub fn detect(
    grid: &Grid,
    walls: &[WorldWall],
    params: &DetectParams,
) -> Result<Occupancy, GeometryError> {
    for wall in walls {
        for &v in &wall.vertices {
            if !v.is_finite() {
                return Err(GeometryError::NonFinite { what: "world wall vertex" });
            }
            if !grid.contains_point(v) {
                return Err(GeometryError::OutOfGrid {
                    wall: wall.id,
                    point: v,
                });
            }
        }
    }

    let s = params.samples_per_axis.clamp(1, MAX_SAMPLES_PER_AXIS);
    let mut raster = Raster::default();

    for wall in walls {
        if is_thin(wall, grid.cell_size) {
            trace_edges(grid, wall, s, |cell, p| {
                raster.include(cell, wall.id, p.y, sample_bit(grid, cell, p, s));
            });
        } else {
            rasterize_face(grid, wall, s, &mut raster);
        }
    }

    let samples = (s * s) as f32;
    let cells = raster
        .cells
        .into_iter()
        .filter_map(|(cell, acc)| {
            let coverage = acc.mask.count_ones() as f32 / samples;
            (coverage >= params.occupancy_threshold).then_some((
                cell,
                Envelope {
                    bottom: acc.bottom,
                    top: acc.top,
                    coverage,
                    contact: acc.contact,
                },
            ))
        })
        .collect();
    Ok(Occupancy { cells })
}

/// Footprint narrower than half a cell across its longest edge.
fn is_thin(wall: &WorldWall, cell_size: f32) -> bool {
    let footprint = wall.footprint();
    let area = polygon_area(&footprint).abs();
    let longest = wall
        .edges()
        .map(|(a, b)| Vec2::new(b.x - a.x, b.z - a.z).length())
        .fold(0.0, f32::max);
    longest <= f32::EPSILON || area < 0.5 * cell_size * longest
}

fn rasterize_face(grid: &Grid, wall: &WorldWall, s: usize, raster: &mut Raster) {
    let footprint = wall.footprint();
    let normal = wall.area_normal();
    let c = wall.centroid();
    let height_at = |x: f32, z: f32| c.y - (normal.x * (x - c.x) + normal.z * (z - c.z)) / normal.y;

    let cs = grid.cell_size;
    let (min, max) = footprint
        .iter()
        .fold((Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)), |(lo, hi), p| {
            (lo.min(*p), hi.max(*p))
        });
    let x0 = ((min.x / cs).floor().max(0.0)) as usize;
    let z0 = ((min.y / cs).floor().max(0.0)) as usize;
    let x1 = ((max.x / cs).floor() as usize).min(grid.width - 1);
    let z1 = ((max.y / cs).floor() as usize).min(grid.depth - 1);

    let mut touched = BTreeSet::new();
    for z in z0..=z1 {
        for x in x0..=x1 {
            let cell = Cell::new(x, z);
            for sz in 0..s {
                for sx in 0..s {
                    let px = (x as f32 + (sx as f32 + 0.5) / s as f32) * cs;
                    let pz = (z as f32 + (sz as f32 + 0.5) / s as f32) * cs;
                    if point_in_polygon(Vec2::new(px, pz), &footprint) {
                        let bit = 1u64 << (sz * s + sx);
                        raster.include(cell, wall.id, height_at(px, pz), bit);
                        touched.insert(cell);
                    }
                }
            }
        }
    }

    // Rim heights only count where the face itself landed.
    trace_edges(grid, wall, s, |cell, p| {
        if touched.contains(&cell) {
            raster.include(cell, wall.id, p.y, 0);
        }
    });
}

/// Bit of the sub-sample of `cell` that contains `p`.
fn sample_bit(grid: &Grid, cell: Cell, p: Vec3, s: usize) -> u64 {
    let local = |v: f32, index: usize| {
        let t = (v / grid.cell_size - index as f32) * s as f32;
        (t.max(0.0) as usize).min(s - 1)
    };
    1u64 << (local(p.z, cell.z) * s + local(p.x, cell.x))
}

/// Walk every edge in steps of half a sub-sample and report each point with its column.
fn trace_edges(grid: &Grid, wall: &WorldWall, s: usize, mut visit: impl FnMut(Cell, Vec3)) {
    let step = grid.cell_size / (2 * s) as f32;
    for (a, b) in wall.edges() {
        let lateral = Vec2::new(b.x - a.x, b.z - a.z).length();
        let n = (lateral / step).ceil().max(1.0) as usize;
        for i in 0..=n {
            let p = a.lerp(b, i as f32 / n as f32);
            if let Some(cell) = grid.cell_at(p) {
                visit(cell, p);
            }
        }
    }
}

fn polygon_area(poly: &[Vec2]) -> f32 {
    let n = poly.len();
    (0..n)
        .map(|i| poly[i].perp_dot(poly[(i + 1) % n]))
        .sum::<f32>()
        * 0.5
}

/// Even-odd point in polygon test.
fn point_in_polygon(p: Vec2, poly: &[Vec2]) -> bool {
    let n = poly.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (poly[i], poly[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
