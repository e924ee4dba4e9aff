//! Column grid holding the terrain.
//!
//! The grid is a regular lattice of `width x depth` columns in the XZ plane
//! (Y is up). Column `(x, z)` covers `[x*cs, (x+1)*cs) x [z*cs, (z+1)*cs)`.
//! Each column stores a contiguous stack of soil layers starting at the grid
//! floor, plus up to two transient bucket-soil layers that mirror the body
//! soil currently resting on the bucket above it.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::bucket::WallId;
use crate::constants::{HEIGHT_TOLERANCE, MAX_BUCKET_SOIL_LAYERS, MAX_TERRAIN_LAYERS};
use crate::error::{SoilError, SoilResult};

/// Integer column coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: usize,
    pub z: usize,
}

impl Cell {
    pub const fn new(x: usize, z: usize) -> Self {
        Self { x, z }
    }
}

/// Where the soil in a layer came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerOrigin {
    /// Present since the grid was built.
    Native,
    /// Released from the bucket, originally excavated at `from`.
    Deposited { from: Cell },
}

/// A vertical slab of terrain soil.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoilLayer {
    pub bottom: f32,
    pub top: f32,
    pub origin: LayerOrigin,
}

impl SoilLayer {
    pub fn thickness(&self) -> f32 {
        (self.top - self.bottom).max(0.0)
    }
}

/// Soil resting on the bucket above a column. Derived from the body-soil
/// parcels after every step; never part of the terrain volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketSoilLayer {
    pub wall: WallId,
    pub bottom: f32,
    pub top: f32,
    pub provenance: Cell,
}

/// One column of the grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    floor: f32,
    terrain: Vec<SoilLayer>,
    #[serde(default)]
    bucket_soil: Vec<BucketSoilLayer>,
}

impl Column {
    /// Column filled with native soil from `floor` up to `height`.
    pub fn new(floor: f32, height: f32) -> Self {
        let mut terrain = Vec::new();
        if height > floor {
            terrain.push(SoilLayer {
                bottom: floor,
                top: height,
                origin: LayerOrigin::Native,
            });
        }
        Self {
            floor,
            terrain,
            bucket_soil: Vec::new(),
        }
    }

    pub(crate) fn from_layers(floor: f32, terrain: Vec<SoilLayer>) -> Self {
        Self {
            floor,
            terrain,
            bucket_soil: Vec::new(),
        }
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    /// Height of the terrain surface.
    pub fn surface(&self) -> f32 {
        self.terrain.last().map_or(self.floor, |layer| layer.top)
    }

    pub fn layers(&self) -> &[SoilLayer] {
        &self.terrain
    }

    pub fn bucket_soil(&self) -> &[BucketSoilLayer] {
        &self.bucket_soil
    }

    /// Total thickness of terrain soil in the column.
    pub fn thickness(&self) -> f32 {
        self.terrain.iter().map(SoilLayer::thickness).sum()
    }

    /// Origin of the soil at the surface.
    pub fn top_origin(&self) -> LayerOrigin {
        self.terrain
            .last()
            .map_or(LayerOrigin::Native, |layer| layer.origin)
    }

    /// Cut everything above `height` (clamped to the floor). Returns the removed thickness.
    pub fn remove_above(&mut self, height: f32) -> f32 {
        let height = height.max(self.floor);
        let mut removed = 0.0;
        while let Some(top) = self.terrain.last_mut() {
            if top.bottom >= height {
                removed += top.thickness();
                self.terrain.pop();
            } else {
                if top.top > height {
                    removed += top.top - height;
                    top.top = height;
                }
                break;
            }
        }
        removed
    }

    /// Remove up to `thickness` from the top. Returns the thickness actually removed.
    pub fn remove_top(&mut self, thickness: f32) -> f32 {
        if thickness <= 0.0 {
            return 0.0;
        }
        let target = self.surface() - thickness;
        self.remove_above(target)
    }

    /// Add `thickness` of soil on top of the column.
    ///
    /// Soil with the same origin as the surface layer extends it, otherwise a
    /// new layer starts. When the stack grows past [`MAX_TERRAIN_LAYERS`] the
    /// two lowest layers merge.
    pub fn deposit(&mut self, thickness: f32, origin: LayerOrigin) {
        if thickness <= 0.0 {
            return;
        }
        let surface = self.surface();
        match self.terrain.last_mut() {
            Some(top) if top.origin == origin => top.top += thickness,
            _ => self.terrain.push(SoilLayer {
                bottom: surface,
                top: surface + thickness,
                origin,
            }),
        }
        if self.terrain.len() > MAX_TERRAIN_LAYERS {
            let upper = self.terrain.remove(1);
            self.terrain[0].top = upper.top;
        }
    }

    pub(crate) fn set_bucket_soil(&mut self, layers: Vec<BucketSoilLayer>) {
        self.bucket_soil = layers;
    }

    fn validate(&self, cell: Cell) -> SoilResult<()> {
        let mut expected_bottom = self.floor;
        for layer in &self.terrain {
            if !layer.bottom.is_finite() || !layer.top.is_finite() {
                return Err(SoilError::consistency(cell, "non-finite layer bound"));
            }
            if layer.top < layer.bottom - HEIGHT_TOLERANCE {
                return Err(SoilError::consistency(
                    cell,
                    format!("layer top {} below bottom {}", layer.top, layer.bottom),
                ));
            }
            if (layer.bottom - expected_bottom).abs() > HEIGHT_TOLERANCE {
                return Err(SoilError::consistency(
                    cell,
                    format!(
                        "layer starts at {} but the layer below ends at {}",
                        layer.bottom, expected_bottom
                    ),
                ));
            }
            expected_bottom = layer.top;
        }
        if self.bucket_soil.len() > MAX_BUCKET_SOIL_LAYERS {
            return Err(SoilError::consistency(
                cell,
                format!("{} bucket-soil layers", self.bucket_soil.len()),
            ));
        }
        for pair in self.bucket_soil.windows(2) {
            if pair[1].bottom < pair[0].top - HEIGHT_TOLERANCE {
                return Err(SoilError::consistency(cell, "bucket-soil layers overlap"));
            }
        }
        Ok(())
    }
}

/// The terrain grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub width: usize,
    pub depth: usize,
    pub cell_size: f32,
    /// Lowest representable height; soil never goes below it.
    pub floor: f32,
    /// Highest height a bucket vertex may reach.
    pub ceiling: f32,
    columns: Vec<Column>,
}

impl Grid {
    /// Flat grid with every column filled to `initial_height`.
    pub fn new(
        width: usize,
        depth: usize,
        cell_size: f32,
        floor: f32,
        ceiling: f32,
        initial_height: f32,
    ) -> SoilResult<Self> {
        let heights = vec![initial_height; width * depth];
        Self::from_heightfield(width, depth, cell_size, floor, ceiling, &heights)
    }

    /// Grid from a row-major (`z * width + x`) heightfield.
    pub fn from_heightfield(
        width: usize,
        depth: usize,
        cell_size: f32,
        floor: f32,
        ceiling: f32,
        heights: &[f32],
    ) -> SoilResult<Self> {
        validate_dimensions(width, depth, cell_size, floor, ceiling)?;
        if heights.len() != width * depth {
            return Err(SoilError::config(format!(
                "heightfield has {} entries, expected {}",
                heights.len(),
                width * depth
            )));
        }
        let mut columns = Vec::with_capacity(heights.len());
        for &h in heights {
            if !h.is_finite() || h < floor || h > ceiling {
                return Err(SoilError::config(format!(
                    "height {h} outside [{floor}, {ceiling}]"
                )));
            }
            columns.push(Column::new(floor, h));
        }
        Ok(Self {
            width,
            depth,
            cell_size,
            floor,
            ceiling,
            columns,
        })
    }

    /// Grid from explicit layer stacks, one per column in row-major order.
    pub fn from_layers(
        width: usize,
        depth: usize,
        cell_size: f32,
        floor: f32,
        ceiling: f32,
        layers: Vec<Vec<SoilLayer>>,
    ) -> SoilResult<Self> {
        validate_dimensions(width, depth, cell_size, floor, ceiling)?;
        if layers.len() != width * depth {
            return Err(SoilError::config(format!(
                "{} layer stacks, expected {}",
                layers.len(),
                width * depth
            )));
        }
        let columns = layers
            .into_iter()
            .map(|stack| Column::from_layers(floor, stack))
            .collect();
        let grid = Self {
            width,
            depth,
            cell_size,
            floor,
            ceiling,
            columns,
        };
        grid.validate()?;
        Ok(grid)
    }

    #[inline]
    pub fn idx(&self, x: usize, z: usize) -> usize {
        z * self.width + x
    }

    #[inline]
    pub fn cell_index(&self, cell: Cell) -> usize {
        self.idx(cell.x, cell.z)
    }

    pub fn cell_count(&self) -> usize {
        self.columns.len()
    }

    pub fn cell_area(&self) -> f32 {
        self.cell_size * self.cell_size
    }

    /// Lateral extent of the grid in world units `(x, z)`.
    pub fn extent(&self) -> (f32, f32) {
        (
            self.width as f32 * self.cell_size,
            self.depth as f32 * self.cell_size,
        )
    }

    pub fn contains(&self, x: i64, z: i64) -> bool {
        x >= 0 && z >= 0 && (x as usize) < self.width && (z as usize) < self.depth
    }

    /// Whether a world point lies inside the grid, laterally and vertically.
    pub fn contains_point(&self, p: Vec3) -> bool {
        let (ex, ez) = self.extent();
        p.x >= 0.0
            && p.z >= 0.0
            && p.x < ex
            && p.z < ez
            && p.y >= self.floor
            && p.y <= self.ceiling
    }

    /// Column containing the world point laterally, if any.
    pub fn cell_at(&self, p: Vec3) -> Option<Cell> {
        if !p.x.is_finite() || !p.z.is_finite() {
            return None;
        }
        let x = (p.x / self.cell_size).floor() as i64;
        let z = (p.z / self.cell_size).floor() as i64;
        self.contains(x, z).then(|| Cell::new(x as usize, z as usize))
    }

    /// Column containing the point, clamped onto the grid.
    pub fn clamped_cell_at(&self, p: Vec3) -> Cell {
        let x = (p.x / self.cell_size).floor();
        let z = (p.z / self.cell_size).floor();
        let x = if x.is_finite() { x.max(0.0) as usize } else { 0 };
        let z = if z.is_finite() { z.max(0.0) as usize } else { 0 };
        Cell::new(x.min(self.width - 1), z.min(self.depth - 1))
    }

    /// Centre of the column's surface in world space.
    pub fn cell_center(&self, cell: Cell) -> Vec3 {
        Vec3::new(
            (cell.x as f32 + 0.5) * self.cell_size,
            self.surface_height(cell),
            (cell.z as f32 + 0.5) * self.cell_size,
        )
    }

    pub fn neighbor(&self, cell: Cell, dx: i32, dz: i32) -> Option<Cell> {
        let x = cell.x as i64 + dx as i64;
        let z = cell.z as i64 + dz as i64;
        self.contains(x, z).then(|| Cell::new(x as usize, z as usize))
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.depth).flat_map(move |z| (0..self.width).map(move |x| Cell::new(x, z)))
    }

    pub fn column(&self, cell: Cell) -> &Column {
        &self.columns[self.cell_index(cell)]
    }

    pub fn column_mut(&mut self, cell: Cell) -> &mut Column {
        let i = self.cell_index(cell);
        &mut self.columns[i]
    }

    pub fn surface_height(&self, cell: Cell) -> f32 {
        self.column(cell).surface()
    }

    /// Surface heights in row-major order.
    pub fn heightfield(&self) -> Vec<f32> {
        self.columns.iter().map(Column::surface).collect()
    }

    /// Terrain layer stacks in row-major order.
    pub fn layer_stacks(&self) -> Vec<Vec<SoilLayer>> {
        self.columns.iter().map(|c| c.terrain.clone()).collect()
    }

    /// Volume of terrain soil (m³). Bucket-soil views are not counted.
    pub fn terrain_volume(&self) -> f64 {
        let area = self.cell_area() as f64;
        self.columns
            .iter()
            .flat_map(|c| c.terrain.iter())
            .map(|layer| layer.thickness() as f64 * area)
            .sum()
    }

    pub(crate) fn clear_bucket_soil(&mut self) {
        for column in &mut self.columns {
            column.bucket_soil.clear();
        }
    }

    /// Check the layer invariants of every column.
    pub fn validate(&self) -> SoilResult<()> {
        for cell in self.cells() {
            let column = self.column(cell);
            column.validate(cell)?;
            if column.surface() > self.ceiling + HEIGHT_TOLERANCE {
                return Err(SoilError::consistency(
                    cell,
                    format!("surface {} above ceiling {}", column.surface(), self.ceiling),
                ));
            }
        }
        Ok(())
    }
}

fn validate_dimensions(
    width: usize,
    depth: usize,
    cell_size: f32,
    floor: f32,
    ceiling: f32,
) -> SoilResult<()> {
    if width == 0 || depth == 0 {
        return Err(SoilError::config(format!(
            "grid must have at least one column, got {width}x{depth}"
        )));
    }
    if !(cell_size.is_finite() && cell_size > 0.0) {
        return Err(SoilError::config(format!(
            "cell size must be positive, got {cell_size}"
        )));
    }
    if !(floor.is_finite() && ceiling.is_finite() && floor < ceiling) {
        return Err(SoilError::config(format!(
            "vertical range [{floor}, {ceiling}] is empty"
        )));
    }
    Ok(())
}
