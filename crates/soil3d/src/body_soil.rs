//! Soil carried by the bucket.
//!
//! Excavated soil becomes a parcel keyed by the wall it rests on and the
//! column it sits above. Parcels remember their anchor in the bucket frame,
//! so when the bucket moves they can be re-associated with the column now
//! under that anchor. Soil leaves the bucket only through a release, which
//! deposits it back onto the terrain.

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bucket::{Pose, WallId};
use crate::constants::{HEIGHT_TOLERANCE, MAX_BUCKET_SOIL_LAYERS};
use crate::grid::{BucketSoilLayer, Cell, Column, Grid, LayerOrigin};
use crate::intersect::{Envelope, Occupancy};
use crate::scan::{DirectionOrder, LATERAL_8};

/// Parcels below this volume (m³) are dropped as numerical dust.
const MIN_PARCEL_VOLUME: f32 = 1e-9;

/// Identity of a parcel: one per (wall, column).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParcelKey {
    pub wall: WallId,
    pub cell: Cell,
}

/// A quantity of soil resting on one bucket wall above one column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BodySoilParcel {
    pub wall: WallId,
    pub cell: Cell,
    /// Column the soil was excavated from.
    pub provenance: Cell,
    /// Volume in m³.
    pub volume: f32,
    /// Resting point in the bucket frame.
    #[serde(with = "crate::serde_utils::vec3")]
    pub local_anchor: Vec3,
}

impl BodySoilParcel {
    pub fn key(&self) -> ParcelKey {
        ParcelKey {
            wall: self.wall,
            cell: self.cell,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    /// The column under the parcel is no longer intersected by the bucket.
    Unsupported,
    /// An explicit dump request.
    Dumped,
}

/// Bookkeeping emitted while parcels are created, moved and released.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParcelEvent {
    Attached {
        wall: WallId,
        cell: Cell,
        provenance: Cell,
        volume: f32,
    },
    Moved {
        wall: WallId,
        from: Cell,
        to: Cell,
        volume: f32,
    },
    Merged {
        wall: WallId,
        cell: Cell,
        volume: f32,
    },
    Released {
        wall: WallId,
        cell: Cell,
        provenance: Cell,
        volume: f32,
        reason: ReleaseReason,
    },
}

/// How the soil removed from one column was divided (m³).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ExcavationSplit {
    pub removed: f32,
    pub to_parcel: f32,
    pub to_neighbors: f32,
}

/// Cut the column down to the envelope bottom and split the removed soil.
///
/// Only the thickness inside the bucket's interval, `min(surface, top) -
/// bottom`, can load the bucket. Overburden above the envelope top is always
/// displaced to the neighbours. Of the intersected share, a column covered at
/// or above `full_coverage_threshold` sends everything to the bucket and a
/// partially covered column sends the covered fraction.
pub fn excavate(
    column: &mut Column,
    envelope: &Envelope,
    cell_area: f32,
    full_coverage_threshold: f32,
) -> ExcavationSplit {
    let surface = column.surface();
    let removed = column.remove_above(envelope.bottom) * cell_area;
    if removed <= 0.0 {
        return ExcavationSplit::default();
    }
    let bottom = envelope.bottom.max(column.floor());
    let inside = ((surface.min(envelope.top) - bottom).max(0.0) * cell_area).min(removed);
    let to_parcel = if envelope.coverage >= full_coverage_threshold {
        inside
    } else {
        inside * envelope.coverage.clamp(0.0, 1.0)
    };
    ExcavationSplit {
        removed,
        to_parcel,
        to_neighbors: removed - to_parcel,
    }
}

/// Spread `volume` (m³) displaced from `origin` over the surrounding columns.
///
/// Columns are visited ring by ring along the eight lateral directions.
/// A free column takes everything that is left up to the ceiling; a column
/// under the bucket only takes what fits between its surface and the bucket
/// bottom. Returns the volume that found no room.
pub fn push_to_neighbors(
    grid: &mut Grid,
    occupancy: &Occupancy,
    origin: Cell,
    volume: f32,
    order: &mut DirectionOrder,
) -> f32 {
    spread(
        grid,
        occupancy,
        origin,
        volume,
        LayerOrigin::Deposited { from: origin },
        order,
    )
}

fn spread(
    grid: &mut Grid,
    occupancy: &Occupancy,
    center: Cell,
    volume: f32,
    layer: LayerOrigin,
    order: &mut DirectionOrder,
) -> f32 {
    let mut dirs = LATERAL_8;
    order.shuffle(&mut dirs);

    let area = grid.cell_area();
    let mut remaining = volume;
    let max_ring = grid.width.max(grid.depth) as i32;

    for ring in 1..=max_ring {
        let mut in_grid = false;
        for &(dx, dz) in &dirs {
            if remaining <= MIN_PARCEL_VOLUME {
                return 0.0;
            }
            let Some(cell) = grid.neighbor(center, dx * ring, dz * ring) else {
                continue;
            };
            in_grid = true;
            let room = headroom(grid, occupancy, cell);
            if room <= HEIGHT_TOLERANCE {
                continue;
            }
            let thickness = (remaining / area).min(room);
            grid.column_mut(cell).deposit(thickness, layer);
            remaining = (remaining - thickness * area).max(0.0);
        }
        if !in_grid {
            break;
        }
    }
    remaining
}

/// Free height above the column's surface: up to the bucket bottom when the
/// column is intersected, otherwise up to the ceiling.
fn headroom(grid: &Grid, occupancy: &Occupancy, cell: Cell) -> f32 {
    let limit = occupancy
        .get(cell)
        .map_or(grid.ceiling, |env| env.bottom.min(grid.ceiling));
    limit - grid.surface_height(cell)
}

/// All parcels currently on the bucket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BodySoil {
    parcels: BTreeMap<ParcelKey, BodySoilParcel>,
}

impl BodySoil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a parcel list; parcels sharing a key are merged.
    pub fn from_parcels(parcels: impl IntoIterator<Item = BodySoilParcel>) -> Self {
        let mut soil = Self::new();
        let mut events = Vec::new();
        for parcel in parcels {
            soil.insert(parcel, &mut events);
        }
        soil
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BodySoilParcel> + '_ {
        self.parcels.values()
    }

    pub fn get(&self, wall: WallId, cell: Cell) -> Option<&BodySoilParcel> {
        self.parcels.get(&ParcelKey { wall, cell })
    }

    /// Total carried volume (m³).
    pub fn volume(&self) -> f64 {
        self.parcels.values().map(|p| p.volume as f64).sum()
    }

    /// Put excavated soil on `wall` above `cell`.
    pub fn attach(
        &mut self,
        wall: WallId,
        cell: Cell,
        provenance: Cell,
        volume: f32,
        local_anchor: Vec3,
        events: &mut Vec<ParcelEvent>,
    ) {
        if volume <= MIN_PARCEL_VOLUME {
            return;
        }
        events.push(ParcelEvent::Attached {
            wall,
            cell,
            provenance,
            volume,
        });
        self.insert(
            BodySoilParcel {
                wall,
                cell,
                provenance,
                volume,
                local_anchor,
            },
            events,
        );
    }

    /// Insert, merging into an existing parcel with the same key. The merged
    /// parcel keeps the provenance and anchor of the larger contributor.
    fn insert(&mut self, parcel: BodySoilParcel, events: &mut Vec<ParcelEvent>) {
        let key = parcel.key();
        match self.parcels.get_mut(&key) {
            Some(existing) => {
                if parcel.volume > existing.volume {
                    existing.provenance = parcel.provenance;
                    existing.local_anchor = parcel.local_anchor;
                }
                existing.volume += parcel.volume;
                events.push(ParcelEvent::Merged {
                    wall: key.wall,
                    cell: key.cell,
                    volume: existing.volume,
                });
            }
            None => {
                self.parcels.insert(key, parcel);
            }
        }
    }

    /// Follow the bucket from `from` to `to`.
    ///
    /// Each parcel's anchor is carried with the bucket. The parcel then goes
    /// to the column under the anchor, or to the first intersected column
    /// around it, searching the neighbours that lie along the direction of
    /// motion first. Parcels that find no intersected column stay on the
    /// column under the anchor and are left for [`BodySoil::release_unsupported`].
    pub fn update_positions(
        &mut self,
        grid: &Grid,
        from: &Pose,
        to: &Pose,
        occupancy: &Occupancy,
        events: &mut Vec<ParcelEvent>,
    ) {
        let parcels = std::mem::take(&mut self.parcels);
        for mut parcel in parcels.into_values() {
            let old_world = from.transform_point(parcel.local_anchor);
            let new_world = to.transform_point(parcel.local_anchor);
            let target = grid.clamped_cell_at(new_world);
            let motion = Vec2::new(new_world.x - old_world.x, new_world.z - old_world.z);

            let chosen = support_candidates(grid, target, motion)
                .into_iter()
                .filter_map(|cell| occupancy.get(cell).map(|env| (cell, (env.top - new_world.y).abs())))
                .fold(None::<(Cell, f32)>, |best, (cell, gap)| match best {
                    Some((_, best_gap)) if best_gap <= grid.cell_size || best_gap <= gap => best,
                    _ => Some((cell, gap)),
                })
                .map_or(target, |(cell, _)| cell);

            if chosen != parcel.cell {
                events.push(ParcelEvent::Moved {
                    wall: parcel.wall,
                    from: parcel.cell,
                    to: chosen,
                    volume: parcel.volume,
                });
                parcel.cell = chosen;
            }
            self.insert(parcel, events);
        }
    }

    /// Drop every parcel whose column is not intersected onto the terrain.
    pub fn release_unsupported(
        &mut self,
        grid: &mut Grid,
        occupancy: &Occupancy,
        order: &mut DirectionOrder,
        events: &mut Vec<ParcelEvent>,
    ) -> f64 {
        let unsupported: Vec<ParcelKey> = self
            .parcels
            .keys()
            .filter(|key| !occupancy.is_occupied(key.cell))
            .copied()
            .collect();
        let mut released = 0.0;
        for key in unsupported {
            if let Some(parcel) = self.parcels.remove(&key) {
                released += self.release(
                    grid,
                    occupancy,
                    order,
                    parcel,
                    ReleaseReason::Unsupported,
                    events,
                );
            }
        }
        released
    }

    /// Release every parcel onto the column it sits above.
    pub fn dump_all(
        &mut self,
        grid: &mut Grid,
        occupancy: &Occupancy,
        order: &mut DirectionOrder,
        events: &mut Vec<ParcelEvent>,
    ) -> f64 {
        let parcels = std::mem::take(&mut self.parcels);
        parcels
            .into_values()
            .map(|parcel| {
                self.release(grid, occupancy, order, parcel, ReleaseReason::Dumped, events)
            })
            .sum()
    }

    /// Put a parcel back on the terrain at its column, below the ceiling and
    /// below the bucket if the column is intersected. What does not fit there
    /// spills onto the surrounding columns. Soil that finds no room anywhere
    /// stays on the bucket. Returns the released volume.
    fn release(
        &mut self,
        grid: &mut Grid,
        occupancy: &Occupancy,
        order: &mut DirectionOrder,
        mut parcel: BodySoilParcel,
        reason: ReleaseReason,
        events: &mut Vec<ParcelEvent>,
    ) -> f64 {
        let area = grid.cell_area();
        let layer = LayerOrigin::Deposited {
            from: parcel.provenance,
        };
        let room = headroom(grid, occupancy, parcel.cell).max(0.0) * area;
        let placed = parcel.volume.min(room);
        grid.column_mut(parcel.cell).deposit(placed / area, layer);

        let spill = parcel.volume - placed;
        let leftover = if spill > 0.0 {
            spread(grid, occupancy, parcel.cell, spill, layer, order)
        } else {
            0.0
        };
        let released = parcel.volume - leftover;
        debug!(
            "released {:.4} m3 from {:?} at ({}, {}) ({:?}), {:.4} m3 spilled around it",
            released, parcel.wall, parcel.cell.x, parcel.cell.z, reason, spill
        );
        if released > 0.0 {
            events.push(ParcelEvent::Released {
                wall: parcel.wall,
                cell: parcel.cell,
                provenance: parcel.provenance,
                volume: released,
                reason,
            });
        }
        if leftover > MIN_PARCEL_VOLUME {
            warn!(
                "no room on the terrain for {leftover:.4} m3 from ({}, {}), keeping it on the bucket",
                parcel.cell.x, parcel.cell.z
            );
            parcel.volume = leftover;
            self.parcels.insert(parcel.key(), parcel);
        }
        released as f64
    }

    /// Mirror the parcels into the columns' bucket-soil layers.
    ///
    /// Parcels stack on the envelope top in wall order. A column holds at
    /// most two layers; further parcels thicken the upper one.
    pub fn rebuild_column_views(&self, grid: &mut Grid, occupancy: &Occupancy) {
        grid.clear_bucket_soil();
        let area = grid.cell_area();

        let mut by_cell: BTreeMap<Cell, Vec<&BodySoilParcel>> = BTreeMap::new();
        for parcel in self.parcels.values() {
            by_cell.entry(parcel.cell).or_default().push(parcel);
        }

        for (cell, parcels) in by_cell {
            let mut bottom = occupancy
                .get(cell)
                .map_or_else(|| grid.surface_height(cell), |env| env.top);
            let mut layers: Vec<BucketSoilLayer> = Vec::with_capacity(MAX_BUCKET_SOIL_LAYERS);
            for parcel in parcels {
                let thickness = parcel.volume / area;
                let full = layers.len() == MAX_BUCKET_SOIL_LAYERS;
                match layers.last_mut() {
                    Some(last) if full => last.top += thickness,
                    _ => layers.push(BucketSoilLayer {
                        wall: parcel.wall,
                        bottom,
                        top: bottom + thickness,
                        provenance: parcel.provenance,
                    }),
                }
                bottom += thickness;
            }
            grid.column_mut(cell).set_bucket_soil(layers);
        }
    }
}

/// Target column first, then its neighbours ordered by how well they line up
/// with the lateral motion.
fn support_candidates(grid: &Grid, target: Cell, motion: Vec2) -> Vec<Cell> {
    let dir = motion.normalize_or_zero();
    let mut offsets = LATERAL_8;
    offsets.sort_by(|a, b| {
        let da = dir.dot(Vec2::new(a.0 as f32, a.1 as f32).normalize());
        let db = dir.dot(Vec2::new(b.0 as f32, b.1 as f32).normalize());
        db.total_cmp(&da)
    });
    std::iter::once(target)
        .chain(
            offsets
                .iter()
                .filter_map(|&(dx, dz)| grid.neighbor(target, dx, dz)),
        )
        .collect()
}
