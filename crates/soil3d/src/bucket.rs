//! Bucket geometry and pose.
//!
//! A bucket is a set of planar walls given in the bucket's local frame. The
//! usual shape is the triangular prism built by [`BucketShape::prism`] from
//! three anchor points (joint, base, teeth) and a width: a rectangular base
//! and back, triangular sides, and an open front.
//!
//! [`BucketShape::world_walls`] places the walls for a [`Pose`] without
//! touching any soil state.

use glam::{EulerRot, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::constants::VERTEX_NUDGE;
use crate::error::GeometryError;

/// Identifies a bucket wall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WallId {
    Base,
    Back,
    Left,
    Right,
    Front,
}

/// A planar polygon in the bucket frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub id: WallId,
    #[serde(with = "crate::serde_utils::vec3_list")]
    pub vertices: Vec<Vec3>,
}

impl Wall {
    pub fn new(id: WallId, vertices: Vec<Vec3>) -> Self {
        Self { id, vertices }
    }
}

/// A wall placed in world space.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldWall {
    pub id: WallId,
    pub vertices: Vec<Vec3>,
}

impl WorldWall {
    pub fn centroid(&self) -> Vec3 {
        centroid(&self.vertices)
    }

    /// Newell normal, unnormalized. Its length is twice the polygon area.
    pub fn area_normal(&self) -> Vec3 {
        newell_normal(&self.vertices)
    }

    /// Lateral (XZ) outline of the wall.
    pub fn footprint(&self) -> Vec<Vec2> {
        self.vertices.iter().map(|v| Vec2::new(v.x, v.z)).collect()
    }

    /// Closed edge list `(a, b)`.
    pub fn edges(&self) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }
}

/// Bucket position and orientation in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(with = "crate::serde_utils::vec3")]
    pub position: Vec3,
    #[serde(with = "crate::serde_utils::quat")]
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    /// Pose from yaw (about +Y), pitch (about +Z) and roll (about +X),
    /// applied in that order.
    pub fn from_yaw_pitch_roll(position: Vec3, yaw: f32, pitch: f32, roll: f32) -> Self {
        Self::new(position, Quat::from_euler(EulerRot::YZX, yaw, pitch, roll))
    }

    /// Check the pose and return it with a unit quaternion.
    pub fn validated(&self) -> Result<Pose, GeometryError> {
        if !self.position.is_finite() || !self.orientation.is_finite() {
            return Err(GeometryError::NonFinite { what: "bucket pose" });
        }
        let len = self.orientation.length();
        if len < 1e-6 {
            return Err(GeometryError::ZeroQuaternion);
        }
        Ok(Pose::new(self.position, self.orientation / len))
    }

    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.orientation * local
    }

    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.orientation.inverse() * (world - self.position)
    }
}

/// Validated bucket geometry in the bucket frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Wall>", into = "Vec<Wall>")]
pub struct BucketShape {
    walls: Vec<Wall>,
}

impl TryFrom<Vec<Wall>> for BucketShape {
    type Error = GeometryError;

    fn try_from(walls: Vec<Wall>) -> Result<Self, Self::Error> {
        Self::new(walls)
    }
}

impl From<BucketShape> for Vec<Wall> {
    fn from(shape: BucketShape) -> Self {
        shape.walls
    }
}

impl BucketShape {
    /// Build a shape from explicit walls.
    ///
    /// Every wall needs at least three finite vertices lying in one plane and
    /// a simple (non self-intersecting) outline. Wall ids must be unique.
    pub fn new(walls: Vec<Wall>) -> Result<Self, GeometryError> {
        if walls.is_empty() {
            return Err(GeometryError::Empty);
        }
        for (i, wall) in walls.iter().enumerate() {
            if walls[..i].iter().any(|w| w.id == wall.id) {
                return Err(GeometryError::DuplicateWall(wall.id));
            }
            validate_wall(wall)?;
        }
        Ok(Self { walls })
    }

    /// Triangular-prism bucket.
    ///
    /// `joint`, `base` and `teeth` span the side profile; the walls extend
    /// `width / 2` to either side of that plane. The front (teeth to joint)
    /// stays open.
    pub fn prism(joint: Vec3, base: Vec3, teeth: Vec3, width: f32) -> Result<Self, GeometryError> {
        if !(joint.is_finite() && base.is_finite() && teeth.is_finite() && width.is_finite()) {
            return Err(GeometryError::NonFinite { what: "bucket anchors" });
        }
        if width <= 0.0 {
            return Err(GeometryError::InvalidWidth(width));
        }
        let side = (base - joint).cross(teeth - joint);
        if side.length() < 1e-6 {
            return Err(GeometryError::CollinearAnchors);
        }
        let half = side.normalize() * (0.5 * width);

        let (j_r, j_l) = (joint + half, joint - half);
        let (b_r, b_l) = (base + half, base - half);
        let (t_r, t_l) = (teeth + half, teeth - half);

        Self::new(vec![
            Wall::new(WallId::Base, vec![b_r, b_l, t_l, t_r]),
            Wall::new(WallId::Back, vec![b_r, b_l, j_l, j_r]),
            Wall::new(WallId::Right, vec![j_r, b_r, t_r]),
            Wall::new(WallId::Left, vec![j_l, b_l, t_l]),
        ])
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }

    pub fn wall(&self, id: WallId) -> Option<&Wall> {
        self.walls.iter().find(|w| w.id == id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.walls.iter().flat_map(|w| w.vertices.iter().copied())
    }

    /// Struck volume (m³): the space enclosed by the walls and the open rim.
    ///
    /// Summed as pyramids from a point on the rim to every wall, which is
    /// exact for convex buckets. A single plate holds nothing.
    pub fn capacity(&self) -> f32 {
        let edges: Vec<(Vec3, Vec3)> = self
            .walls
            .iter()
            .flat_map(|w| {
                let n = w.vertices.len();
                (0..n).map(move |i| (w.vertices[i], w.vertices[(i + 1) % n]))
            })
            .collect();
        let same = |a: Vec3, b: Vec3| a.distance(b) <= 1e-5;
        let is_rim = |&(a, b): &(Vec3, Vec3)| {
            edges
                .iter()
                .filter(|&&(p, q)| (same(a, p) && same(b, q)) || (same(a, q) && same(b, p)))
                .count()
                == 1
        };
        let apex = match edges.iter().find(|e| is_rim(e)) {
            Some(&(a, _)) => a,
            None => centroid(&self.vertices().collect::<Vec<_>>()),
        };
        self.walls
            .iter()
            .map(|w| newell_normal(&w.vertices).dot(centroid(&w.vertices) - apex).abs() / 6.0)
            .sum()
    }

    /// Place the walls at `pose`.
    ///
    /// Vertices are pulled a hair toward their wall centroid so that points on
    /// exact cell boundaries land deterministically.
    pub fn world_walls(&self, pose: &Pose) -> Result<Vec<WorldWall>, GeometryError> {
        let pose = pose.validated()?;
        let mut placed = Vec::with_capacity(self.walls.len());
        for wall in &self.walls {
            let world: Vec<Vec3> = wall
                .vertices
                .iter()
                .map(|&v| pose.transform_point(v))
                .collect();
            let c = centroid(&world);
            let vertices: Vec<Vec3> = world.iter().map(|&v| v + (c - v) * VERTEX_NUDGE).collect();
            if vertices.iter().any(|v| !v.is_finite()) {
                return Err(GeometryError::NonFinite { what: "world wall vertex" });
            }
            placed.push(WorldWall {
                id: wall.id,
                vertices,
            });
        }
        Ok(placed)
    }
}

/// Largest distance any bucket vertex travels between two poses.
pub fn max_vertex_displacement(shape: &BucketShape, from: &Pose, to: &Pose) -> f32 {
    shape
        .vertices()
        .map(|v| from.transform_point(v).distance(to.transform_point(v)))
        .fold(0.0, f32::max)
}

fn centroid(vertices: &[Vec3]) -> Vec3 {
    if vertices.is_empty() {
        return Vec3::ZERO;
    }
    vertices.iter().copied().sum::<Vec3>() / vertices.len() as f32
}

fn newell_normal(vertices: &[Vec3]) -> Vec3 {
    let n = vertices.len();
    let mut normal = Vec3::ZERO;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    normal
}

fn validate_wall(wall: &Wall) -> Result<(), GeometryError> {
    let vs = &wall.vertices;
    if vs.len() < 3 {
        return Err(GeometryError::TooFewVertices {
            wall: wall.id,
            count: vs.len(),
        });
    }
    if vs.iter().any(|v| !v.is_finite()) {
        return Err(GeometryError::NonFinite { what: "wall vertex" });
    }

    // Widest triangle fan from the first vertex gives the plane normal.
    let normal = vs[1..]
        .iter()
        .flat_map(|a| vs[1..].iter().map(move |b| (*a - vs[0]).cross(*b - vs[0])))
        .fold(Vec3::ZERO, |best, c| if c.length_squared() > best.length_squared() { c } else { best });
    let extent = vs
        .iter()
        .flat_map(|a| vs.iter().map(move |b| a.distance(*b)))
        .fold(0.0, f32::max);
    if normal.length() <= 1e-6 * extent.max(1.0) * extent.max(1.0) {
        return Err(GeometryError::DegenerateWall(wall.id));
    }
    let n = normal.normalize();
    let c = centroid(vs);
    let plane_tol = 1e-3 * extent.max(1.0);
    if vs.iter().any(|v| (*v - c).dot(n).abs() > plane_tol) {
        return Err(GeometryError::NonPlanar(wall.id));
    }

    // Project onto the wall plane and look for crossing non-adjacent edges.
    let u = n.any_orthonormal_vector();
    let w = n.cross(u);
    let flat: Vec<Vec2> = vs.iter().map(|v| Vec2::new((*v - c).dot(u), (*v - c).dot(w))).collect();
    let count = flat.len();
    for i in 0..count {
        for j in (i + 1)..count {
            let adjacent = j == i + 1 || (i == 0 && j == count - 1);
            if adjacent {
                continue;
            }
            let (a, b) = (flat[i], flat[(i + 1) % count]);
            let (p, q) = (flat[j], flat[(j + 1) % count]);
            if segments_cross(a, b, p, q) {
                return Err(GeometryError::SelfIntersecting(wall.id));
            }
        }
    }
    Ok(())
}

fn segments_cross(a: Vec2, b: Vec2, p: Vec2, q: Vec2) -> bool {
    let d1 = (b - a).perp_dot(p - a);
    let d2 = (b - a).perp_dot(q - a);
    let d3 = (q - p).perp_dot(a - p);
    let d4 = (q - p).perp_dot(b - p);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn standard_bucket() -> BucketShape {
        BucketShape::prism(
            Vec3::ZERO,
            Vec3::new(0.0, -0.5, 0.0),
            Vec3::new(0.7, -0.5, 0.0),
            0.5,
        )
        .unwrap()
    }

    #[test]
    fn prism_has_four_walls() {
        let shape = standard_bucket();
        assert_eq!(shape.walls().len(), 4);
        assert!(shape.wall(WallId::Front).is_none());
        let base = shape.wall(WallId::Base).unwrap();
        assert!(base.vertices.iter().all(|v| (v.y + 0.5).abs() < 1e-6));
        let right = shape.wall(WallId::Right).unwrap();
        assert!(right.vertices.iter().all(|v| (v.z.abs() - 0.25).abs() < 1e-6));
    }

    #[test]
    fn prism_capacity_is_profile_times_width() {
        // profile triangle 0.5 x 0.7 / 2, width 0.5
        let shape = standard_bucket();
        assert!((shape.capacity() - 0.0875).abs() < 1e-6);

        let plate = BucketShape::new(vec![Wall::new(
            WallId::Base,
            vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 0.0, 1.0), Vec3::Z],
        )])
        .unwrap();
        assert!(plate.capacity().abs() < 1e-6);
    }

    #[test]
    fn prism_rejects_collinear_anchors() {
        let err = BucketShape::prism(Vec3::ZERO, Vec3::X, Vec3::X * 2.0, 1.0).unwrap_err();
        assert_eq!(err, GeometryError::CollinearAnchors);
        let err = BucketShape::prism(Vec3::ZERO, -Vec3::Y, Vec3::X, 0.0).unwrap_err();
        assert_eq!(err, GeometryError::InvalidWidth(0.0));
    }

    #[test]
    fn rejects_bad_walls() {
        let too_few = Wall::new(WallId::Base, vec![Vec3::ZERO, Vec3::X]);
        assert!(matches!(
            BucketShape::new(vec![too_few]),
            Err(GeometryError::TooFewVertices { count: 2, .. })
        ));

        let bowtie = Wall::new(
            WallId::Base,
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
        );
        assert_eq!(
            BucketShape::new(vec![bowtie]),
            Err(GeometryError::SelfIntersecting(WallId::Base))
        );

        let warped = Wall::new(
            WallId::Back,
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.5, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
        );
        assert_eq!(
            BucketShape::new(vec![warped]),
            Err(GeometryError::NonPlanar(WallId::Back))
        );

        let tri = Wall::new(WallId::Left, vec![Vec3::ZERO, Vec3::X, Vec3::Z]);
        assert_eq!(
            BucketShape::new(vec![tri.clone(), tri]),
            Err(GeometryError::DuplicateWall(WallId::Left))
        );
        assert_eq!(BucketShape::new(vec![]), Err(GeometryError::Empty));
    }

    #[test]
    fn pose_round_trips_points() {
        let pose = Pose::from_yaw_pitch_roll(Vec3::new(1.0, 2.0, 3.0), 0.3, -0.2, 0.1);
        let local = Vec3::new(0.4, -0.5, 0.2);
        let back = pose.inverse_transform_point(pose.transform_point(local));
        assert!(back.distance(local) < 1e-5);
    }

    #[test]
    fn zero_quaternion_is_rejected() {
        let pose = Pose::new(Vec3::ZERO, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(pose.validated(), Err(GeometryError::ZeroQuaternion));
        let shape = standard_bucket();
        assert!(shape.world_walls(&pose).is_err());
    }

    #[test]
    fn world_walls_follow_pose() {
        let shape = standard_bucket();
        let pose = Pose::from_yaw_pitch_roll(Vec3::new(5.0, 1.0, 5.0), FRAC_PI_2, 0.0, 0.0);
        let walls = shape.world_walls(&pose).unwrap();
        let base = walls.iter().find(|w| w.id == WallId::Base).unwrap();
        // yaw by 90 degrees turns the teeth direction (+X) into -Z
        let min_z = base.vertices.iter().map(|v| v.z).fold(f32::MAX, f32::min);
        assert!((min_z - 4.3).abs() < 1e-3);
        assert!(base.vertices.iter().all(|v| (v.y - 0.5).abs() < 1e-3));
    }

    #[test]
    fn displacement_is_max_over_vertices() {
        let shape = standard_bucket();
        let a = Pose::from_position(Vec3::ZERO);
        let b = Pose::from_position(Vec3::new(0.3, 0.0, 0.4));
        assert!((max_vertex_displacement(&shape, &a, &b) - 0.5).abs() < 1e-6);
    }
}
