//! Serde proxies for the glam types stored in checkpoints and configs.
//!
//! Use with `#[serde(with = "crate::serde_utils::vec3")]` and friends.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Serde proxy for Vec3
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Vec3Def {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<Vec3> for Vec3Def {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<Vec3Def> for Vec3 {
    fn from(def: Vec3Def) -> Self {
        Vec3::new(def.x, def.y, def.z)
    }
}

/// Serde proxy for Quat, stored as `{x, y, z, w}`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QuatDef {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl From<Quat> for QuatDef {
    fn from(q: Quat) -> Self {
        let [x, y, z, w] = q.to_array();
        Self { x, y, z, w }
    }
}

impl From<QuatDef> for Quat {
    fn from(def: QuatDef) -> Self {
        Quat::from_xyzw(def.x, def.y, def.z, def.w)
    }
}

pub mod vec3 {
    use super::Vec3Def;
    use glam::Vec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Vec3, s: S) -> Result<S::Ok, S::Error> {
        Vec3Def::from(*v).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec3, D::Error> {
        Vec3Def::deserialize(d).map(Vec3::from)
    }
}

pub mod vec3_list {
    use super::Vec3Def;
    use glam::Vec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(list: &[Vec3], s: S) -> Result<S::Ok, S::Error> {
        let defs: Vec<Vec3Def> = list.iter().copied().map(Vec3Def::from).collect();
        defs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec3>, D::Error> {
        Vec::<Vec3Def>::deserialize(d).map(|defs| defs.into_iter().map(Vec3::from).collect())
    }
}

pub mod quat {
    use super::QuatDef;
    use glam::Quat;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(q: &Quat, s: S) -> Result<S::Ok, S::Error> {
        QuatDef::from(*q).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Quat, D::Error> {
        QuatDef::deserialize(d).map(Quat::from)
    }
}
