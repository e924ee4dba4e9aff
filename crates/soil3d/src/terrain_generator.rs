//! Procedural starting terrain.
//!
//! Rolling ground built from fractal Perlin noise on top of a base height,
//! optionally quantized so that heights land on a fixed step.

use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::error::{SoilError, SoilResult};
use crate::grid::Grid;

/// Configuration for terrain generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseTerrainConfig {
    pub seed: u32,
    /// Mean surface height (m).
    pub base_height: f32,
    /// Peak deviation from the base height (m).
    pub amplitude: f32,
    /// Wavelength of the coarsest octave (m).
    pub feature_size: f32,
    pub octaves: usize,
    /// Round heights to multiples of this step (m) when set.
    pub quantum: Option<f32>,
}

impl Default for NoiseTerrainConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            base_height: 0.0,
            amplitude: 0.5,
            feature_size: 8.0,
            octaves: 4,
            quantum: None,
        }
    }
}

/// Generate a noise heightfield grid.
///
/// Heights are clamped into `[floor, ceiling]`.
pub fn generate_noise_terrain(
    width: usize,
    depth: usize,
    cell_size: f32,
    floor: f32,
    ceiling: f32,
    config: &NoiseTerrainConfig,
) -> SoilResult<Grid> {
    if !(config.feature_size.is_finite() && config.feature_size > 0.0) {
        return Err(SoilError::config(format!(
            "feature_size must be positive, got {}",
            config.feature_size
        )));
    }
    if config.octaves == 0 {
        return Err(SoilError::config("octaves must be at least 1"));
    }

    let noise: Fbm<Perlin> = Fbm::new(config.seed).set_octaves(config.octaves);
    let frequency = 1.0 / config.feature_size as f64;

    let mut heights = Vec::with_capacity(width * depth);
    for z in 0..depth {
        for x in 0..width {
            let world_x = (x as f32 + 0.5) * cell_size;
            let world_z = (z as f32 + 0.5) * cell_size;

            let n = noise.get([world_x as f64 * frequency, world_z as f64 * frequency]) as f32;
            let mut h = config.base_height + n.clamp(-1.0, 1.0) * config.amplitude;
            if let Some(q) = config.quantum.filter(|q| *q > 0.0) {
                h = (h / q).round() * q;
            }
            heights.push(h.clamp(floor, ceiling));
        }
    }

    Grid::from_heightfield(width, depth, cell_size, floor, ceiling, &heights)
}
