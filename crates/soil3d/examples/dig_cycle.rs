//! Scripted dig cycle: lower the bucket, drag it through the ground, lift,
//! swing and dump. Prints volumes per step.
//!
//! Usage: cargo run -p soil3d --example dig_cycle [params.json] [checkpoint.json]
//! Set RUST_LOG=debug to see per-step detail.

use soil3d::{
    generate_noise_terrain, BucketShape, NoiseTerrainConfig, Pose, SimParams, SoilError,
    SoilSimulator, StepInput, StepStatus, Vec3,
};

const WIDTH: usize = 40;
const DEPTH: usize = 24;
const CELL_SIZE: f32 = 0.25;

fn main() -> Result<(), SoilError> {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    let params = match args.get(1) {
        Some(path) => SimParams::load_json(path)?,
        None => SimParams::default(),
    };

    let terrain = NoiseTerrainConfig {
        base_height: 0.0,
        amplitude: 0.2,
        feature_size: 3.0,
        ..Default::default()
    };
    let grid = generate_noise_terrain(WIDTH, DEPTH, CELL_SIZE, -2.0, 3.0, &terrain)?;

    let bucket = BucketShape::prism(
        Vec3::new(0.0, 0.5, 0.0),
        Vec3::ZERO,
        Vec3::new(0.7, 0.0, 0.0),
        0.6,
    )?;

    let z = DEPTH as f32 * CELL_SIZE * 0.5;
    let mut path: Vec<StepInput> = Vec::new();
    // lower
    for y in [1.5f32, 0.9, 0.3, -0.3] {
        path.push(StepInput::at(Pose::from_position(Vec3::new(1.0, y, z))));
    }
    // drag, tilting the teeth up toward the end
    for i in 1..=12 {
        let x = 1.0 + i as f32 * 0.2;
        let pitch = if i > 8 { (i - 8) as f32 * 0.15 } else { 0.0 };
        path.push(StepInput::at(Pose::from_yaw_pitch_roll(
            Vec3::new(x, -0.3, z),
            0.0,
            pitch,
            0.0,
        )));
    }
    // lift and swing
    for (x, y) in [(3.4f32, 0.4), (3.4, 1.2), (5.0, 1.2), (6.6, 1.2), (8.0, 1.2)] {
        path.push(StepInput::at(Pose::from_yaw_pitch_roll(
            Vec3::new(x, y, z),
            0.0,
            0.6,
            0.0,
        )));
    }
    path.push(StepInput::dump(Pose::from_yaw_pitch_roll(
        Vec3::new(8.0, 1.2, z),
        0.0,
        0.6,
        0.0,
    )));

    let start = Pose::from_position(Vec3::new(1.0, 2.0, z));
    let mut sim = SoilSimulator::new(grid, bucket, start, params)?;
    let initial = sim.total_volume();
    println!("initial volume: {initial:.4} m3");
    println!("step  skipped  excavated  pushed  released  body_soil  relax_moves  drift");

    for input in path {
        let report = sim.step(input)?;
        let drift = sim.total_volume() - initial;
        println!(
            "{:>4}  {:>7}  {:>9.4}  {:>6.4}  {:>8.4}  {:>9.4}  {:>11}  {:+.2e}",
            report.step,
            report.skipped,
            report.excavated,
            report.pushed,
            report.released,
            sim.body_soil().volume(),
            report.relax.moves,
            drift
        );
        if let StepStatus::Warning(warning) = &report.status {
            println!("      warning: {warning}");
        }
    }

    let heights = sim.heightfield();
    let lowest = heights.iter().copied().fold(f32::MAX, f32::min);
    let highest = heights.iter().copied().fold(f32::MIN, f32::max);
    println!("final surface range: [{lowest:.3}, {highest:.3}]");

    if let Some(path) = args.get(2) {
        sim.checkpoint().save_json(path)?;
        println!("checkpoint written to {path}");
    }
    Ok(())
}
