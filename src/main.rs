// src/main.rs
use anyhow::{Context, Result};
use tracing::{error, info};

use pose_rig::synthetic::{rig_from_pose, standing_pose, SyntheticSource};
use pose_rig::{BodyJoint, BoneTransform, PipelineConfig, PosePipeline, RestPose};

// Simulated cycles when no count is given.
const DEFAULT_CYCLES: usize = 300;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    if let Err(e) = run() {
        error!("Simulation failed: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => load_config(&path)?,
        None => PipelineConfig::default(),
    };
    let cycles = match args.next() {
        Some(n) => n.parse().with_context(|| format!("Invalid cycle count '{}'", n))?,
        None => DEFAULT_CYCLES,
    };

    let mut pipeline: PosePipeline<BoneTransform> =
        PosePipeline::new(config.clone()).context("Failed to create pose pipeline")?;

    // Rig at rest in the standing pose
    let rig = rig_from_pose(&standing_pose(), config.position_scale);
    let rest = RestPose::capture(&rig);
    pipeline
        .init_skeleton(rig, &rest)
        .context("Failed to bind skeleton")?;

    let mut source = SyntheticSource::new(&config);
    for cycle in 0..cycles {
        let (heatmap, offsets) = source.next_frame();
        pipeline.decode_cycle(&heatmap, &offsets);
        pipeline.update_pose()?;

        if cycle % 30 == 29 {
            let metrics = pipeline.metrics();
            if let Some(hip) = pipeline.bone(BodyJoint::CenterHip) {
                let (roll, pitch, yaw) = hip.rotation.euler_angles();
                info!(
                    "t={:.2}s confidence {:.2} (avg {:.2}), {:.3} ms/cycle, hip at ({:.3}, {:.3}, {:.3}) rpy ({:.1}, {:.1}, {:.1})",
                    source.time(),
                    metrics.tracking_confidence,
                    metrics.average_confidence,
                    metrics.avg_processing_time_ms,
                    hip.position.x,
                    hip.position.y,
                    hip.position.z,
                    roll.to_degrees(),
                    pitch.to_degrees(),
                    yaw.to_degrees()
                );
            }
            let hidden = pipeline.low_confidence_joints();
            if !hidden.is_empty() {
                info!("Low confidence joints: {:?}", hidden);
            }
        }
    }

    let snapshot = serde_json::to_string_pretty(&pipeline.snapshot()).context("Failed to serialize snapshot")?;
    println!("{}", snapshot);
    Ok(())
}

fn load_config(path: &str) -> Result<PipelineConfig> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
    let config = PipelineConfig::from_json_str(&json).with_context(|| format!("Failed to parse config {}", path))?;
    info!("Loaded config from {}", path);
    Ok(config)
}
