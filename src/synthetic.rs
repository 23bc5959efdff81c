// src/synthetic.rs - Simulation source: known poses encoded as network output
use nalgebra::Vector3;
use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::decoder::TensorLayout;
use crate::derived::solve_derived_joints;
use crate::joints::{BodyJoint, JointSet, DECODED_JOINT_COUNT, JOINT_COUNT};
use crate::retarget::BoneTransform;

/// Upright figure facing the camera in model space (y up, roughly 320
/// units tall). Computed joints are resolved the same way the pipeline
/// resolves them.
pub fn standing_pose() -> [Vector3<f32>; JOINT_COUNT] {
    use BodyJoint::*;
    let mut decoded = [Vector3::zeros(); DECODED_JOINT_COUNT];
    let mut set = |joint: BodyJoint, x: f32, y: f32, z: f32| {
        decoded[joint.index()] = Vector3::new(x, y, z);
    };

    set(CentralNose, 0.0, 150.0, 10.0);
    set(LeftEar, 12.0, 155.0, -5.0);
    set(RightEar, -12.0, 155.0, -5.0);
    set(LeftEye, 6.0, 158.0, 8.0);
    set(RightEye, -6.0, 158.0, 8.0);

    set(LeftShoulder, 35.0, 110.0, 0.0);
    set(LeftElbow, 40.0, 60.0, 5.0);
    set(LeftHand, 42.0, 15.0, 10.0);
    set(LeftThumb, 38.0, 5.0, 18.0);
    set(LeftFinger, 45.0, -5.0, 12.0);

    set(RightShoulder, -35.0, 110.0, 0.0);
    set(RightElbow, -40.0, 60.0, 5.0);
    set(RightHand, -42.0, 15.0, 10.0);
    set(RightThumb, -38.0, 5.0, 18.0);
    set(RightFinger, -45.0, -5.0, 12.0);

    set(UpperAbdomen, 0.0, 40.0, 0.0);

    set(LeftUpperLeg, 18.0, -10.0, 0.0);
    set(LeftLowerLeg, 20.0, -80.0, 5.0);
    set(LeftFoot, 20.0, -150.0, 0.0);
    set(LeftToe, 20.0, -160.0, 20.0);

    set(RightUpperLeg, -18.0, -10.0, 0.0);
    set(RightLowerLeg, -20.0, -80.0, 5.0);
    set(RightFoot, -20.0, -150.0, 0.0);
    set(RightToe, -20.0, -160.0, 20.0);

    resolve(&decoded)
}

pub fn resolve(decoded: &[Vector3<f32>; DECODED_JOINT_COUNT]) -> [Vector3<f32>; JOINT_COUNT] {
    let mut joints = JointSet::new();
    for (i, position) in decoded.iter().enumerate() {
        joints.get_mut(BodyJoint::ALL[i]).raw_position = *position;
    }
    solve_derived_joints(&mut joints);
    std::array::from_fn(|i| joints.raw(BodyJoint::ALL[i]))
}

/// In-memory rig whose bones sit at `pose * scale` with identity rotation.
pub fn rig_from_pose(pose: &[Vector3<f32>; JOINT_COUNT], scale: f32) -> HashMap<BodyJoint, BoneTransform> {
    BodyJoint::ALL
        .iter()
        .map(|&joint| (joint, BoneTransform::at(pose[joint.index()] * scale)))
        .collect()
}

/// Produces heatmap/offset buffers whose decode is a known pose.
pub struct SyntheticSource {
    grid: usize,
    layout: TensorLayout,
    resize_factor: f32,
    half_image_size: f32,
    depth_adjustment: f32,
    confidence: f32,
    occluded: Vec<BodyJoint>,
    sim_time: f32,
}

impl SyntheticSource {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            grid: config.grid_size,
            layout: config.layout,
            resize_factor: config.resize_factor(),
            half_image_size: config.half_image_size(),
            depth_adjustment: config.depth_adjustment,
            confidence: 0.9,
            occluded: Vec::new(),
            sim_time: 0.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    // Leave this joint's volume empty so it decodes as unavailable.
    pub fn occlude(&mut self, joint: BodyJoint) {
        if !self.occluded.contains(&joint) {
            self.occluded.push(joint);
        }
    }

    pub fn reveal(&mut self, joint: BodyJoint) {
        self.occluded.retain(|j| *j != joint);
    }

    pub fn time(&self) -> f32 {
        self.sim_time
    }

    // Standing pose with a slow side-to-side sway and swinging arms.
    pub fn pose_at(&self, t: f32) -> [Vector3<f32>; JOINT_COUNT] {
        use BodyJoint::*;
        let base = standing_pose();
        let mut decoded: [Vector3<f32>; DECODED_JOINT_COUNT] =
            std::array::from_fn(|i| base[i] + Vector3::new(10.0 * (t * 0.5).sin(), 0.0, 0.0));

        let swing = 12.0 * t.sin();
        for joint in [LeftElbow, LeftHand, LeftThumb, LeftFinger] {
            decoded[joint.index()].z += swing;
        }
        for joint in [RightElbow, RightHand, RightThumb, RightFinger] {
            decoded[joint.index()].z -= swing;
        }
        resolve(&decoded)
    }

    // Encode the next simulated frame and advance time by one 30 Hz tick.
    pub fn next_frame(&mut self) -> (Vec<f32>, Vec<f32>) {
        let pose = self.pose_at(self.sim_time);
        self.sim_time += 0.033;
        self.encode(&pose)
    }

    /// Buffers in the configured layout whose decode recovers `pose` for
    /// every non-occluded decoded joint. Positions outside the volume are
    /// clamped to the border cell.
    pub fn encode(&self, pose: &[Vector3<f32>]) -> (Vec<f32>, Vec<f32>) {
        let volume = self.grid * self.grid * self.grid * DECODED_JOINT_COUNT;
        let mut heatmap = vec![0.0; volume];
        let mut offsets = vec![0.0; volume * 3];

        for (j, position) in pose.iter().take(DECODED_JOINT_COUNT).enumerate() {
            if self.occluded.iter().any(|o| o.index() == j) {
                continue;
            }
            let (x, ox) = self.locate((position.x + self.half_image_size) / self.resize_factor - 0.5);
            let (y, oy) = self.locate((self.half_image_size - position.y) / self.resize_factor - 0.5);
            let (z, oz) = self.locate(
                position.z / self.resize_factor - 0.5 + (self.grid / 2) as f32 - self.depth_adjustment,
            );

            heatmap[self.layout.heatmap_index(self.grid, DECODED_JOINT_COUNT, j, x, y, z)] = self.confidence;
            for (channel, offset) in [ox, oy, oz].into_iter().enumerate() {
                offsets[self
                    .layout
                    .offset_index(self.grid, DECODED_JOINT_COUNT, j, x, y, z, channel)] = offset;
            }
        }

        (heatmap, offsets)
    }

    fn locate(&self, value: f32) -> (usize, f32) {
        let cell = value.floor().clamp(0.0, (self.grid - 1) as f32);
        (cell as usize, value - cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::HeatmapDecoder;
    use approx::assert_relative_eq;

    #[test]
    fn test_encoded_pose_decodes_back() {
        for layout in [TensorLayout::JointMajor, TensorLayout::Interleaved] {
            let config = PipelineConfig {
                layout,
                ..Default::default()
            };
            let source = SyntheticSource::new(&config);
            let pose = standing_pose();
            let (heatmap, offsets) = source.encode(&pose);

            let decoded = HeatmapDecoder::new(&config).decode(&heatmap, &offsets).unwrap();
            for (i, joint) in decoded.iter().enumerate() {
                assert_relative_eq!(joint.confidence, 0.9);
                assert_relative_eq!(joint.position, pose[i], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_encoded_pose_decodes_back_with_depth_adjustment() {
        let config = PipelineConfig {
            depth_adjustment: 1.5,
            ..Default::default()
        };
        let pose = standing_pose();
        let (heatmap, offsets) = SyntheticSource::new(&config).encode(&pose);
        let decoded = HeatmapDecoder::new(&config).decode(&heatmap, &offsets).unwrap();
        for (i, joint) in decoded.iter().enumerate() {
            assert_relative_eq!(joint.position, pose[i], epsilon = 1e-3);
        }

        // Decoding with a different adjustment moves every joint by whole depth bins
        let shifted = PipelineConfig {
            depth_adjustment: 2.5,
            ..Default::default()
        };
        let decoded = HeatmapDecoder::new(&shifted).decode(&heatmap, &offsets).unwrap();
        let bin = shifted.resize_factor();
        for (i, joint) in decoded.iter().enumerate() {
            assert_relative_eq!(joint.position.z, pose[i].z + bin, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_occluded_joint_is_unavailable() {
        let config = PipelineConfig::default();
        let mut source = SyntheticSource::new(&config);
        source.occlude(BodyJoint::LeftHand);
        let (heatmap, offsets) = source.encode(&standing_pose());
        let decoded = HeatmapDecoder::new(&config).decode(&heatmap, &offsets).unwrap();
        assert_eq!(decoded[BodyJoint::LeftHand.index()].confidence, 0.0);
        assert!(decoded[BodyJoint::RightHand.index()].is_available());

        source.reveal(BodyJoint::LeftHand);
        let (heatmap, offsets) = source.encode(&standing_pose());
        let decoded = HeatmapDecoder::new(&config).decode(&heatmap, &offsets).unwrap();
        assert!(decoded[BodyJoint::LeftHand.index()].is_available());
    }

    #[test]
    fn test_standing_pose_derives_computed_joints() {
        let pose = standing_pose();
        // Hip halfway between the abdomen and the upper-leg midpoint
        assert_relative_eq!(pose[BodyJoint::CenterHip.index()], Vector3::new(0.0, 15.0, 0.0));
        assert_relative_eq!(pose[BodyJoint::CentralNeck.index()], Vector3::new(0.0, 110.0, 0.0));
    }

    #[test]
    fn test_frames_advance_time() {
        let mut source = SyntheticSource::new(&PipelineConfig::default());
        let (first, _) = source.next_frame();
        let (second, _) = source.next_frame();
        assert!(source.time() > 0.0);
        assert_eq!(first.len(), second.len());
    }
}
