// src/derived.rs - Joints the network does not output, built from decoded ones
use nalgebra::Vector3;

use crate::joints::{BodyJoint, JointSet};

fn midpoint(a: &Vector3<f32>, b: &Vector3<f32>) -> Vector3<f32> {
    (a + b) / 2.0
}

/// Fill the raw positions of the computed joints. Each step reads only
/// decoded joints or joints resolved earlier in the same pass, so the
/// result is a pure function of the decoded positions.
pub fn solve_derived_joints(joints: &mut JointSet) {
    use BodyJoint::*;

    let abdomen = joints.raw(UpperAbdomen);

    let legs = midpoint(&joints.raw(RightUpperLeg), &joints.raw(LeftUpperLeg));
    joints.get_mut(CenterHip).raw_position = midpoint(&abdomen, &legs);

    let neck = midpoint(&joints.raw(RightShoulder), &joints.raw(LeftShoulder));
    joints.get_mut(CentralNeck).raw_position = neck;

    joints.get_mut(TopHead).raw_position = head_position(
        &neck,
        &joints.raw(LeftEar),
        &joints.raw(RightEar),
        &joints.raw(CentralNose),
    );

    joints.get_mut(MiddleSpine).raw_position = abdomen;
}

/// Nose direction projected onto the neck → ear-midpoint axis, anchored at
/// the neck. With the ears on top of the neck the axis is undefined and the
/// head collapses onto the neck.
pub fn head_position(
    neck: &Vector3<f32>,
    left_ear: &Vector3<f32>,
    right_ear: &Vector3<f32>,
    nose: &Vector3<f32>,
) -> Vector3<f32> {
    let axis = midpoint(left_ear, right_ear) - neck;
    let Some(axis) = axis.try_normalize(f32::EPSILON) else {
        return *neck;
    };
    neck + axis * axis.dot(&(nose - neck))
}
