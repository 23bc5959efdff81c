// src/joints.rs - Joint enumeration, skeleton topology and the per-session joint arena
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::filter::{HistoryBuffer, KalmanState};

pub const DECODED_JOINT_COUNT: usize = 24;

pub const JOINT_COUNT: usize = 28;

/// Tracked landmarks, in network channel order. The last four are computed
/// from decoded joints and never read from the tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum BodyJoint {
    RightShoulder = 0,
    RightElbow,
    RightHand,
    RightThumb,
    RightFinger,

    LeftShoulder,
    LeftElbow,
    LeftHand,
    LeftThumb,
    LeftFinger,

    LeftEar,
    LeftEye,
    RightEar,
    RightEye,
    CentralNose,

    RightUpperLeg,
    RightLowerLeg,
    RightFoot,
    RightToe,

    LeftUpperLeg,
    LeftLowerLeg,
    LeftFoot,
    LeftToe,

    UpperAbdomen,

    // Computed
    CenterHip,
    TopHead,
    CentralNeck,
    MiddleSpine,
}

impl BodyJoint {
    pub const ALL: [BodyJoint; JOINT_COUNT] = [
        BodyJoint::RightShoulder,
        BodyJoint::RightElbow,
        BodyJoint::RightHand,
        BodyJoint::RightThumb,
        BodyJoint::RightFinger,
        BodyJoint::LeftShoulder,
        BodyJoint::LeftElbow,
        BodyJoint::LeftHand,
        BodyJoint::LeftThumb,
        BodyJoint::LeftFinger,
        BodyJoint::LeftEar,
        BodyJoint::LeftEye,
        BodyJoint::RightEar,
        BodyJoint::RightEye,
        BodyJoint::CentralNose,
        BodyJoint::RightUpperLeg,
        BodyJoint::RightLowerLeg,
        BodyJoint::RightFoot,
        BodyJoint::RightToe,
        BodyJoint::LeftUpperLeg,
        BodyJoint::LeftLowerLeg,
        BodyJoint::LeftFoot,
        BodyJoint::LeftToe,
        BodyJoint::UpperAbdomen,
        BodyJoint::CenterHip,
        BodyJoint::TopHead,
        BodyJoint::CentralNeck,
        BodyJoint::MiddleSpine,
    ];

    /// Joints produced by the derived-joint solver, in solve order.
    pub const COMPUTED: [BodyJoint; 4] = [
        BodyJoint::CenterHip,
        BodyJoint::CentralNeck,
        BodyJoint::TopHead,
        BodyJoint::MiddleSpine,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Inverse of [`BodyJoint::index`]. Anything at or past [`JOINT_COUNT`]
    /// is the undefined sentinel and maps to `None`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_computed(self) -> bool {
        self.index() >= DECODED_JOINT_COUNT
    }

    /// Next joint down the chain. Used as the look target when orienting.
    pub fn child(self) -> Option<BodyJoint> {
        use BodyJoint::*;
        match self {
            RightShoulder => Some(RightElbow),
            RightElbow => Some(RightHand),
            LeftShoulder => Some(LeftElbow),
            LeftElbow => Some(LeftHand),
            RightUpperLeg => Some(RightLowerLeg),
            RightLowerLeg => Some(RightFoot),
            RightFoot => Some(RightToe),
            LeftUpperLeg => Some(LeftLowerLeg),
            LeftLowerLeg => Some(LeftFoot),
            LeftFoot => Some(LeftToe),
            MiddleSpine => Some(CentralNeck),
            CentralNeck => Some(TopHead),
            _ => None,
        }
    }

    /// Up-reference joint. Only wired where a bone needs a parent direction
    /// instead of the body-forward vector.
    pub fn parent(self) -> Option<BodyJoint> {
        use BodyJoint::*;
        match self {
            RightElbow => Some(RightShoulder),
            LeftElbow => Some(LeftShoulder),
            RightFoot => Some(RightLowerLeg),
            LeftFoot => Some(LeftLowerLeg),
            _ => None,
        }
    }

    /// Whether retargeting reads or writes this joint's bone.
    pub fn requires_binding(self) -> bool {
        use BodyJoint::*;
        if self.child().is_some() || self.parent().is_some() {
            return true;
        }
        if Self::ALL.iter().any(|j| j.child() == Some(self)) {
            return true;
        }
        matches!(
            self,
            CenterHip | TopHead | CentralNose | LeftThumb | LeftFinger | RightThumb | RightFinger
        )
    }

    pub fn name(self) -> &'static str {
        use BodyJoint::*;
        match self {
            RightShoulder => "right_shoulder",
            RightElbow => "right_elbow",
            RightHand => "right_hand",
            RightThumb => "right_thumb",
            RightFinger => "right_finger",
            LeftShoulder => "left_shoulder",
            LeftElbow => "left_elbow",
            LeftHand => "left_hand",
            LeftThumb => "left_thumb",
            LeftFinger => "left_finger",
            LeftEar => "left_ear",
            LeftEye => "left_eye",
            RightEar => "right_ear",
            RightEye => "right_eye",
            CentralNose => "central_nose",
            RightUpperLeg => "right_upper_leg",
            RightLowerLeg => "right_lower_leg",
            RightFoot => "right_foot",
            RightToe => "right_toe",
            LeftUpperLeg => "left_upper_leg",
            LeftLowerLeg => "left_lower_leg",
            LeftFoot => "left_foot",
            LeftToe => "left_toe",
            UpperAbdomen => "upper_abdomen",
            CenterHip => "center_hip",
            TopHead => "top_head",
            CentralNeck => "central_neck",
            MiddleSpine => "middle_spine",
        }
    }
}

impl std::fmt::Display for BodyJoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Start/end pairs for drawing the skeleton as line segments.
pub const SKELETON_CONNECTIONS: [(BodyJoint, BodyJoint); 28] = {
    use BodyJoint::*;
    [
        // Right arm
        (RightShoulder, RightElbow),
        (RightElbow, RightHand),
        (RightHand, RightThumb),
        (RightHand, RightFinger),
        // Left arm
        (LeftShoulder, LeftElbow),
        (LeftElbow, LeftHand),
        (LeftHand, LeftThumb),
        (LeftHand, LeftFinger),
        // Face
        (LeftEar, CentralNose),
        (RightEar, CentralNose),
        // Right leg
        (RightUpperLeg, RightLowerLeg),
        (RightLowerLeg, RightFoot),
        (RightFoot, RightToe),
        // Left leg
        (LeftUpperLeg, LeftLowerLeg),
        (LeftLowerLeg, LeftFoot),
        (LeftFoot, LeftToe),
        // Torso
        (MiddleSpine, CentralNeck),
        (CentralNeck, TopHead),
        (TopHead, CentralNose),
        (CentralNeck, RightShoulder),
        (CentralNeck, LeftShoulder),
        (RightUpperLeg, RightShoulder),
        (LeftUpperLeg, LeftShoulder),
        (RightShoulder, UpperAbdomen),
        (LeftShoulder, UpperAbdomen),
        (RightUpperLeg, UpperAbdomen),
        (LeftUpperLeg, UpperAbdomen),
        (LeftUpperLeg, RightUpperLeg),
    ]
};

#[derive(Debug, Clone)]
pub struct Joint {
    pub id: BodyJoint,
    pub raw_position: Vector3<f32>,
    pub filtered_position: Vector3<f32>,
    pub confidence: f32,
    pub history: HistoryBuffer,
    pub filter_state: KalmanState,
    pub parent: Option<BodyJoint>,
    pub child: Option<BodyJoint>,
    /// Set once when the skeleton is bound.
    pub rest_rotation_correction: Option<UnitQuaternion<f32>>,
}

impl Joint {
    fn new(id: BodyJoint) -> Self {
        Self {
            id,
            raw_position: Vector3::zeros(),
            filtered_position: Vector3::zeros(),
            // Computed joints have no confidence signal of their own
            confidence: if id.is_computed() { 1.0 } else { 0.0 },
            history: HistoryBuffer::new(),
            filter_state: KalmanState::default(),
            parent: id.parent(),
            child: id.child(),
            rest_rotation_correction: None,
        }
    }
}

/// Fixed-size arena of every joint, indexed by [`BodyJoint`]. Allocated once
/// per tracking session and never resized.
#[derive(Debug, Clone)]
pub struct JointSet {
    joints: Vec<Joint>,
}

impl JointSet {
    pub fn new() -> Self {
        Self {
            joints: BodyJoint::ALL.iter().map(|&id| Joint::new(id)).collect(),
        }
    }

    pub fn get(&self, joint: BodyJoint) -> &Joint {
        &self.joints[joint.index()]
    }

    pub fn get_mut(&mut self, joint: BodyJoint) -> &mut Joint {
        &mut self.joints[joint.index()]
    }

    pub fn raw(&self, joint: BodyJoint) -> Vector3<f32> {
        self.joints[joint.index()].raw_position
    }

    pub fn filtered(&self, joint: BodyJoint) -> Vector3<f32> {
        self.joints[joint.index()].filtered_position
    }

    pub fn iter(&self) -> impl Iterator<Item = &Joint> {
        self.joints.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Joint> {
        self.joints.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

impl Default for JointSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<BodyJoint> for JointSet {
    type Output = Joint;

    fn index(&self, joint: BodyJoint) -> &Joint {
        self.get(joint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip_and_sentinel() {
        for (i, joint) in BodyJoint::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
            assert_eq!(BodyJoint::from_index(i), Some(*joint));
        }
        assert_eq!(BodyJoint::from_index(JOINT_COUNT), None);
        assert_eq!(BodyJoint::from_index(JOINT_COUNT + 1), None);
    }

    #[test]
    fn test_computed_joints_are_tail_of_enumeration() {
        for joint in BodyJoint::COMPUTED {
            assert!(joint.is_computed());
        }
        assert!(!BodyJoint::UpperAbdomen.is_computed());
        assert_eq!(BodyJoint::CenterHip.index(), DECODED_JOINT_COUNT);
    }

    #[test]
    fn test_parents_are_consistent_with_children() {
        // Every parent link points at the joint whose child is us
        for joint in BodyJoint::ALL {
            if let Some(parent) = joint.parent() {
                assert_eq!(parent.child(), Some(joint), "{joint}");
            }
        }
    }

    #[test]
    fn test_forest_has_no_cycles() {
        for start in BodyJoint::ALL {
            let mut current = start;
            let mut steps = 0;
            while let Some(next) = current.child() {
                current = next;
                steps += 1;
                assert!(steps < JOINT_COUNT, "cycle from {start}");
            }
        }
    }

    #[test]
    fn test_binding_requirements() {
        assert!(BodyJoint::LeftShoulder.requires_binding());
        assert!(BodyJoint::LeftToe.requires_binding());
        assert!(BodyJoint::CenterHip.requires_binding());
        assert!(BodyJoint::TopHead.requires_binding());
        assert!(BodyJoint::RightThumb.requires_binding());
        assert!(!BodyJoint::LeftEye.requires_binding());
        assert!(!BodyJoint::RightEar.requires_binding());
        assert!(!BodyJoint::UpperAbdomen.requires_binding());
    }

    #[test]
    fn test_skeleton_connections() {
        assert_eq!(SKELETON_CONNECTIONS.len(), 28);
        for (start, end) in SKELETON_CONNECTIONS {
            assert_ne!(start, end);
        }
        // Everything is drawn except the eyes and the hip centre
        for joint in BodyJoint::ALL {
            let drawn = SKELETON_CONNECTIONS.iter().any(|(a, b)| *a == joint || *b == joint);
            let expected = !matches!(joint, BodyJoint::LeftEye | BodyJoint::RightEye | BodyJoint::CenterHip);
            assert_eq!(drawn, expected, "{joint}");
        }
    }

    #[test]
    fn test_joint_set_initial_confidence() {
        let set = JointSet::new();
        assert_eq!(set.len(), JOINT_COUNT);
        for joint in set.iter() {
            let expected = if joint.id.is_computed() { 1.0 } else { 0.0 };
            assert_eq!(joint.confidence, expected);
            assert!(joint.rest_rotation_correction.is_none());
        }
        assert_eq!(set[BodyJoint::LeftElbow].parent, Some(BodyJoint::LeftShoulder));
    }
}
