// src/retarget.rs - Drives a humanoid rig from filtered joint positions
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PoseError, PoseResult as Result};
use crate::joints::{BodyJoint, JointSet, JOINT_COUNT};

/// Below this length a direction is treated as undefined.
const DEGENERATE_EPS: f32 = 1e-6;

/// Something in the host's scene graph whose world transform we can read
/// and write. The pipeline never owns the node behind it.
pub trait BoneHandle {
    fn position(&self) -> Vector3<f32>;
    fn rotation(&self) -> UnitQuaternion<f32>;
    fn set_position(&mut self, position: Vector3<f32>);
    fn set_rotation(&mut self, rotation: UnitQuaternion<f32>);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoneTransform {
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl BoneTransform {
    pub fn new(position: Vector3<f32>, rotation: UnitQuaternion<f32>) -> Self {
        Self { position, rotation }
    }

    pub fn at(position: Vector3<f32>) -> Self {
        Self::new(position, UnitQuaternion::identity())
    }
}

impl BoneHandle for BoneTransform {
    fn position(&self) -> Vector3<f32> {
        self.position
    }

    fn rotation(&self) -> UnitQuaternion<f32> {
        self.rotation
    }

    fn set_position(&mut self, position: Vector3<f32>) {
        self.position = position;
    }

    fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.rotation = rotation;
    }
}

/// Shared bones, for rigs where several joints read the same node or the
/// host keeps its own handle to it.
impl<T: BoneHandle> BoneHandle for Rc<RefCell<T>> {
    fn position(&self) -> Vector3<f32> {
        self.borrow().position()
    }

    fn rotation(&self) -> UnitQuaternion<f32> {
        self.borrow().rotation()
    }

    fn set_position(&mut self, position: Vector3<f32>) {
        self.borrow_mut().set_position(position);
    }

    fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.borrow_mut().set_rotation(rotation);
    }
}

/// Bone transforms of the rig in its undeformed pose.
#[derive(Debug, Clone, Default)]
pub struct RestPose {
    bones: HashMap<BodyJoint, BoneTransform>,
}

impl RestPose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capture<B: BoneHandle>(bindings: &HashMap<BodyJoint, B>) -> Self {
        let bones = bindings
            .iter()
            .map(|(joint, bone)| (*joint, BoneTransform::new(bone.position(), bone.rotation())))
            .collect();
        Self { bones }
    }

    pub fn insert(&mut self, joint: BodyJoint, bone: BoneTransform) {
        self.bones.insert(joint, bone);
    }

    pub fn get(&self, joint: BodyJoint) -> Option<&BoneTransform> {
        self.bones.get(&joint)
    }

    fn bone(&self, joint: BodyJoint) -> Result<&BoneTransform> {
        self.bones.get(&joint).ok_or(PoseError::BindingMissing(joint))
    }

    fn position(&self, joint: BodyJoint) -> Result<Vector3<f32>> {
        Ok(self.bone(joint)?.position)
    }
}

/// Rotation taking +Z to `forward` with +Y as close to `up` as possible.
/// `None` when either vector has no length or they are parallel; callers
/// keep the previous orientation in that case.
pub fn look_rotation(forward: &Vector3<f32>, up: &Vector3<f32>) -> Option<UnitQuaternion<f32>> {
    let dir = forward.try_normalize(DEGENERATE_EPS)?;
    let up = up.try_normalize(DEGENERATE_EPS)?;
    if up.cross(&dir).norm() < DEGENERATE_EPS {
        return None;
    }
    Some(UnitQuaternion::face_towards(&dir, &up))
}

/// Unit normal of triangle (a, b, c), or zero for a degenerate triangle.
pub fn triangle_normal(a: &Vector3<f32>, b: &Vector3<f32>, c: &Vector3<f32>) -> Vector3<f32> {
    (a - b)
        .cross(&(a - c))
        .try_normalize(DEGENERATE_EPS)
        .unwrap_or_else(Vector3::zeros)
}

#[derive(Debug, Clone, Copy)]
struct HeightFilter {
    current: f32,
    previous: f32,
}

impl HeightFilter {
    fn new(base_height: f32) -> Self {
        Self {
            current: base_height,
            previous: base_height,
        }
    }

    fn update(&mut self, measured: f32, base_height: f32) -> f32 {
        self.current = measured * 0.7 + self.previous * 0.3;
        self.previous = self.current;
        if self.current == 0.0 {
            self.current = base_height;
        }
        self.current
    }
}

/// Head-to-ankle length through the spine and the averaged legs.
pub fn body_height(joints: &JointSet) -> f32 {
    use BodyJoint::*;
    let p = |joint| joints.filtered(joint);
    let dist = |a, b| (p(a) - p(b)).norm();

    let pelvis = (p(RightUpperLeg) + p(LeftUpperLeg)) / 2.0;
    let head_neck = dist(TopHead, CentralNeck);
    let neck_spine = dist(CentralNeck, MiddleSpine);
    let spine_pelvis = (p(MiddleSpine) - pelvis).norm();
    let thigh = (dist(RightUpperLeg, RightLowerLeg) + dist(LeftUpperLeg, LeftLowerLeg)) / 2.0;
    let shin = (dist(RightLowerLeg, RightFoot) + dist(LeftLowerLeg, LeftFoot)) / 2.0;

    head_neck + neck_spine + spine_pelvis + thigh + shin
}

pub struct Retargeter<B: BoneHandle> {
    bones: Vec<Option<B>>,
    rest_root: Vector3<f32>,
    ground_reference: f32,
    height: HeightFilter,
    position_scale: f32,
    vertical_scale: f32,
    base_height: f32,
    ground_feet: bool,
    warned: [bool; JOINT_COUNT],
}

impl<B: BoneHandle> Retargeter<B> {
    /// Bind `bindings` to the joints and store a rest correction on every
    /// joint that gets oriented. Fails without touching `joints` if a joint
    /// the update needs has no bone or rest transform.
    pub fn init(
        joints: &mut JointSet,
        bindings: HashMap<BodyJoint, B>,
        rest: &RestPose,
        config: &PipelineConfig,
    ) -> Result<Self> {
        use BodyJoint::*;

        for joint in BodyJoint::ALL {
            if joint.requires_binding() && !(bindings.contains_key(&joint) && rest.get(joint).is_some()) {
                return Err(PoseError::BindingMissing(joint));
            }
        }

        let rest_forward = triangle_normal(
            &rest.position(CenterHip)?,
            &rest.position(LeftUpperLeg)?,
            &rest.position(RightUpperLeg)?,
        );

        let mut corrections: Vec<(BodyJoint, UnitQuaternion<f32>)> = Vec::new();
        for joint in BodyJoint::ALL {
            let Some(child) = joint.child() else {
                continue;
            };
            let dir = rest.position(joint)? - rest.position(child)?;
            corrections.push((joint, rest_correction(joint, &dir, &rest_forward, rest)?));
        }

        // The hip has no child; it faces the body-forward direction
        corrections.push((
            CenterHip,
            rest_correction(CenterHip, &rest_forward, &Vector3::y(), rest)?,
        ));

        let gaze = rest.position(CentralNose)? - rest.position(TopHead)?;
        corrections.push((TopHead, rest_correction(TopHead, &gaze, &Vector3::y(), rest)?));

        for (hand, thumb, finger, normal) in [
            (
                LeftHand,
                LeftThumb,
                LeftFinger,
                triangle_normal(&rest.position(LeftHand)?, &rest.position(LeftFinger)?, &rest.position(LeftThumb)?),
            ),
            (
                RightHand,
                RightThumb,
                RightFinger,
                triangle_normal(&rest.position(RightHand)?, &rest.position(RightThumb)?, &rest.position(RightFinger)?),
            ),
        ] {
            let dir = rest.position(thumb)? - rest.position(finger)?;
            corrections.push((hand, rest_correction(hand, &dir, &normal, rest)?));
        }

        for (joint, correction) in corrections {
            joints.get_mut(joint).rest_rotation_correction = Some(correction);
        }

        let ground_reference = rest.position(LeftToe)?.y.min(rest.position(RightToe)?.y);
        let rest_root = rest.position(CenterHip)?;

        let mut bones: Vec<Option<B>> = (0..JOINT_COUNT).map(|_| None).collect();
        let bound = bindings.len();
        for (joint, bone) in bindings {
            bones[joint.index()] = Some(bone);
        }

        info!(
            "Skeleton bound: {} bones, root at ({:.3}, {:.3}, {:.3})",
            bound, rest_root.x, rest_root.y, rest_root.z
        );

        Ok(Self {
            bones,
            rest_root,
            ground_reference,
            height: HeightFilter::new(config.base_height),
            position_scale: config.position_scale,
            vertical_scale: config.vertical_scale,
            base_height: config.base_height,
            ground_feet: config.ground_feet,
            warned: [false; JOINT_COUNT],
        })
    }

    pub fn bone(&self, joint: BodyJoint) -> Option<&B> {
        self.bones[joint.index()].as_ref()
    }

    pub fn bone_mut(&mut self, joint: BodyJoint) -> Option<&mut B> {
        self.bones[joint.index()].as_mut()
    }

    pub fn body_height(&self) -> f32 {
        self.height.current
    }

    // Forget the height history and the per-joint warnings. Bindings and
    // rest corrections stay.
    pub fn reset(&mut self) {
        self.height = HeightFilter::new(self.base_height);
        self.warned = [false; JOINT_COUNT];
    }

    /// Write root position and every bone orientation from the filtered
    /// joint positions.
    pub fn update(&mut self, joints: &JointSet) {
        use BodyJoint::*;
        let p = |joint| joints.filtered(joint);

        let height = self.height.update(body_height(joints), self.base_height);
        let dz = (self.base_height - height) / self.base_height * self.vertical_scale;

        let forward = triangle_normal(&p(CenterHip), &p(LeftUpperLeg), &p(RightUpperLeg));
        let mut root = p(CenterHip) * self.position_scale
            + Vector3::new(self.rest_root.x, self.rest_root.y, self.rest_root.z + dz);
        self.orient(joints, CenterHip, look_rotation(&forward, &Vector3::y()));

        for joint in joints.iter() {
            let Some(child) = joint.child else {
                continue;
            };
            let dir = joint.filtered_position - p(child);
            let up = match joint.parent {
                Some(parent) => p(parent) - joint.filtered_position,
                None => forward,
            };
            self.orient(joints, joint.id, look_rotation(&dir, &up));
        }

        let gaze = p(CentralNose) - p(TopHead);
        let face = triangle_normal(&p(CentralNose), &p(RightEar), &p(LeftEar));
        self.orient(joints, TopHead, look_rotation(&gaze, &face));

        let left_palm = triangle_normal(&p(LeftHand), &p(LeftFinger), &p(LeftThumb));
        self.orient(joints, LeftHand, look_rotation(&(p(LeftThumb) - p(LeftFinger)), &left_palm));

        let right_palm = triangle_normal(&p(RightHand), &p(RightThumb), &p(RightFinger));
        self.orient(joints, RightHand, look_rotation(&(p(RightThumb) - p(RightFinger)), &right_palm));

        if self.ground_feet {
            root.y += self.ground_offset(joints, root.y);
        }
        if let Some(hip) = self.bone_mut(CenterHip) {
            hip.set_position(root);
        }

        debug!(
            "Pose updated: height {:.1}, dz {:.4}, root ({:.3}, {:.3}, {:.3})",
            height, dz, root.x, root.y, root.z
        );
    }

    // Vertical shift that puts the lower toe on the rest-pose toe height.
    fn ground_offset(&self, joints: &JointSet, root_y: f32) -> f32 {
        let hip_y = joints.filtered(BodyJoint::CenterHip).y;
        let toe_height =
            |toe| root_y + (joints.filtered(toe).y - hip_y) * self.position_scale;
        let lowest = toe_height(BodyJoint::LeftToe).min(toe_height(BodyJoint::RightToe));
        self.ground_reference - lowest
    }

    fn orient(&mut self, joints: &JointSet, joint: BodyJoint, look: Option<UnitQuaternion<f32>>) {
        let Some(correction) = joints.get(joint).rest_rotation_correction else {
            return;
        };
        let Some(look) = look else {
            // Keep whatever orientation the bone already has
            if !self.warned[joint.index()] {
                warn!("Degenerate orientation for {}, holding previous rotation", joint);
                self.warned[joint.index()] = true;
            } else {
                debug!("Degenerate orientation for {}", joint);
            }
            return;
        };
        if let Some(bone) = self.bone_mut(joint) {
            bone.set_rotation(look * correction);
        }
    }
}

fn rest_correction(
    joint: BodyJoint,
    forward: &Vector3<f32>,
    up: &Vector3<f32>,
    rest: &RestPose,
) -> Result<UnitQuaternion<f32>> {
    let look = look_rotation(forward, up).ok_or(PoseError::DegenerateRestPose(joint))?;
    Ok(look.inverse() * rest.bone(joint)?.rotation)
}
