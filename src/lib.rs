// src/lib.rs - 3D pose decoding, filtering and humanoid retargeting
pub mod config;
pub mod decoder;
pub mod derived;
pub mod error;
pub mod filter;
pub mod joints;
pub mod retarget;
pub mod synthetic;
pub mod tracking;

pub use config::PipelineConfig;
pub use decoder::{DecodedJoint, HeatmapDecoder, TensorLayout};
pub use error::{PoseError, PoseResult};
pub use joints::{BodyJoint, Joint, JointSet, DECODED_JOINT_COUNT, JOINT_COUNT, SKELETON_CONNECTIONS};
pub use retarget::{BoneHandle, BoneTransform, RestPose, Retargeter};
pub use tracking::{PerformanceMetrics, PosePipeline, PoseSnapshot};
