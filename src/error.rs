// src/error.rs
use thiserror::Error;

use crate::joints::BodyJoint;

#[derive(Error, Debug)]
pub enum PoseError {
    #[error("Joint {0} drives a bone but has no binding")]
    BindingMissing(BodyJoint),
    #[error("Rest pose around joint {0} is degenerate, cannot derive a rest rotation")]
    DegenerateRestPose(BodyJoint),
    #[error("Skeleton has not been initialized")]
    NotInitialized,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type PoseResult<T> = std::result::Result<T, PoseError>;
