// src/config.rs - Tunables supplied by the host application
use serde::{Deserialize, Serialize};

use crate::decoder::TensorLayout;
use crate::error::{PoseError, PoseResult as Result};
use crate::joints::DECODED_JOINT_COUNT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Heatmap cells per axis (D).
    pub grid_size: usize,
    // Side length of the square network input, in pixels.
    pub image_size: f32,
    // Added to the centred depth bin before scaling.
    pub depth_adjustment: f32,
    pub layout: TensorLayout,

    pub kalman_q: f32,
    pub kalman_r: f32,

    pub enable_smoothing: bool,
    // Weight of the newest sample in the history cascade.
    pub smoothing_factor: f32,

    // Model-space units to rig units for the root bone.
    pub position_scale: f32,
    // Gain applied to the height-derived depth offset.
    pub vertical_scale: f32,
    // Body height (model units) at which the depth offset is zero.
    pub base_height: f32,
    pub ground_feet: bool,

    // Joints under this confidence are reported as not visible.
    pub visibility_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            grid_size: 28,
            image_size: 448.0,
            depth_adjustment: 0.0,
            layout: TensorLayout::JointMajor,
            kalman_q: 0.001,
            kalman_r: 0.0015,
            enable_smoothing: true,
            smoothing_factor: 0.5,
            position_scale: 0.005,
            vertical_scale: 0.8,
            base_height: 224.0 * 0.75,
            ground_feet: true,
            visibility_threshold: 0.3,
        }
    }
}

impl PipelineConfig {
    // Parse and validate. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 {
            return Err(PoseError::InvalidConfig("grid_size must be at least 1".into()));
        }
        // The offset tensor is the largest buffer
        let offsets_len = self
            .cells_per_joint()
            .and_then(|cells| cells.checked_mul(DECODED_JOINT_COUNT * 3));
        if offsets_len.is_none() {
            return Err(PoseError::InvalidConfig(format!(
                "grid_size {} is too large to address",
                self.grid_size
            )));
        }
        if !(self.image_size.is_finite() && self.image_size > 0.0) {
            return Err(PoseError::InvalidConfig(format!(
                "image_size must be positive, got {}",
                self.image_size
            )));
        }
        for (name, value) in [("kalman_q", self.kalman_q), ("kalman_r", self.kalman_r)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PoseError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if self.kalman_q + self.kalman_r <= 0.0 {
            return Err(PoseError::InvalidConfig(
                "kalman_q and kalman_r cannot both be zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(PoseError::InvalidConfig(format!(
                "smoothing_factor must be within [0, 1], got {}",
                self.smoothing_factor
            )));
        }
        if !(self.base_height.is_finite() && self.base_height > 0.0) {
            return Err(PoseError::InvalidConfig(format!(
                "base_height must be positive, got {}",
                self.base_height
            )));
        }
        for (name, value) in [
            ("depth_adjustment", self.depth_adjustment),
            ("position_scale", self.position_scale),
            ("vertical_scale", self.vertical_scale),
            ("visibility_threshold", self.visibility_threshold),
        ] {
            if !value.is_finite() {
                return Err(PoseError::InvalidConfig(format!("{name} must be finite, got {value}")));
            }
        }
        Ok(())
    }

    // Cells in one joint's heatmap volume, None on overflow
    pub fn cells_per_joint(&self) -> Option<usize> {
        self.grid_size
            .checked_mul(self.grid_size)
            .and_then(|area| area.checked_mul(self.grid_size))
    }

    pub fn resize_factor(&self) -> f32 {
        self.image_size / self.grid_size as f32
    }

    pub fn half_image_size(&self) -> f32 {
        self.image_size / 2.0
    }
}
