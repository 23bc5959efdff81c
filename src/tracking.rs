// src/tracking.rs - Per-cycle pose pipeline: decode, derive, filter, retarget
use nalgebra::Vector3;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::decoder::HeatmapDecoder;
use crate::derived::solve_derived_joints;
use crate::error::{PoseError, PoseResult as Result};
use crate::filter::TemporalFilter;
use crate::joints::{BodyJoint, JointSet, DECODED_JOINT_COUNT};
use crate::retarget::{BoneHandle, RestPose, Retargeter};

const FRAME_WINDOW: usize = 30;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    pub tracking_confidence: f32,
    pub average_confidence: f32,
    pub avg_processing_time_ms: f32,
    pub cycles: u64,
    #[serde(skip)]
    frame_times: VecDeque<f32>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(FRAME_WINDOW),
            ..Default::default()
        }
    }

    fn record(&mut self, elapsed_ms: f32, confidence: f32) {
        self.frame_times.push_front(elapsed_ms);
        if self.frame_times.len() > FRAME_WINDOW {
            self.frame_times.pop_back();
        }
        self.avg_processing_time_ms =
            self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;

        self.cycles += 1;
        self.tracking_confidence = confidence;
        self.average_confidence += (confidence - self.average_confidence) / self.cycles as f32;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JointSample {
    pub joint: BodyJoint,
    pub position: Vector3<f32>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoseSnapshot {
    pub cycle: u64,
    pub tracking_confidence: f32,
    pub joints: Vec<JointSample>,
}

/// One tracking session. Owns the joint arena and, once bound, the rig.
pub struct PosePipeline<B: BoneHandle> {
    config: PipelineConfig,
    decoder: HeatmapDecoder,
    filter: TemporalFilter,
    joints: JointSet,
    retargeter: Option<Retargeter<B>>,
    metrics: PerformanceMetrics,
    shape_warned: bool,
}

impl<B: BoneHandle> PosePipeline<B> {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let decoder = HeatmapDecoder::new(&config);
        let filter = TemporalFilter::new(
            config.kalman_q,
            config.kalman_r,
            config.enable_smoothing,
            config.smoothing_factor,
        );
        info!(
            "Pose pipeline ready: grid {}, image {}, layout {:?}, smoothing {}",
            config.grid_size, config.image_size, config.layout, config.enable_smoothing
        );
        Ok(Self {
            config,
            decoder,
            filter,
            joints: JointSet::new(),
            retargeter: None,
            metrics: PerformanceMetrics::new(),
            shape_warned: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn expected_lengths(&self) -> (usize, usize) {
        (self.decoder.heatmap_len(), self.decoder.offsets_len())
    }

    /// Run one inference cycle: decode the tensors, resolve computed joints,
    /// and filter every joint. Returns the decoded-joint confidences.
    ///
    /// Buffers of the wrong length count as a cycle where nothing was
    /// seen: every confidence is 0 and positions hold.
    pub fn decode_cycle(&mut self, heatmap: &[f32], offsets: &[f32]) -> [f32; DECODED_JOINT_COUNT] {
        let start = Instant::now();

        match self.decoder.decode(heatmap, offsets) {
            Some(decoded) => {
                for (i, result) in decoded.iter().enumerate() {
                    let joint = self.joints.get_mut(BodyJoint::ALL[i]);
                    joint.confidence = result.confidence;
                    if result.is_available() {
                        joint.raw_position = result.position;
                    }
                }
            }
            None => {
                let (heatmap_len, offsets_len) = self.expected_lengths();
                if !self.shape_warned {
                    warn!(
                        "Tensor shape mismatch: got {}/{} values, expected {}/{}",
                        heatmap.len(),
                        offsets.len(),
                        heatmap_len,
                        offsets_len
                    );
                    self.shape_warned = true;
                }
                for joint in self.joints.iter_mut().take(DECODED_JOINT_COUNT) {
                    joint.confidence = 0.0;
                }
            }
        }

        solve_derived_joints(&mut self.joints);

        for joint in self.joints.iter_mut() {
            let measured = joint.confidence > 0.0;
            joint.filtered_position = self.filter.apply(
                &mut joint.filter_state,
                &mut joint.history,
                &joint.raw_position,
                measured,
            );
        }

        let confidences: [f32; DECODED_JOINT_COUNT] =
            std::array::from_fn(|i| self.joints.get(BodyJoint::ALL[i]).confidence);
        let mean = confidences.iter().sum::<f32>() / DECODED_JOINT_COUNT as f32;
        self.metrics.record(start.elapsed().as_secs_f32() * 1000.0, mean);

        debug!(
            "Cycle {}: confidence {:.3}, {:.2} ms",
            self.metrics.cycles, mean, self.metrics.avg_processing_time_ms
        );

        confidences
    }

    pub fn joints(&self) -> &JointSet {
        &self.joints
    }

    pub fn filtered_position(&self, joint: BodyJoint) -> Vector3<f32> {
        self.joints.filtered(joint)
    }

    pub fn raw_position(&self, joint: BodyJoint) -> Vector3<f32> {
        self.joints.raw(joint)
    }

    pub fn confidence(&self, joint: BodyJoint) -> f32 {
        self.joints.get(joint).confidence
    }

    /// Bind the rig. On failure the pipeline stays unbound and no rest
    /// correction is written.
    pub fn init_skeleton(&mut self, bindings: HashMap<BodyJoint, B>, rest: &RestPose) -> Result<&JointSet> {
        let retargeter = Retargeter::init(&mut self.joints, bindings, rest, &self.config)?;
        self.retargeter = Some(retargeter);
        Ok(&self.joints)
    }

    pub fn is_initialized(&self) -> bool {
        self.retargeter.is_some()
    }

    pub fn update_pose(&mut self) -> Result<()> {
        let retargeter = self.retargeter.as_mut().ok_or(PoseError::NotInitialized)?;
        retargeter.update(&self.joints);
        Ok(())
    }

    pub fn retargeter(&self) -> Option<&Retargeter<B>> {
        self.retargeter.as_ref()
    }

    pub fn bone(&self, joint: BodyJoint) -> Option<&B> {
        self.retargeter.as_ref().and_then(|r| r.bone(joint))
    }

    pub fn low_confidence_joints(&self) -> Vec<BodyJoint> {
        self.joints
            .iter()
            .take(DECODED_JOINT_COUNT)
            .filter(|j| j.confidence < self.config.visibility_threshold)
            .map(|j| j.id)
            .collect()
    }

    pub fn is_visible(&self, joint: BodyJoint) -> bool {
        self.joints.get(joint).confidence >= self.config.visibility_threshold
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> PoseSnapshot {
        PoseSnapshot {
            cycle: self.metrics.cycles,
            tracking_confidence: self.metrics.tracking_confidence,
            joints: self
                .joints
                .iter()
                .map(|j| JointSample {
                    joint: j.id,
                    position: j.filtered_position,
                    confidence: j.confidence,
                })
                .collect(),
        }
    }

    /// Forget all filter state and positions. The rig binding is kept.
    pub fn reset(&mut self) {
        for joint in self.joints.iter_mut() {
            joint.raw_position = Vector3::zeros();
            joint.filtered_position = Vector3::zeros();
            joint.filter_state = Default::default();
            joint.history.reset();
            if !joint.id.is_computed() {
                joint.confidence = 0.0;
            }
        }
        if let Some(retargeter) = self.retargeter.as_mut() {
            retargeter.reset();
        }
        self.metrics = PerformanceMetrics::new();
        info!("Pose pipeline reset");
    }
}
