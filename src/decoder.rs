// src/decoder.rs - Peak search over volumetric heatmaps with sub-cell offset correction
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::joints::DECODED_JOINT_COUNT;

/// Memory order of the heatmap and offset tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// Heatmap `[joint][z][y][x]`, offsets `[joint][z][y][x][channel]`.
    #[default]
    JointMajor,
    /// The network's native order: heatmap `[y][x][joint][z]`, offsets
    /// `[y][x][channel][joint][z]`.
    Interleaved,
}

impl TensorLayout {
    #[inline]
    pub fn heatmap_index(self, grid: usize, joints: usize, joint: usize, x: usize, y: usize, z: usize) -> usize {
        match self {
            TensorLayout::JointMajor => ((joint * grid + z) * grid + y) * grid + x,
            TensorLayout::Interleaved => (y * grid + x) * grid * joints + joint * grid + z,
        }
    }

    // `channel` is 0, 1, 2 for the x, y, z offset.
    #[inline]
    pub fn offset_index(
        self,
        grid: usize,
        joints: usize,
        joint: usize,
        x: usize,
        y: usize,
        z: usize,
        channel: usize,
    ) -> usize {
        match self {
            TensorLayout::JointMajor => (((joint * grid + z) * grid + y) * grid + x) * 3 + channel,
            TensorLayout::Interleaved => {
                (y * grid + x) * grid * joints * 3 + (joint + channel * joints) * grid + z
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedJoint {
    pub position: Vector3<f32>,
    /// Peak probability, clamped to [0, 1]. Zero means the decode is unusable.
    pub confidence: f32,
    pub cell: [usize; 3],
}

impl DecodedJoint {
    pub fn is_available(&self) -> bool {
        self.confidence > 0.0
    }
}

#[derive(Debug, Clone)]
pub struct HeatmapDecoder {
    grid: usize,
    joints: usize,
    layout: TensorLayout,
    resize_factor: f32,
    half_image_size: f32,
    depth_adjustment: f32,
}

impl HeatmapDecoder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            grid: config.grid_size,
            joints: DECODED_JOINT_COUNT,
            layout: config.layout,
            resize_factor: config.resize_factor(),
            half_image_size: config.half_image_size(),
            depth_adjustment: config.depth_adjustment,
        }
    }

    pub fn heatmap_len(&self) -> usize {
        self.joints * self.grid * self.grid * self.grid
    }

    pub fn offsets_len(&self) -> usize {
        self.heatmap_len() * 3
    }

    pub fn shape_matches(&self, heatmap: &[f32], offsets: &[f32]) -> bool {
        heatmap.len() == self.heatmap_len() && offsets.len() == self.offsets_len()
    }

    /// Decode every joint. `None` when the buffers do not have the
    /// configured shape.
    pub fn decode(&self, heatmap: &[f32], offsets: &[f32]) -> Option<[DecodedJoint; DECODED_JOINT_COUNT]> {
        if !self.shape_matches(heatmap, offsets) {
            return None;
        }
        Some(std::array::from_fn(|joint| self.decode_joint(heatmap, offsets, joint)))
    }

    pub fn decode_joint(&self, heatmap: &[f32], offsets: &[f32], joint: usize) -> DecodedJoint {
        let (cell, peak) = self.find_peak(heatmap, joint);
        let [x, y, z] = cell;

        let offset = |channel| {
            offsets[self
                .layout
                .offset_index(self.grid, self.joints, joint, x, y, z, channel)]
        };

        let position = self.cell_to_position(cell, Vector3::new(offset(0), offset(1), offset(2)));

        let confidence = if position.iter().all(|v| v.is_finite()) {
            peak.min(1.0)
        } else {
            0.0
        };

        DecodedJoint {
            position,
            confidence,
            cell,
        }
    }

    /// Highest cell, scanning z, then y, then x. Only a strictly greater
    /// value replaces the best so far, so ties keep the first cell scanned
    /// and an all-zero volume keeps (0, 0, 0) with a peak of 0.
    fn find_peak(&self, heatmap: &[f32], joint: usize) -> ([usize; 3], f32) {
        let mut best = 0.0_f32;
        let mut cell = [0, 0, 0];
        for z in 0..self.grid {
            for y in 0..self.grid {
                for x in 0..self.grid {
                    let v = heatmap[self.layout.heatmap_index(self.grid, self.joints, joint, x, y, z)];
                    if v > best {
                        best = v;
                        cell = [x, y, z];
                    }
                }
            }
        }
        (cell, best)
    }

    /// Coarse cell plus learned sub-cell offset, in model space.
    pub fn cell_to_position(&self, cell: [usize; 3], offset: Vector3<f32>) -> Vector3<f32> {
        let [x, y, z] = cell;
        let depth_bin = z as f32 - (self.grid / 2) as f32 + self.depth_adjustment;
        Vector3::new(
            (offset.x + 0.5 + x as f32) * self.resize_factor - self.half_image_size,
            self.half_image_size - (offset.y + 0.5 + y as f32) * self.resize_factor,
            (offset.z + 0.5 + depth_bin) * self.resize_factor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(grid: usize, layout: TensorLayout) -> PipelineConfig {
        PipelineConfig {
            grid_size: grid,
            image_size: 224.0,
            layout,
            ..Default::default()
        }
    }

    fn buffers(decoder: &HeatmapDecoder) -> (Vec<f32>, Vec<f32>) {
        (vec![0.0; decoder.heatmap_len()], vec![0.0; decoder.offsets_len()])
    }

    fn place(
        decoder: &HeatmapDecoder,
        heatmap: &mut [f32],
        offsets: &mut [f32],
        joint: usize,
        cell: [usize; 3],
        value: f32,
        offset: [f32; 3],
    ) {
        let [x, y, z] = cell;
        let g = decoder.grid;
        let j = decoder.joints;
        heatmap[decoder.layout.heatmap_index(g, j, joint, x, y, z)] = value;
        for (c, o) in offset.iter().enumerate() {
            offsets[decoder.layout.offset_index(g, j, joint, x, y, z, c)] = *o;
        }
    }

    #[test]
    fn test_single_peak_closed_form() {
        for layout in [TensorLayout::JointMajor, TensorLayout::Interleaved] {
            let decoder = HeatmapDecoder::new(&config(8, layout));
            let (mut heatmap, mut offsets) = buffers(&decoder);
            place(&decoder, &mut heatmap, &mut offsets, 5, [3, 3, 3], 0.9, [0.1, 0.1, 0.1]);

            let decoded = decoder.decode(&heatmap, &offsets).unwrap();
            let joint = decoded[5];
            assert_relative_eq!(joint.confidence, 0.9);
            assert_eq!(joint.cell, [3, 3, 3]);

            let resize = 224.0 / 8.0;
            let half = 112.0;
            assert_relative_eq!(joint.position.x, (0.1 + 0.5 + 3.0) * resize - half, epsilon = 1e-4);
            assert_relative_eq!(joint.position.y, half - (0.1 + 0.5 + 3.0) * resize, epsilon = 1e-4);
            assert_relative_eq!(joint.position.z, (0.1 + 0.5 + (3.0 - 4.0)) * resize, epsilon = 1e-4);

            // Every other joint saw an all-zero volume
            assert_eq!(decoded[0].confidence, 0.0);
            assert_eq!(decoded[0].cell, [0, 0, 0]);
        }
    }

    #[test]
    fn test_depth_adjustment_shifts_depth_bin() {
        let config = PipelineConfig {
            depth_adjustment: 1.5,
            ..config(8, TensorLayout::JointMajor)
        };
        let decoder = HeatmapDecoder::new(&config);
        let (mut heatmap, mut offsets) = buffers(&decoder);
        place(&decoder, &mut heatmap, &mut offsets, 0, [3, 3, 3], 0.9, [0.1, 0.1, 0.1]);

        let joint = decoder.decode_joint(&heatmap, &offsets, 0);
        assert_relative_eq!(joint.position.z, (0.1 + 0.5 + (3.0 - 4.0 + 1.5)) * 28.0, epsilon = 1e-4);
        // x and y do not depend on the adjustment
        assert_relative_eq!(joint.position.x, (0.1 + 0.5 + 3.0) * 28.0 - 112.0, epsilon = 1e-4);
    }

    #[test]
    fn test_all_zero_volume_is_unavailable() {
        let decoder = HeatmapDecoder::new(&config(4, TensorLayout::JointMajor));
        let (heatmap, offsets) = buffers(&decoder);
        let decoded = decoder.decode(&heatmap, &offsets).unwrap();
        for joint in decoded.iter() {
            assert!(!joint.is_available());
            assert_eq!(joint.cell, [0, 0, 0]);
            assert_eq!(joint.position, decoder.cell_to_position([0, 0, 0], Vector3::zeros()));
        }
    }

    #[test]
    fn test_tie_keeps_first_scanned_cell() {
        let decoder = HeatmapDecoder::new(&config(4, TensorLayout::JointMajor));
        let (mut heatmap, mut offsets) = buffers(&decoder);
        // (1, 0, 2) is scanned after (3, 2, 1) because z is the outer loop
        place(&decoder, &mut heatmap, &mut offsets, 0, [1, 0, 2], 0.5, [0.0; 3]);
        place(&decoder, &mut heatmap, &mut offsets, 0, [3, 2, 1], 0.5, [0.0; 3]);
        let joint = decoder.decode_joint(&heatmap, &offsets, 0);
        assert_eq!(joint.cell, [3, 2, 1]);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let decoder = HeatmapDecoder::new(&config(4, TensorLayout::JointMajor));
        let (mut heatmap, mut offsets) = buffers(&decoder);
        place(&decoder, &mut heatmap, &mut offsets, 2, [1, 1, 1], 3.5, [0.0; 3]);
        let decoded = decoder.decode(&heatmap, &offsets).unwrap();
        assert_eq!(decoded[2].confidence, 1.0);
        assert!(decoded.iter().all(|j| (0.0..=1.0).contains(&j.confidence)));
    }

    #[test]
    fn test_non_finite_offset_is_unavailable() {
        let decoder = HeatmapDecoder::new(&config(4, TensorLayout::JointMajor));
        let (mut heatmap, mut offsets) = buffers(&decoder);
        place(&decoder, &mut heatmap, &mut offsets, 1, [2, 2, 2], 0.8, [f32::NAN, 0.0, 0.0]);
        assert_eq!(decoder.decode_joint(&heatmap, &offsets, 1).confidence, 0.0);
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let decoder = HeatmapDecoder::new(&config(4, TensorLayout::JointMajor));
        let (heatmap, offsets) = buffers(&decoder);
        assert!(decoder.decode(&heatmap[1..], &offsets).is_none());
        assert!(decoder.decode(&heatmap, &offsets[..10]).is_none());
    }

    #[test]
    fn test_decode_is_deterministic() {
        let decoder = HeatmapDecoder::new(&config(6, TensorLayout::Interleaved));
        let (mut heatmap, mut offsets) = buffers(&decoder);
        for (i, v) in heatmap.iter_mut().enumerate() {
            *v = ((i * 7919) % 1000) as f32 / 1000.0;
        }
        for (i, v) in offsets.iter_mut().enumerate() {
            *v = ((i * 104729) % 100) as f32 / 100.0 - 0.5;
        }
        let first = decoder.decode(&heatmap, &offsets).unwrap();
        let second = decoder.decode(&heatmap, &offsets).unwrap();
        assert_eq!(first, second);
    }
}
