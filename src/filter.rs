// src/filter.rs - Per-axis scalar Kalman filter and exponential history smoothing
use nalgebra::Vector3;

pub const HISTORY_LEN: usize = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisKalman {
    pub estimate: f32,
    /// Never negative while Q, R >= 0.
    pub error_covariance: f32,
    pub gain: f32,
}

impl AxisKalman {
    /// One step of the single-parameter recurrence:
    ///
    /// ```text
    /// gain      = (P + Q) / (P + Q + R)
    /// filtered  = estimate + (raw - estimate) * gain
    /// P'        = R * (P + Q) / (R + P + Q)
    /// estimate' = filtered
    /// ```
    ///
    /// There is no separate predicted-covariance term. Q and R are tuned
    /// against exactly this form.
    pub fn update(&mut self, raw: f32, q: f32, r: f32) -> f32 {
        let predicted = self.error_covariance + q;
        let denom = predicted + r;
        if denom <= 0.0 {
            // Q = R = P = 0 has no defined gain; trust the estimate
            self.gain = 0.0;
            return self.estimate;
        }
        self.gain = predicted / denom;
        let filtered = self.estimate + (raw - self.estimate) * self.gain;
        self.error_covariance = r * predicted / denom;
        self.estimate = filtered;
        filtered
    }
}

/// Kalman state for x, y and z. Axes are independent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KalmanState {
    pub axes: [AxisKalman; 3],
}

impl KalmanState {
    pub fn update(&mut self, raw: &Vector3<f32>, q: f32, r: f32) -> Vector3<f32> {
        Vector3::new(
            self.axes[0].update(raw.x, q, r),
            self.axes[1].update(raw.y, q, r),
            self.axes[2].update(raw.z, q, r),
        )
    }

    pub fn estimate(&self) -> Vector3<f32> {
        Vector3::new(self.axes[0].estimate, self.axes[1].estimate, self.axes[2].estimate)
    }

    pub fn error_covariance(&self) -> Vector3<f32> {
        Vector3::new(
            self.axes[0].error_covariance,
            self.axes[1].error_covariance,
            self.axes[2].error_covariance,
        )
    }

    pub fn gain(&self) -> Vector3<f32> {
        Vector3::new(self.axes[0].gain, self.axes[1].gain, self.axes[2].gain)
    }
}

/// Fixed window of past filtered positions, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    slots: [Vector3<f32>; HISTORY_LEN],
    primed: bool,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self {
            slots: [Vector3::zeros(); HISTORY_LEN],
            primed: false,
        }
    }

    /// Shift `position` into the window, then cascade
    /// `slot[i] = slot[i] * alpha + slot[i - 1] * (1 - alpha)` from the oldest
    /// slot forward and return the last slot. The cascade runs on a copy, so
    /// the window only ever holds filtered positions and the output depends
    /// on the last [`HISTORY_LEN`] inputs.
    ///
    /// The first sample fills every slot so the output does not start from
    /// the origin.
    pub fn smooth(&mut self, position: Vector3<f32>, alpha: f32) -> Vector3<f32> {
        if !self.primed {
            self.slots = [position; HISTORY_LEN];
            self.primed = true;
            return position;
        }

        self.slots.rotate_left(1);
        self.slots[HISTORY_LEN - 1] = position;

        let mut blended = self.slots;
        for i in 1..HISTORY_LEN {
            blended[i] = blended[i] * alpha + blended[i - 1] * (1.0 - alpha);
        }
        blended[HISTORY_LEN - 1]
    }

    pub fn slots(&self) -> &[Vector3<f32>; HISTORY_LEN] {
        &self.slots
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalFilter {
    pub q: f32,
    pub r: f32,
    pub enable_smoothing: bool,
    pub smoothing_factor: f32,
}

impl TemporalFilter {
    pub fn new(q: f32, r: f32, enable_smoothing: bool, smoothing_factor: f32) -> Self {
        Self {
            q,
            r,
            enable_smoothing,
            smoothing_factor,
        }
    }

    /// Run Kalman then (optionally) smoothing for one joint.
    ///
    /// With `measured == false` the decode was unavailable: the Kalman
    /// stage holds its estimate instead of taking the measurement.
    pub fn apply(
        &self,
        state: &mut KalmanState,
        history: &mut HistoryBuffer,
        raw: &Vector3<f32>,
        measured: bool,
    ) -> Vector3<f32> {
        let filtered = if measured {
            state.update(raw, self.q, self.r)
        } else {
            state.estimate()
        };

        if self.enable_smoothing {
            history.smooth(filtered, self.smoothing_factor)
        } else {
            filtered
        }
    }
}
