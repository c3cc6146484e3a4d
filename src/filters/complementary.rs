use super::OrientationEstimator;
use crate::types::Vec3;

/// Below this magnitude (m/s²) the accelerometer carries no usable tilt.
const MIN_GRAVITY_NORM: f64 = 1e-3;

/// Complementary attitude filter.
///
/// Gyro rates are integrated into roll, pitch and yaw; roll and pitch are
/// then pulled toward the tilt implied by gravity with weight `gain * dt`.
/// Yaw has no absolute reference and drifts with residual gyro bias.
pub struct ComplementaryAhrs {
    gain: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
    initialized: bool,
}

impl ComplementaryAhrs {
    pub fn new(gain: f64) -> Self {
        Self {
            gain: if gain.is_finite() { gain } else { 0.0 },
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            initialized: false,
        }
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Roll and pitch (degrees) implied by a gravity vector.
    fn tilt_from_accel(accel: &Vec3) -> Option<(f64, f64)> {
        let norm = accel.norm();
        if !norm.is_finite() || norm < MIN_GRAVITY_NORM {
            return None;
        }
        let roll = accel.y.atan2(accel.z).to_degrees();
        let pitch = (-accel.x).atan2(accel.y.hypot(accel.z)).to_degrees();
        Some((roll, pitch))
    }
}

/// Wrap to (-180, 180].
fn wrap_180(deg: f64) -> f64 {
    let wrapped = (deg + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

fn wrap_360(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

impl OrientationEstimator for ComplementaryAhrs {
    fn update(&mut self, accel: &Vec3, gyro: &Vec3, dt: f64) {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };

        if gyro.iter().all(|v| v.is_finite()) {
            self.roll += gyro.x * dt;
            self.pitch += gyro.y * dt;
            self.yaw += gyro.z * dt;
        }

        if let Some((accel_roll, accel_pitch)) = Self::tilt_from_accel(accel) {
            let weight = if self.initialized {
                (self.gain * dt).clamp(0.0, 1.0)
            } else {
                // First sample: take gravity as-is.
                1.0
            };
            self.roll += weight * wrap_180(accel_roll - self.roll);
            self.pitch += weight * wrap_180(accel_pitch - self.pitch);
        }

        self.roll = wrap_180(self.roll);
        self.pitch = wrap_180(self.pitch);
        self.yaw = wrap_360(self.yaw);
        self.initialized = true;
    }

    fn yaw_deg(&self) -> f64 {
        self.yaw
    }

    fn pitch_deg(&self) -> f64 {
        self.pitch
    }

    fn roll_deg(&self) -> f64 {
        self.roll
    }

    fn initialized(&self) -> bool {
        self.initialized
    }
}
