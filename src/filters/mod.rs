pub mod complementary;

pub use complementary::ComplementaryAhrs;

use crate::types::Vec3;

/// Attitude estimator fed with calibrated IMU samples.
///
/// Accelerometer in m/s², gyro in deg/s, angles in degrees.
pub trait OrientationEstimator: Send {
    fn update(&mut self, accel: &Vec3, gyro: &Vec3, dt: f64);

    /// Heading in `[0, 360)`.
    fn yaw_deg(&self) -> f64;

    fn pitch_deg(&self) -> f64;

    fn roll_deg(&self) -> f64;

    /// True after the first update.
    fn initialized(&self) -> bool;
}
