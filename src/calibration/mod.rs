//! IMU calibration: gyro bias, accel offset and magnetometer (hard-iron) bias.
//!
//! Applied as `calibrated = raw - bias` on every axis.
//! Units: gyro_bias deg/s, accel_offset m/s², magnetometer_bias µT.

pub mod manager;
pub mod store;

pub use manager::{CalibrationManager, CalibrationStatus, CollectionState};
pub use store::{CalibrationStore, JsonFileStore};

use serde_json::{json, Value};

use crate::types::{vec3_from_json, vec3_to_array, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub gyro_bias: Vec3,
    pub accel_offset: Vec3,
    pub magnetometer_bias: Vec3,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            gyro_bias: Vec3::zeros(),
            accel_offset: Vec3::zeros(),
            magnetometer_bias: Vec3::zeros(),
        }
    }
}

impl Calibration {
    pub fn apply_gyro(&self, gyro: &Vec3) -> Vec3 {
        gyro - self.gyro_bias
    }

    pub fn apply_accel(&self, accel: &Vec3) -> Vec3 {
        accel - self.accel_offset
    }

    pub fn apply_magnetometer(&self, magnetometer: &Vec3) -> Vec3 {
        magnetometer - self.magnetometer_bias
    }

    pub fn to_json(&self) -> Value {
        json!({
            "gyro_bias": vec3_to_array(&self.gyro_bias),
            "accel_offset": vec3_to_array(&self.accel_offset),
            "magnetometer_bias": vec3_to_array(&self.magnetometer_bias),
        })
    }

    /// Lenient inverse of [`Calibration::to_json`].
    ///
    /// A non-object gives the default. Each field that is missing or malformed
    /// falls back to zero on its own; unknown keys are ignored.
    pub fn from_json(data: &Value) -> Self {
        let Some(map) = data.as_object() else {
            return Self::default();
        };
        let field = |key: &str| map.get(key).and_then(vec3_from_json).unwrap_or_else(Vec3::zeros);
        Self {
            gyro_bias: field("gyro_bias"),
            accel_offset: field("accel_offset"),
            magnetometer_bias: field("magnetometer_bias"),
        }
    }
}
