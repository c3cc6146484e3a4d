pub mod linalg;

pub use linalg::*;

/// One inertial reading: accel m/s², gyro deg/s, magnetometer µT.
///
/// `magnetometer: None` means the sensor is absent, which is not the same as a
/// zero reading. Calibration never touches an absent field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InertialSample {
    pub accel: Vec3,
    pub gyro: Vec3,
    pub magnetometer: Option<Vec3>,
}

impl InertialSample {
    pub fn new(accel: Vec3, gyro: Vec3) -> Self {
        Self {
            accel,
            gyro,
            magnetometer: None,
        }
    }

    pub fn with_magnetometer(mut self, magnetometer: Vec3) -> Self {
        self.magnetometer = Some(magnetometer);
        self
    }
}

/// Fix quality as reported by the positioning receiver.
pub const MODE_NO_FIX: i32 = 0;
pub const MODE_2D: i32 = 1;
pub const MODE_3D: i32 = 2;

#[derive(Clone, Debug, PartialEq)]
pub struct PositionFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed_ms: f64,
    pub track: f64,
    pub valid: bool,
    pub mode: i32,
    pub time_iso: Option<String>,
}

impl PositionFix {
    /// Placeholder reported while the receiver has no fix.
    pub fn no_fix() -> Self {
        Self {
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            speed_ms: 0.0,
            track: 0.0,
            valid: false,
            mode: MODE_NO_FIX,
            time_iso: None,
        }
    }

    /// True when the fix carries geometry that may be encoded.
    pub fn is_usable(&self) -> bool {
        self.valid && self.mode >= MODE_2D
    }
}
