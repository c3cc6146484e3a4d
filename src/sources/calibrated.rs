use std::sync::Arc;

use super::ImuSource;
use crate::calibration::CalibrationManager;
use crate::types::InertialSample;

/// Wraps an [`ImuSource`] and applies calibration to each sample.
///
/// Calibration is snapshotted on every read, so updates from the control
/// server take effect on the next sample. Raw gyro is handed to the manager
/// before correction so bias collection always sees uncorrected data.
pub struct CalibratedImuSource<S> {
    inner: S,
    manager: Arc<CalibrationManager>,
}

impl<S: ImuSource> CalibratedImuSource<S> {
    pub fn new(inner: S, manager: Arc<CalibrationManager>) -> Self {
        Self { inner, manager }
    }
}

impl<S: ImuSource> ImuSource for CalibratedImuSource<S> {
    fn read(&self) -> Option<InertialSample> {
        let raw = self.inner.read()?;
        self.manager.add_gyro_sample(raw.gyro);
        let cal = self.manager.get_calibration();
        Some(InertialSample {
            accel: cal.apply_accel(&raw.accel),
            gyro: cal.apply_gyro(&raw.gyro),
            magnetometer: raw.magnetometer.map(|m| cal.apply_magnetometer(&m)),
        })
    }
}
