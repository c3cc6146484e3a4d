//! Pluggable data sources for IMU and position.
//!
//! - `linux`: IIO sysfs + gpsd
//! - `remote`: TCP telemetry ingestion from a phone or any other client
//!
//! Both kinds are non-blocking: a read returns the latest data or `None`.

pub mod calibrated;
pub mod device;
pub mod gpsd;
pub mod iio;
pub mod telemetry;

pub use calibrated::CalibratedImuSource;
pub use device::{create_linux_sources, DeviceImuSource, DevicePositionSource};
pub use gpsd::GpsdReader;
pub use iio::IioReader;
pub use telemetry::TelemetrySource;

use crate::types::{InertialSample, PositionFix};

/// Source of accelerometer + gyroscope (+ magnetometer) samples.
pub trait ImuSource: Send {
    /// Latest sample in m/s², deg/s and µT, or `None` if nothing is available.
    fn read(&self) -> Option<InertialSample>;
}

/// Source of position and velocity fixes.
pub trait PositionSource: Send {
    fn get_fix(&self) -> Option<PositionFix>;
}

impl<T: ImuSource + ?Sized> ImuSource for Box<T> {
    fn read(&self) -> Option<InertialSample> {
        (**self).read()
    }
}

impl<T: PositionSource + ?Sized> PositionSource for Box<T> {
    fn get_fix(&self) -> Option<PositionFix> {
        (**self).get_fix()
    }
}

impl<T: ImuSource + Sync> ImuSource for std::sync::Arc<T> {
    fn read(&self) -> Option<InertialSample> {
        (**self).read()
    }
}

impl<T: PositionSource + Sync> PositionSource for std::sync::Arc<T> {
    fn get_fix(&self) -> Option<PositionFix> {
        (**self).get_fix()
    }
}
