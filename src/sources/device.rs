//! Linux sources: IIO sysfs for the IMU, gpsd for position.

use log::info;
use std::path::Path;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::gpsd::{GpsdReader, PositionReader};
use super::iio::{DeviceReader, IioReader};
use super::{ImuSource, PositionSource};
use crate::config::Config;
use crate::error::{NavError, Result};
use crate::types::{InertialSample, PositionFix};

/// IMU backed by a [`DeviceReader`]. Needs accel and gyro; magnetometer is optional.
pub struct DeviceImuSource<R> {
    reader: R,
}

impl<R: DeviceReader> DeviceImuSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: DeviceReader> ImuSource for DeviceImuSource<R> {
    fn read(&self) -> Option<InertialSample> {
        let accel = self.reader.read_accel()?;
        let gyro = self.reader.read_gyro()?;
        Some(InertialSample {
            accel,
            gyro,
            magnetometer: self.reader.read_magnetometer(),
        })
    }
}

/// Position backed by a [`PositionReader`].
pub struct DevicePositionSource<P> {
    reader: P,
}

impl<P: PositionReader> DevicePositionSource<P> {
    pub fn new(reader: P) -> Self {
        Self { reader }
    }
}

impl<P: PositionReader> PositionSource for DevicePositionSource<P> {
    fn get_fix(&self) -> Option<PositionFix> {
        self.reader.get_current_fix()
    }
}

pub struct LinuxSources {
    pub imu: DeviceImuSource<IioReader>,
    pub position: DevicePositionSource<GpsdReader>,
    pub gpsd_task: JoinHandle<()>,
}

/// Build IIO + gpsd sources. Fails when no accel or gyro device exists.
///
/// gpsd is not required to be up: until it answers, fixes are `None`.
pub fn create_linux_sources(
    config: &Config,
    iio_base: &Path,
    cancel: CancellationToken,
) -> Result<LinuxSources> {
    let reader = IioReader::discover(
        iio_base,
        config.accel_path.as_deref(),
        config.gyro_path.as_deref(),
        config.magnetometer_path.as_deref(),
    )
    .ok_or_else(|| NavError::NoDevice("IIO accel or gyro not found".to_string()))?;
    info!("Using IIO sensors under {}", iio_base.display());

    let (gpsd, gpsd_task) = GpsdReader::spawn(&config.gpsd_host, config.gpsd_port, cancel);
    Ok(LinuxSources {
        imu: DeviceImuSource::new(reader),
        position: DevicePositionSource::new(gpsd),
        gpsd_task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vec3;

    struct StubReader {
        accel: Option<Vec3>,
        gyro: Option<Vec3>,
        magnetometer: Option<Vec3>,
    }

    impl DeviceReader for StubReader {
        fn read_accel(&self) -> Option<Vec3> {
            self.accel
        }
        fn read_gyro(&self) -> Option<Vec3> {
            self.gyro
        }
        fn read_magnetometer(&self) -> Option<Vec3> {
            self.magnetometer
        }
    }

    #[test]
    fn test_sample_needs_accel_and_gyro() {
        let source = DeviceImuSource::new(StubReader {
            accel: Some(Vec3::new(0.0, 0.0, 9.81)),
            gyro: None,
            magnetometer: Some(Vec3::zeros()),
        });
        assert!(source.read().is_none());

        let source = DeviceImuSource::new(StubReader {
            accel: None,
            gyro: Some(Vec3::zeros()),
            magnetometer: None,
        });
        assert!(source.read().is_none());
    }

    #[test]
    fn test_magnetometer_optional() {
        let source = DeviceImuSource::new(StubReader {
            accel: Some(Vec3::new(0.0, 0.0, 9.81)),
            gyro: Some(Vec3::new(0.1, 0.0, 0.0)),
            magnetometer: None,
        });
        let sample = source.read().unwrap();
        assert_eq!(sample.gyro, Vec3::new(0.1, 0.0, 0.0));
        assert!(sample.magnetometer.is_none());
    }

    #[tokio::test]
    async fn test_linux_sources_require_imu() {
        let base = crate::calibration::store::tests::temp_path("linux-none");
        let config = Config::default();
        let cancel = CancellationToken::new();
        assert!(create_linux_sources(&config, &base, cancel).is_err());
    }

    #[tokio::test]
    async fn test_linux_sources_from_sysfs() {
        use crate::sources::iio::tests::write_channels;
        use crate::sources::iio::{ACCEL_PREFIX, GYRO_PREFIX};

        let base = crate::calibration::store::tests::temp_path("linux-ok");
        let dev = base.join("iio:device0");
        write_channels(&dev, ACCEL_PREFIX, [0.0, 0.0, 9.0], 1.0);
        write_channels(&dev, GYRO_PREFIX, [1.0, 2.0, 3.0], 1.0);

        let mut config = Config::default();
        // Nothing listens here; the gpsd task just keeps retrying.
        config.gpsd_port = 1;
        let cancel = CancellationToken::new();
        let sources = create_linux_sources(&config, &base, cancel.clone()).unwrap();
        let sample = sources.imu.read().unwrap();
        assert_eq!(sample.accel, Vec3::new(0.0, 0.0, 9.0));
        assert_eq!(sample.gyro, Vec3::new(1.0, 2.0, 3.0));
        assert!(sources.position.get_fix().is_none());

        cancel.cancel();
        let _ = sources.gpsd_task.await;
        let _ = std::fs::remove_dir_all(base);
    }
}
