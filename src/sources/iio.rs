//! Accelerometer, gyroscope and magnetometer from Linux IIO sysfs.
//!
//! Devices live under `/sys/bus/iio/devices/iio:deviceN`. Each axis is read as
//! `(in_<prefix>_<axis>_raw + in_<prefix>_<axis>_offset) * in_<prefix>_scale`,
//! giving m/s² for accel, deg/s for gyro and µT for magnetometer.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::Vec3;

pub const IIO_BASE: &str = "/sys/bus/iio/devices";

pub const ACCEL_PREFIX: &str = "in_accel";
pub const GYRO_PREFIX: &str = "in_anglvel";
pub const MAGN_PREFIX: &str = "in_magn";

const AXES: [&str; 3] = ["x", "y", "z"];
const RAD_TO_DEG: f64 = 57.29577951308232;
/// Gyro scales below this are in rad/s per LSB and get converted to deg/s.
const RADIAN_SCALE_LIMIT: f64 = 0.1;

/// Physical-unit readings from an on-device IMU.
pub trait DeviceReader: Send + Sync {
    fn read_accel(&self) -> Option<Vec3>;
    fn read_gyro(&self) -> Option<Vec3>;
    fn read_magnetometer(&self) -> Option<Vec3>;
}

fn read_value(path: &Path) -> Option<f64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn has_channels(device: &Path, prefix: &str) -> bool {
    AXES.iter()
        .all(|axis| device.join(format!("{}_{}_raw", prefix, axis)).exists())
        && device.join(format!("{}_scale", prefix)).exists()
}

/// All `iio:device*` directories under `base`, sorted by name.
pub fn discover_devices(base: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(base) else {
        return Vec::new();
    };
    let mut devices: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with("iio:device"))
        })
        .collect();
    devices.sort();
    devices
}

/// Locate a device exposing `prefix` channels.
///
/// Order: the explicit path (when valid), then `preferred` (e.g. the accel
/// device for a combo IMU), then the first match under `base`.
pub fn find_device(
    base: &Path,
    prefix: &str,
    explicit: Option<&Path>,
    preferred: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if has_channels(path, prefix) {
            return Some(path.to_path_buf());
        }
        warn!("{} path {} missing or invalid", prefix, path.display());
    }
    if let Some(path) = preferred {
        if has_channels(path, prefix) {
            return Some(path.to_path_buf());
        }
    }
    discover_devices(base)
        .into_iter()
        .find(|dev| has_channels(dev, prefix))
}

#[derive(Clone, Debug)]
struct Channel {
    device: PathBuf,
    prefix: &'static str,
    scale: f64,
    offset: [f64; 3],
}

impl Channel {
    fn open(device: PathBuf, prefix: &'static str) -> Self {
        let scale = read_value(&device.join(format!("{}_scale", prefix))).unwrap_or(1.0);
        let mut offset = [0.0; 3];
        for (slot, axis) in offset.iter_mut().zip(AXES) {
            *slot = read_value(&device.join(format!("{}_{}_offset", prefix, axis))).unwrap_or(0.0);
        }
        debug!("{} scale={} offset={:?}", prefix, scale, offset);
        Self {
            device,
            prefix,
            scale,
            offset,
        }
    }

    fn read(&self) -> Option<Vec3> {
        let mut values = [0.0; 3];
        for (i, axis) in AXES.iter().enumerate() {
            let raw = read_value(&self.device.join(format!("{}_{}_raw", self.prefix, axis)))?;
            values[i] = (raw + self.offset[i]) * self.scale;
        }
        Some(Vec3::from(values))
    }
}

/// IIO sysfs reader. Missing devices read as `None`.
#[derive(Clone, Debug, Default)]
pub struct IioReader {
    accel: Option<Channel>,
    gyro: Option<Channel>,
    magnetometer: Option<Channel>,
}

impl IioReader {
    pub fn new(
        accel_path: Option<PathBuf>,
        gyro_path: Option<PathBuf>,
        magnetometer_path: Option<PathBuf>,
    ) -> Self {
        Self {
            accel: accel_path.map(|p| Channel::open(p, ACCEL_PREFIX)),
            gyro: gyro_path.map(|p| Channel::open(p, GYRO_PREFIX)),
            magnetometer: magnetometer_path.map(|p| Channel::open(p, MAGN_PREFIX)),
        }
    }

    /// Discover accel + gyro (required) and magnetometer (optional) under `base`.
    pub fn discover(
        base: &Path,
        accel: Option<&Path>,
        gyro: Option<&Path>,
        magnetometer: Option<&Path>,
    ) -> Option<Self> {
        let accel_path = find_device(base, ACCEL_PREFIX, accel, None)?;
        let gyro_path = find_device(base, GYRO_PREFIX, gyro, Some(&accel_path))?;
        let magnetometer_path = find_device(base, MAGN_PREFIX, magnetometer, Some(&accel_path));
        if let Some(path) = &magnetometer_path {
            log::info!("Magnetometer found at {}", path.display());
        }
        Some(Self::new(Some(accel_path), Some(gyro_path), magnetometer_path))
    }
}

impl DeviceReader for IioReader {
    fn read_accel(&self) -> Option<Vec3> {
        self.accel.as_ref()?.read()
    }

    fn read_gyro(&self) -> Option<Vec3> {
        let channel = self.gyro.as_ref()?;
        let value = channel.read()?;
        if channel.scale < RADIAN_SCALE_LIMIT {
            Some(value * RAD_TO_DEG)
        } else {
            Some(value)
        }
    }

    fn read_magnetometer(&self) -> Option<Vec3> {
        self.magnetometer.as_ref()?.read()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calibration::store::tests::temp_path;
    use approx::assert_relative_eq;

    pub(crate) fn write_channels(device: &Path, prefix: &str, raw: [f64; 3], scale: f64) {
        fs::create_dir_all(device).unwrap();
        for (axis, value) in AXES.iter().zip(raw) {
            fs::write(device.join(format!("{}_{}_raw", prefix, axis)), format!("{}\n", value))
                .unwrap();
        }
        fs::write(device.join(format!("{}_scale", prefix)), format!("{}\n", scale)).unwrap();
    }

    #[test]
    fn test_discover_combo_device() {
        let base = temp_path("iio");
        let dev0 = base.join("iio:device0");
        let dev1 = base.join("iio:device1");
        write_channels(&dev0, MAGN_PREFIX, [1.0, 2.0, 3.0], 0.5);
        write_channels(&dev1, ACCEL_PREFIX, [0.0, 0.0, 1000.0], 0.00981);
        write_channels(&dev1, GYRO_PREFIX, [10.0, 0.0, 0.0], 1.0);
        fs::write(dev1.join("in_accel_z_offset"), "-10\n").unwrap();

        let reader = IioReader::discover(&base, None, None, None).unwrap();
        assert_relative_eq!(reader.read_accel().unwrap(), Vec3::new(0.0, 0.0, 990.0 * 0.00981));
        assert_eq!(reader.read_gyro().unwrap(), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(reader.read_magnetometer().unwrap(), Vec3::new(0.5, 1.0, 1.5));
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn test_radian_gyro_converted() {
        let base = temp_path("iio-rad");
        let dev = base.join("iio:device0");
        write_channels(&dev, ACCEL_PREFIX, [0.0, 0.0, 1.0], 1.0);
        write_channels(&dev, GYRO_PREFIX, [1000.0, 0.0, 0.0], 0.001);

        let reader = IioReader::discover(&base, None, None, None).unwrap();
        assert_relative_eq!(reader.read_gyro().unwrap().x, RAD_TO_DEG, epsilon = 1e-9);
        assert!(reader.read_magnetometer().is_none());
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn test_missing_gyro_means_no_reader() {
        let base = temp_path("iio-nogyro");
        write_channels(&base.join("iio:device0"), ACCEL_PREFIX, [0.0; 3], 1.0);
        assert!(IioReader::discover(&base, None, None, None).is_none());
        assert!(discover_devices(&base.join("absent")).is_empty());
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn test_vanished_device_reads_none() {
        let base = temp_path("iio-gone");
        let dev = base.join("iio:device0");
        write_channels(&dev, ACCEL_PREFIX, [0.0; 3], 1.0);
        write_channels(&dev, GYRO_PREFIX, [0.0; 3], 1.0);
        let reader = IioReader::discover(&base, None, None, None).unwrap();
        fs::remove_dir_all(&base).unwrap();
        assert!(reader.read_accel().is_none());
        assert!(reader.read_gyro().is_none());
    }
}
