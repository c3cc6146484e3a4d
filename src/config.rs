use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{NavError, Result};

const DEFAULT_IMU_PERIOD: Duration = Duration::from_millis(10);
const DEFAULT_OUTPUT_PERIOD: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceMode {
    /// Local IIO sensors plus gpsd
    Linux,
    /// JSON lines pushed over TCP (phone, another host)
    Remote,
    /// Linux when an IMU is present, otherwise remote
    Auto,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "navfuse")]
#[command(about = "Fuse GPS and IMU into NMEA with heading for Navit", long_about = None)]
pub struct Config {
    /// Where IMU and position come from
    #[arg(long, value_enum, default_value = "linux")]
    pub source: SourceMode,

    /// Bind address for the remote source
    #[arg(long, default_value = "0.0.0.0")]
    pub remote_host: String,

    #[arg(long, default_value_t = 2949)]
    pub remote_port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    pub gpsd_host: String,

    #[arg(long, default_value_t = 2947)]
    pub gpsd_port: u16,

    /// Bind address for the NMEA TCP server
    #[arg(long, default_value = "127.0.0.1")]
    pub nmea_host: String,

    #[arg(long, default_value_t = 2948)]
    pub nmea_port: u16,

    /// IMU sample rate in Hz
    #[arg(long = "imu-rate", default_value_t = 100.0)]
    pub imu_rate_hz: f64,

    /// NMEA output rate in Hz
    #[arg(long = "output-rate", default_value_t = 5.0)]
    pub output_rate_hz: f64,

    /// AHRS fusion gain, 0-1
    #[arg(long, default_value_t = 0.5)]
    pub fusion_gain: f64,

    /// IIO sysfs device for the accelerometer (e.g. /sys/bus/iio/devices/iio:device0)
    #[arg(long)]
    pub accel_path: Option<PathBuf>,

    /// IIO sysfs device for the gyroscope (default: auto-detect)
    #[arg(long)]
    pub gyro_path: Option<PathBuf>,

    /// IIO sysfs device for the magnetometer (default: auto-detect)
    #[arg(long)]
    pub magnetometer_path: Option<PathBuf>,

    /// Load/save calibration from this JSON file
    #[arg(long)]
    pub calibration_file: Option<PathBuf>,

    /// TCP port for the calibration API on 127.0.0.1 (0 = disabled)
    #[arg(long, default_value_t = 0)]
    pub calibration_port: u16,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_from(["navfuse"])
    }
}

/// Tick period for a rate in Hz. `None` unless the period is a non-zero
/// `Duration`.
fn period_for(rate_hz: f64) -> Option<Duration> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [("imu-rate", self.imu_rate_hz), ("output-rate", self.output_rate_hz)] {
            if period_for(rate).is_none() {
                return Err(NavError::Config(format!(
                    "{} must be a positive rate with a representable period, got {}",
                    name, rate
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.fusion_gain) {
            return Err(NavError::Config(format!(
                "fusion-gain must be within 0-1, got {}",
                self.fusion_gain
            )));
        }
        Ok(())
    }

    /// IMU tick period. Meaningful only after `validate()` passed; an
    /// invalid rate falls back to the 100 Hz default.
    pub fn imu_period(&self) -> Duration {
        period_for(self.imu_rate_hz).unwrap_or(DEFAULT_IMU_PERIOD)
    }

    /// NMEA output period, with the 5 Hz default as fallback.
    pub fn output_period(&self) -> Duration {
        period_for(self.output_rate_hz).unwrap_or(DEFAULT_OUTPUT_PERIOD)
    }

    pub fn calibration_enabled(&self) -> bool {
        self.calibration_port > 0
    }
}
