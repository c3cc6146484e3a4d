use log::{info, warn};
use tokio::time::{Duration, Instant};

pub const IMU_SILENCE: Duration = Duration::from_secs(5);
pub const POSITION_SILENCE: Duration = Duration::from_secs(30);
pub const CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Tracks arrivals for one input and whether it is currently silent.
#[derive(Clone, Debug)]
pub struct SensorHealth {
    pub name: &'static str,
    pub silence_threshold: Duration,
    last_update: Instant,
    silent: bool,
}

impl SensorHealth {
    pub fn new(name: &'static str, silence_threshold: Duration, now: Instant) -> Self {
        SensorHealth {
            name,
            silence_threshold,
            last_update: now,
            silent: false,
        }
    }

    pub fn update(&mut self, now: Instant) {
        self.last_update = now;
    }

    pub fn time_since_last_update(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_update)
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Re-evaluate silence; logs only when the state flips.
    fn check(&mut self, now: Instant) -> bool {
        let quiet = self.time_since_last_update(now);
        let silent = quiet > self.silence_threshold;
        if silent && !self.silent {
            warn!("{} silent for {:.1}s", self.name, quiet.as_secs_f64());
        } else if !silent && self.silent {
            info!("{} recovered", self.name);
        }
        self.silent = silent;
        silent
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthReport {
    pub imu_healthy: bool,
    pub position_healthy: bool,
}

/// Watchdog over the IMU and position inputs, driven by the scheduler.
pub struct SourceHealth {
    pub imu: SensorHealth,
    pub position: SensorHealth,
    check_interval: Duration,
    last_check: Instant,
}

impl SourceHealth {
    pub fn new(now: Instant) -> Self {
        SourceHealth {
            imu: SensorHealth::new("IMU", IMU_SILENCE, now),
            position: SensorHealth::new("Position", POSITION_SILENCE, now),
            check_interval: CHECK_INTERVAL,
            last_check: now,
        }
    }

    /// Run a check when the interval has elapsed. Returns the report when one ran.
    pub fn poll(&mut self, now: Instant) -> Option<HealthReport> {
        if now.saturating_duration_since(self.last_check) < self.check_interval {
            return None;
        }
        self.last_check = now;
        Some(self.check_health(now))
    }

    pub fn check_health(&mut self, now: Instant) -> HealthReport {
        HealthReport {
            imu_healthy: !self.imu.check(now),
            position_healthy: !self.position.check(now),
        }
    }

    pub fn format_status(&self, now: Instant) -> String {
        let status = |sensor: &SensorHealth| {
            if sensor.is_silent() {
                format!(
                    "silent {:.1}s",
                    sensor.time_since_last_update(now).as_secs_f64()
                )
            } else {
                "ok".to_string()
            }
        };
        format!("IMU: {} | Position: {}", status(&self.imu), status(&self.position))
    }
}
