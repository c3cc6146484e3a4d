//! Fixed-rate fusion loop: IMU ticks feed the estimator, output ticks
//! encode the latest fix with the fused heading and broadcast it.

use log::{debug, info};
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::filters::OrientationEstimator;
use crate::health_monitor::SourceHealth;
use crate::nmea::fix_to_sentences;
use crate::server::BroadcastServer;
use crate::sources::{ImuSource, PositionSource};
use crate::types::PositionFix;

const MAX_WAIT: Duration = Duration::from_millis(100);

pub struct Scheduler {
    imu: Box<dyn ImuSource>,
    position: Option<Box<dyn PositionSource>>,
    estimator: Box<dyn OrientationEstimator>,
    broadcast: BroadcastServer,
    imu_period: Duration,
    output_period: Duration,
    current_fix: Option<PositionFix>,
    health: SourceHealth,
}

impl Scheduler {
    pub fn new(
        imu: Box<dyn ImuSource>,
        position: Option<Box<dyn PositionSource>>,
        estimator: Box<dyn OrientationEstimator>,
        broadcast: BroadcastServer,
        imu_period: Duration,
        output_period: Duration,
    ) -> Self {
        Self {
            imu,
            position,
            estimator,
            broadcast,
            imu_period,
            output_period,
            current_fix: None,
            health: SourceHealth::new(Instant::now()),
        }
    }

    pub fn broadcast(&self) -> &BroadcastServer {
        &self.broadcast
    }

    /// Fused heading, or 0 before the estimator has seen a sample.
    pub fn heading_deg(&self) -> f64 {
        if self.estimator.initialized() {
            self.estimator.yaw_deg()
        } else {
            0.0
        }
    }

    /// Read one calibrated sample and feed it to the estimator.
    pub fn imu_tick(&mut self) -> bool {
        let Some(sample) = self.imu.read() else {
            return false;
        };
        self.estimator
            .update(&sample.accel, &sample.gyro, self.imu_period.as_secs_f64());
        self.health.imu.update(Instant::now());
        true
    }

    /// Refresh the fix (keeping the previous one when the source has
    /// nothing) and encode it.
    pub fn output_sentences(&mut self) -> Option<(String, String)> {
        if let Some(fix) = self.position.as_ref().and_then(|p| p.get_fix()) {
            if fix.is_usable() {
                self.health.position.update(Instant::now());
            }
            self.current_fix = Some(fix);
        }
        let fix = self.current_fix.as_ref()?;
        fix_to_sentences(fix, self.heading_deg(), None)
    }

    pub async fn output_tick(&mut self) -> usize {
        let Some((gga, rmc)) = self.output_sentences() else {
            return 0;
        };
        self.broadcast.send(&gga).await;
        self.broadcast.send(&rmc).await
    }

    /// Run until `cancel` fires, then close all NMEA clients.
    pub async fn run(mut self, cancel: CancellationToken) {
        let wait = self.imu_period.min(self.output_period).min(MAX_WAIT);
        let mut last_imu = Instant::now();
        let mut last_output: Option<Instant> = None;
        info!(
            "Fusion loop running: IMU every {:?}, output every {:?}",
            self.imu_period, self.output_period
        );

        while !cancel.is_cancelled() {
            let now = Instant::now();

            // More than one period behind: resync so at most one tick runs.
            if now.saturating_duration_since(last_imu) > self.imu_period {
                last_imu = now.checked_sub(self.imu_period).unwrap_or(now);
            }
            while now.saturating_duration_since(last_imu) >= self.imu_period
                && !cancel.is_cancelled()
            {
                self.imu_tick();
                last_imu += self.imu_period;
            }

            let output_due = last_output
                .map_or(true, |t| now.saturating_duration_since(t) >= self.output_period);
            if output_due {
                last_output = Some(now);
                self.output_tick().await;
            }

            if self.health.poll(now).is_some() {
                debug!(
                    "{} | NMEA clients: {}",
                    self.health.format_status(now),
                    self.broadcast.client_count().await
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.broadcast.accept() => match accepted {
                    Ok((stream, peer)) => self.broadcast.add_client(stream, peer).await,
                    Err(e) => debug!("NMEA accept error: {}", e),
                },
                _ = sleep(wait) => {}
            }
        }

        self.broadcast.close().await;
        info!("Fusion loop stopped");
    }
}
