use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use navfuse::calibration::{Calibration, CalibrationManager, JsonFileStore};
use navfuse::filters::ComplementaryAhrs;
use navfuse::scheduler::Scheduler;
use navfuse::server::{BroadcastServer, ControlServer};
use navfuse::sources::iio::IIO_BASE;
use navfuse::sources::telemetry::TelemetryServer;
use navfuse::sources::{create_linux_sources, CalibratedImuSource, ImuSource, PositionSource};
use navfuse::{Config, NavError, SourceMode};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct Sources {
    imu: Box<dyn ImuSource>,
    position: Box<dyn PositionSource>,
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn open_linux(
    config: &Config,
    cancel: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> navfuse::Result<Sources> {
    let linux = create_linux_sources(config, Path::new(IIO_BASE), cancel.clone())?;
    tasks.push(linux.gpsd_task);
    Ok(Sources {
        imu: Box::new(linux.imu),
        position: Box::new(linux.position),
    })
}

async fn open_remote(
    config: &Config,
    cancel: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> navfuse::Result<Sources> {
    let server = TelemetryServer::bind(&config.remote_host, config.remote_port).await?;
    let source = server.source();
    tasks.push(server.spawn(cancel.clone()));
    Ok(Sources {
        imu: Box::new(source.clone()),
        position: Box::new(source),
    })
}

async fn open_sources(
    config: &Config,
    cancel: &CancellationToken,
    tasks: &mut Vec<JoinHandle<()>>,
) -> navfuse::Result<Sources> {
    match config.source {
        SourceMode::Linux => open_linux(config, cancel, tasks).await.map_err(|e| {
            if let NavError::NoDevice(_) = e {
                warn!("Use --source remote to take IMU and GPS from a phone");
            }
            e
        }),
        SourceMode::Remote => open_remote(config, cancel, tasks).await,
        SourceMode::Auto => match open_linux(config, cancel, tasks).await {
            Ok(sources) => {
                info!("Using Linux source (IIO + gpsd)");
                Ok(sources)
            }
            Err(e) => {
                info!("Linux source unavailable ({}), waiting for a remote client", e);
                open_remote(config, cancel, tasks).await
            }
        },
    }
}

fn calibration_manager(config: &Config) -> CalibrationManager {
    match &config.calibration_file {
        Some(path) => {
            info!("Calibration file: {}", path.display());
            CalibrationManager::with_store(Box::new(JsonFileStore::new(path)))
        }
        None => CalibrationManager::new(Calibration::default()),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    let count = tasks.len();
    let joined = timeout(SHUTDOWN_GRACE, async {
        for task in tasks {
            let _ = task.await;
        }
    })
    .await;
    if joined.is_err() {
        warn!("Background tasks ({}) did not stop within {:?}", count, SHUTDOWN_GRACE);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.debug);
    config.validate()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown requested");
            cancel.cancel();
        });
    }

    let mut tasks = Vec::new();
    let sources = match open_sources(&config, &cancel, &mut tasks).await {
        Ok(sources) => sources,
        Err(e) => {
            cancel.cancel();
            join_tasks(tasks).await;
            return Err(e).context("no usable IMU/position source");
        }
    };

    let manager = Arc::new(calibration_manager(&config));
    let imu = CalibratedImuSource::new(sources.imu, Arc::clone(&manager));

    if config.calibration_enabled() {
        match ControlServer::bind(config.calibration_port, Arc::clone(&manager), config.imu_rate_hz)
            .await
        {
            Ok(server) => tasks.push(server.spawn(cancel.clone())),
            Err(e) => warn!("{}; continuing without calibration API", e),
        }
    }

    let broadcast = match BroadcastServer::bind(&config.nmea_host, config.nmea_port).await {
        Ok(server) => server,
        Err(e) => {
            cancel.cancel();
            join_tasks(tasks).await;
            return Err(e).context("NMEA output unavailable");
        }
    };

    info!(
        "navfuse running: IMU {} Hz, NMEA {} Hz on {}:{}",
        config.imu_rate_hz, config.output_rate_hz, config.nmea_host, config.nmea_port
    );

    let scheduler = Scheduler::new(
        Box::new(imu),
        Some(sources.position),
        Box::new(ComplementaryAhrs::new(config.fusion_gain)),
        broadcast,
        config.imu_period(),
        config.output_period(),
    );
    scheduler.run(cancel.clone()).await;

    cancel.cancel();
    join_tasks(tasks).await;
    info!("navfuse stopped");
    Ok(())
}
