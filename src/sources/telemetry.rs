//! Remote telemetry ingestion: a TCP server fed newline-delimited JSON by a
//! phone app or any other client.
//!
//! Each line is an independent partial update:
//! - IMU: `{"accel":[x,y,z],"gyro":[x,y,z]}` (m/s², deg/s)
//! - Position: `{"lat":..,"lon":..,"alt":..,"speed_ms":..,"track":..,"time_iso":".."}`
//! - Both in one object.
//!
//! Nothing is sent back. Bad lines are dropped without closing the connection.

use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::{ImuSource, PositionSource};
use crate::error::{NavError, Result};
use crate::server::lines::{read_line_bounded, LineRead, MAX_LINE_BYTES};
use crate::types::{number_from_json, vec3_from_json, InertialSample, PositionFix, Vec3, MODE_3D};

/// Idle clients are dropped after this long without a line.
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Latest {
    imu: Option<(Vec3, Vec3)>,
    fix: Option<PositionFix>,
}

/// Latest IMU sample and fix received from the remote client.
///
/// Cheap to clone; all clones share one state. A single lock guards both
/// values so one message is applied atomically.
#[derive(Clone, Default)]
pub struct TelemetrySource {
    latest: Arc<Mutex<Latest>>,
}

fn parse_imu(data: &Map<String, Value>) -> Option<(Vec3, Vec3)> {
    let accel = data.get("accel").and_then(vec3_from_json)?;
    let gyro = data.get("gyro").and_then(vec3_from_json)?;
    Some((accel, gyro))
}

fn parse_fix(data: &Map<String, Value>) -> Option<PositionFix> {
    let lat = data.get("lat").and_then(number_from_json)?;
    let lon = data.get("lon").and_then(number_from_json)?;
    let optional = |key: &str| data.get(key).and_then(number_from_json).unwrap_or(0.0);
    Some(PositionFix {
        lat,
        lon,
        alt: optional("alt"),
        speed_ms: optional("speed_ms"),
        track: optional("track"),
        valid: true,
        mode: MODE_3D,
        time_iso: data.get("time_iso").and_then(Value::as_str).map(str::to_string),
    })
}

impl TelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn latest(&self) -> MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one protocol line. Returns true if anything was stored.
    pub fn apply_line(&self, line: &str) -> bool {
        let Ok(Value::Object(data)) = serde_json::from_str::<Value>(line) else {
            return false;
        };
        let imu = parse_imu(&data);
        let fix = parse_fix(&data);
        if imu.is_none() && fix.is_none() {
            return false;
        }
        let mut latest = self.latest();
        if imu.is_some() {
            latest.imu = imu;
        }
        if fix.is_some() {
            latest.fix = fix;
        }
        true
    }
}

impl ImuSource for TelemetrySource {
    fn read(&self) -> Option<InertialSample> {
        let (accel, gyro) = self.latest().imu?;
        Some(InertialSample::new(accel, gyro))
    }
}

impl PositionSource for TelemetrySource {
    fn get_fix(&self) -> Option<PositionFix> {
        self.latest().fix.clone()
    }
}

/// Listener half of the ingestion protocol. Serves one client at a time.
pub struct TelemetryServer {
    listener: TcpListener,
    source: TelemetrySource,
}

impl TelemetryServer {
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| NavError::bind("Remote source", &addr, e))?;
        info!("Remote source listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            source: TelemetrySource::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn source(&self) -> TelemetrySource {
        self.source.clone()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    info!("Remote client connected from {}", peer);
                    serve_client(stream, &self.source, &cancel).await;
                    info!("Remote client {} disconnected", peer);
                }
                Err(e) => {
                    warn!("Remote accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("Remote source stopped");
    }
}

async fn serve_client(stream: TcpStream, source: &TelemetrySource, cancel: &CancellationToken) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = timeout(CLIENT_READ_TIMEOUT, read_line_bounded(&mut reader, &mut buf, MAX_LINE_BYTES)) => read,
        };
        match read {
            Ok(Ok(LineRead::Eof)) => return,
            Ok(Ok(LineRead::TooLong)) => debug!("Remote line over {} bytes dropped", MAX_LINE_BYTES),
            Ok(Ok(LineRead::Line)) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() && !source.apply_line(line) {
                    debug!("Remote line ignored");
                }
            }
            Ok(Err(e)) => {
                debug!("Remote client error: {}", e);
                return;
            }
            Err(_) => {
                debug!("Remote client idle for {:?}", CLIENT_READ_TIMEOUT);
                return;
            }
        }
    }
}
