//! Line-delimited JSON control API for calibration.
//!
//! ```text
//! -> {"get_calibration": true}
//! <- {"gyro_bias":[..],"accel_offset":[..],"magnetometer_bias":[..],"status":"idle",...}
//! -> {"set_calibration": {"gyro_bias": [0.1, 0.0, -0.2]}}
//! <- {"ok":true}
//! -> {"calibrate_gyro": {"seconds": 5}}
//! <- {"status":"collecting","samples_needed":500}
//! ```

use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::calibration::manager::DEFAULT_COLLECTION_SECS;
use crate::calibration::CalibrationManager;
use crate::error::{NavError, Result};
use super::lines::{read_line_bounded, LineRead, MAX_LINE_BYTES};
use crate::types::{number_from_json, vec3_from_json, Vec3};

pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_secs(10);

const CALIBRATION_FIELDS: [&str; 3] = ["gyro_bias", "accel_offset", "magnetometer_bias"];

fn error(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

/// JSON truthiness: false, null, 0, "" and empty containers are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn set_calibration(manager: &CalibrationManager, fields: &Map<String, Value>) -> Value {
    let mut parsed: [Option<Vec3>; 3] = [None; 3];
    for (slot, name) in parsed.iter_mut().zip(CALIBRATION_FIELDS) {
        match fields.get(name) {
            None | Some(Value::Null) => {}
            Some(value) => match vec3_from_json(value) {
                Some(v) => *slot = Some(v),
                None => return error(format!("{} must be [x,y,z]", name)),
            },
        }
    }
    let [gyro_bias, accel_offset, magnetometer_bias] = parsed;
    manager.set_calibration(gyro_bias, accel_offset, magnetometer_bias);
    json!({ "ok": true })
}

fn calibrate_gyro(
    manager: &CalibrationManager,
    params: &Map<String, Value>,
    sample_rate_hz: f64,
) -> Value {
    let seconds = match params.get("seconds") {
        None | Some(Value::Null) => DEFAULT_COLLECTION_SECS,
        Some(value) => match number_from_json(value) {
            Some(s) => s,
            None => return error("seconds must be a number"),
        },
    };
    let needed = manager.start_gyro_calibration(seconds, sample_rate_hz);
    json!({ "status": "collecting", "samples_needed": needed })
}

/// Dispatch one decoded request. The first matching key wins.
pub fn handle_request(manager: &CalibrationManager, request: &Value, sample_rate_hz: f64) -> Value {
    let Some(request) = request.as_object() else {
        return error("invalid request");
    };

    if request.get("get_calibration").map_or(false, is_truthy) {
        return serde_json::to_value(manager.get_status())
            .unwrap_or_else(|e| error(format!("status unavailable: {}", e)));
    }

    if let Some(value) = request.get("set_calibration") {
        return match value.as_object() {
            Some(fields) => set_calibration(manager, fields),
            None => error("set_calibration must be an object"),
        };
    }

    if let Some(value) = request.get("calibrate_gyro") {
        return match value.as_object() {
            Some(params) => calibrate_gyro(manager, params, sample_rate_hz),
            None => error("calibrate_gyro must be an object"),
        };
    }

    error("unknown request")
}

/// Decode and dispatch one raw request line.
pub fn handle_line(manager: &CalibrationManager, line: &str, sample_rate_hz: f64) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(request) => handle_request(manager, &request, sample_rate_hz),
        Err(_) => error("invalid JSON"),
    }
}

/// Loopback control server. Each client gets its own task.
pub struct ControlServer {
    listener: TcpListener,
    manager: Arc<CalibrationManager>,
    sample_rate_hz: f64,
}

impl ControlServer {
    pub async fn bind(
        port: u16,
        manager: Arc<CalibrationManager>,
        sample_rate_hz: f64,
    ) -> Result<Self> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| NavError::bind("Calibration API", &addr, e))?;
        info!("Calibration API listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            manager,
            sample_rate_hz,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
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
                    debug!("Calibration client {} connected", peer);
                    let manager = Arc::clone(&self.manager);
                    let cancel = cancel.clone();
                    let rate = self.sample_rate_hz;
                    tokio::spawn(async move {
                        serve_client(stream, &manager, rate, &cancel).await;
                        debug!("Calibration client {} disconnected", peer);
                    });
                }
                Err(e) => {
                    warn!("Calibration accept error: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("Calibration API stopped");
    }
}

async fn serve_client(
    stream: TcpStream,
    manager: &CalibrationManager,
    sample_rate_hz: f64,
    cancel: &CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = timeout(CLIENT_READ_TIMEOUT, read_line_bounded(&mut reader, &mut buf, MAX_LINE_BYTES)) => read,
        };
        let response = match read {
            Ok(Ok(LineRead::Eof)) => return,
            Ok(Ok(LineRead::TooLong)) => {
                debug!("Calibration request over {} bytes dropped", MAX_LINE_BYTES);
                error("invalid JSON")
            }
            Ok(Ok(LineRead::Line)) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                handle_line(manager, line, sample_rate_hz)
            }
            Ok(Err(e)) => {
                debug!("Calibration client error: {}", e);
                return;
            }
            Err(_) => {
                debug!("Calibration client idle for {:?}", CLIENT_READ_TIMEOUT);
                return;
            }
        };

        let mut out = response.to_string();
        out.push('\n');
        match timeout(CLIENT_READ_TIMEOUT, write_half.write_all(out.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Calibration client write failed: {}", e);
                return;
            }
            Err(_) => {
                debug!("Calibration client write timed out");
                return;
            }
        }
    }
}
