//! Position and velocity from a gpsd daemon over its JSON socket protocol.
//!
//! A background task keeps a `?WATCH` session open and stores the latest TPV
//! report. Readers never block: they get whatever fix arrived last, or `None`
//! while gpsd is unreachable.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::types::{PositionFix, MODE_NO_FIX};

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true}\n";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BASE_RETRY: Duration = Duration::from_secs(2);
const MAX_RETRY: Duration = Duration::from_secs(30);
/// gpsd goes quiet for ~1 s between TPV reports; far longer means it hung.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Supplier of the receiver's current fix.
pub trait PositionReader: Send + Sync {
    fn get_current_fix(&self) -> Option<PositionFix>;
}

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: i32,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(rename = "altHAE")]
    alt_hae: Option<f64>,
    alt: Option<f64>,
    speed: Option<f64>,
    track: Option<f64>,
    time: Option<String>,
}

/// Normalise a gpsd timestamp to `YYYY-MM-DDTHH:MM:SSZ` in UTC.
fn normalize_time(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Parse one gpsd JSON line. Non-TPV reports yield `None`.
///
/// gpsd counts modes as 0 unknown, 1 no fix, 2 2D, 3 3D; the daemon uses
/// 0 none, 1 2D, 2 3D.
pub fn parse_report(line: &str) -> Option<PositionFix> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" {
        return None;
    }
    let mode = (report.mode - 1).max(MODE_NO_FIX);
    let (Some(lat), Some(lon)) = (report.lat, report.lon) else {
        return Some(PositionFix::no_fix());
    };
    if mode == MODE_NO_FIX {
        return Some(PositionFix::no_fix());
    }
    Some(PositionFix {
        lat,
        lon,
        alt: report.alt_hae.or(report.alt).unwrap_or(0.0),
        speed_ms: report.speed.unwrap_or(0.0),
        track: report.track.unwrap_or(0.0),
        valid: true,
        mode,
        time_iso: report.time.as_deref().map(normalize_time),
    })
}

/// Latest fix from gpsd, refreshed by a background task.
#[derive(Clone, Default)]
pub struct GpsdReader {
    latest: Arc<Mutex<Option<PositionFix>>>,
}

impl GpsdReader {
    /// Start the watcher task for `host:port`; it runs until `cancel` fires.
    pub fn spawn(host: &str, port: u16, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let reader = Self::default();
        let addr = format!("{}:{}", host, port);
        let handle = tokio::spawn(watch_loop(addr, reader.clone(), cancel));
        (reader, handle)
    }

    fn store(&self, fix: Option<PositionFix>) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = fix;
        }
    }
}

impl PositionReader for GpsdReader {
    fn get_current_fix(&self) -> Option<PositionFix> {
        self.latest.lock().ok().and_then(|f| f.clone())
    }
}

async fn watch_loop(addr: String, reader: GpsdReader, cancel: CancellationToken) {
    let mut retry = BASE_RETRY;
    while !cancel.is_cancelled() {
        match timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                info!("Connected to gpsd at {}", addr);
                retry = BASE_RETRY;
                if let Err(e) = watch_session(stream, &reader, &cancel).await {
                    debug!("gpsd session ended: {}", e);
                }
                reader.store(None);
            }
            Ok(Err(e)) => warn!("gpsd connect failed {}: {}", addr, e),
            Err(_) => warn!("gpsd connect to {} timed out", addr),
        }
        if cancel.is_cancelled() {
            break;
        }
        debug!("gpsd reconnect in {:.1}s", retry.as_secs_f64());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(retry) => {}
        }
        retry = retry.mul_f64(1.5).min(MAX_RETRY);
    }
}

async fn watch_session(
    mut stream: TcpStream,
    reader: &GpsdReader,
    cancel: &CancellationToken,
) -> std::io::Result<()> {
    stream.write_all(WATCH_COMMAND).await?;
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = timeout(READ_TIMEOUT, lines.next_line()) => line,
        };
        match line {
            Ok(Ok(Some(line))) => {
                if let Some(fix) = parse_report(&line) {
                    reader.store(Some(fix));
                }
            }
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "no report from gpsd",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MODE_3D;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_3d_fix() {
        let line = r#"{"class":"TPV","device":"/dev/ttyACM0","mode":3,"time":"2024-06-15T12:34:56.000Z","lat":52.5,"lon":13.4,"altHAE":41.2,"alt":40.0,"speed":3.5,"track":181.3}"#;
        let fix = parse_report(line).unwrap();
        assert!(fix.valid);
        assert_eq!(fix.mode, MODE_3D);
        assert_eq!(fix.lat, 52.5);
        assert_eq!(fix.lon, 13.4);
        assert_eq!(fix.alt, 41.2);
        assert_eq!(fix.speed_ms, 3.5);
        assert_eq!(fix.track, 181.3);
        assert_eq!(fix.time_iso.as_deref(), Some("2024-06-15T12:34:56Z"));
    }

    #[test]
    fn test_parse_no_fix() {
        let fix = parse_report(r#"{"class":"TPV","mode":1}"#).unwrap();
        assert!(!fix.valid);
        assert!(!fix.is_usable());
    }

    #[test]
    fn test_other_classes_ignored() {
        assert!(parse_report(r#"{"class":"SKY","satellites":[]}"#).is_none());
        assert!(parse_report(r#"{"class":"VERSION","release":"3.25"}"#).is_none());
        assert!(parse_report("garbage").is_none());
    }

    #[test]
    fn test_time_offset_normalized_to_utc() {
        assert_eq!(normalize_time("2024-06-15T14:34:56+02:00"), "2024-06-15T12:34:56Z");
        assert_eq!(normalize_time("weird"), "weird");
    }

    #[tokio::test]
    async fn test_reader_follows_gpsd_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut watch = vec![0u8; WATCH_COMMAND.len()];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut watch)
                .await
                .unwrap();
            socket
                .write_all(b"{\"class\":\"VERSION\"}\n{\"class\":\"TPV\",\"mode\":2,\"lat\":1.5,\"lon\":2.5}\n")
                .await
                .unwrap();
            // Hold the connection open until the test is done with it.
            sleep(Duration::from_secs(2)).await;
        });

        let cancel = CancellationToken::new();
        let (reader, handle) = GpsdReader::spawn("127.0.0.1", port, cancel.clone());
        let mut fix = None;
        for _ in 0..100 {
            fix = reader.get_current_fix();
            if fix.is_some() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let fix = fix.expect("fix from gpsd");
        assert_eq!((fix.lat, fix.lon), (1.5, 2.5));
        assert_eq!(fix.mode, 1);

        cancel.cancel();
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        server.abort();
    }
}
