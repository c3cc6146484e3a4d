use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use navfuse::calibration::{Calibration, CalibrationManager};
use navfuse::filters::ComplementaryAhrs;
use navfuse::nmea::fix_to_sentences;
use navfuse::scheduler::Scheduler;
use navfuse::server::BroadcastServer;
use navfuse::sources::telemetry::TelemetryServer;
use navfuse::sources::{CalibratedImuSource, PositionSource};

const FIX_LINE: &str = "{\"lat\":52.0,\"lon\":10.0,\"alt\":100.0,\"speed_ms\":5.0,\"track\":45.0,\"time_iso\":\"2024-06-15T12:34:56Z\"}\n";

#[tokio::test]
async fn test_ingested_fix_encodes_to_nmea() {
    let server = TelemetryServer::bind("127.0.0.1", 0).await.unwrap();
    let addr = server.local_addr().unwrap();
    let source = server.source();
    let cancel = CancellationToken::new();
    let handle = server.spawn(cancel.clone());

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(FIX_LINE.as_bytes()).await.unwrap();

    let mut fix = None;
    for _ in 0..200 {
        fix = source.get_fix();
        if fix.is_some() {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    let fix = fix.expect("fix never arrived");

    let (gga, rmc) = fix_to_sentences(&fix, 45.0, None).unwrap();
    assert!(gga.contains("5200.0000,N"));
    assert!(gga.contains("01000.0000,E"));
    assert!(rmc.starts_with("$GPRMC,123456.00,A,"));
    assert!(rmc.contains(",150624,"));

    cancel.cancel();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_telemetry_to_broadcast_client() {
    let telemetry = TelemetryServer::bind("127.0.0.1", 0).await.unwrap();
    let telemetry_addr = telemetry.local_addr().unwrap();
    let source = telemetry.source();
    let cancel = CancellationToken::new();
    let telemetry_task = telemetry.spawn(cancel.clone());

    let manager = Arc::new(CalibrationManager::new(Calibration::default()));
    let broadcast = BroadcastServer::bind("127.0.0.1", 0).await.unwrap();
    let nmea_addr = broadcast.local_addr().unwrap();
    let scheduler = Scheduler::new(
        Box::new(CalibratedImuSource::new(source.clone(), manager)),
        Some(Box::new(source)),
        Box::new(ComplementaryAhrs::new(0.5)),
        broadcast,
        Duration::from_millis(10),
        Duration::from_millis(50),
    );
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    let mut nmea = BufReader::new(TcpStream::connect(nmea_addr).await.unwrap());
    let mut phone = TcpStream::connect(telemetry_addr).await.unwrap();
    phone
        .write_all(b"{\"accel\":[0,0,9.81],\"gyro\":[0,0,0]}\n")
        .await
        .unwrap();
    phone.write_all(FIX_LINE.as_bytes()).await.unwrap();

    let mut gga = None;
    let mut rmc = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while (gga.is_none() || rmc.is_none()) && tokio::time::Instant::now() < deadline {
        let mut line = String::new();
        match timeout(Duration::from_secs(1), nmea.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => {}
            _ => continue,
        }
        if line.starts_with("$GPGGA") {
            gga = Some(line);
        } else if line.starts_with("$GPRMC") {
            rmc = Some(line);
        }
    }
    let gga = gga.expect("no GGA received");
    let rmc = rmc.expect("no RMC received");

    assert!(gga.contains("5200.0000,N,01000.0000,E,2,"));
    assert!(gga.ends_with("\r\n"));
    // 5 m/s is above the track threshold, so the fix's own track is reported.
    assert!(rmc.contains(",A,5200.0000,N,01000.0000,E,9.7,45.0,150624,"));

    cancel.cancel();
    timeout(Duration::from_secs(2), scheduler_task).await.unwrap().unwrap();
    timeout(Duration::from_secs(2), telemetry_task).await.unwrap().unwrap();
}
