//! navfuse: fuses IMU orientation with GPS fixes and serves NMEA 0183
//! (GGA + RMC) with a fused heading over TCP.

pub mod calibration;
pub mod config;
pub mod error;
pub mod filters;
pub mod health_monitor;
pub mod nmea;
pub mod scheduler;
pub mod server;
pub mod sources;
pub mod types;

pub use config::{Config, SourceMode};
pub use error::{NavError, Result};
