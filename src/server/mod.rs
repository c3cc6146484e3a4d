//! TCP servers owned by the daemon: NMEA broadcast and the calibration control API.
//!
//! Lock rule for everything in here: no `std::sync` lock is held across an
//! `.await`, and every socket write is bounded by a timeout.

pub mod broadcast;
pub mod control;
pub mod lines;

pub use broadcast::BroadcastServer;
pub use control::ControlServer;
