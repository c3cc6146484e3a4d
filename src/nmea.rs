//! NMEA 0183 sentence builders (GGA, RMC) for Navit and gpsd.
//!
//! Everything here is a pure function. Out-of-range input is never rejected:
//! a latitude of 120° still yields a syntactically valid sentence, because
//! downstream consumers prefer a slightly wrong sentence to a gap in the stream.

use crate::types::PositionFix;

pub const TALKER: &str = "GP";
pub const MS_TO_KNOTS: f64 = 1.943844;
/// Above this ground speed the receiver's own track beats the fused heading.
pub const TRACK_SPEED_THRESHOLD_MS: f64 = 0.5;

pub const DEFAULT_TIME: &str = "000000.00";
pub const DEFAULT_DATE: &str = "010100";

/// XOR of every byte between `$` and `*`, as two uppercase hex digits.
pub fn checksum(body: &str) -> String {
    let sum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("{:02X}", sum)
}

fn frame(body: &str) -> String {
    format!("${}*{}\r\n", body, checksum(body))
}

fn degrees_minutes(value: f64) -> (u64, f64) {
    let magnitude = value.abs();
    let degrees = magnitude.trunc();
    (degrees as u64, (magnitude - degrees) * 60.0)
}

/// `DDMM.MMMM,N` / `DDMM.MMMM,S`
pub fn format_latitude(lat: f64) -> String {
    let (deg, minutes) = degrees_minutes(lat);
    let hemisphere = if lat >= 0.0 { 'N' } else { 'S' };
    format!("{:02}{:07.4},{}", deg, minutes, hemisphere)
}

/// `DDDMM.MMMM,E` / `DDDMM.MMMM,W`
pub fn format_longitude(lon: f64) -> String {
    let (deg, minutes) = degrees_minutes(lon);
    let hemisphere = if lon >= 0.0 { 'E' } else { 'W' };
    format!("{:03}{:07.4},{}", deg, minutes, hemisphere)
}

/// ISO-8601 timestamp to `HHMMSS.00`. Sub-second precision is dropped.
pub fn format_time(time_iso: Option<&str>) -> String {
    let Some((_, time_part)) = time_iso.and_then(|s| s.split_once('T')) else {
        return DEFAULT_TIME.to_string();
    };
    let cleaned: String = time_part.chars().filter(|c| *c != 'Z' && *c != '-').collect();
    let clock: String = match cleaned.split_once('.') {
        Some((whole, _)) => whole.to_string(),
        None => cleaned.chars().take(8).collect(),
    };
    let digits: String = clock.chars().filter(|c| *c != ':').take(6).collect();
    if digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}.00", digits)
    } else {
        DEFAULT_TIME.to_string()
    }
}

/// ISO-8601 timestamp to `DDMMYY`.
pub fn format_date(date_iso: Option<&str>) -> String {
    let Some((date_part, _)) = date_iso.and_then(|s| s.split_once('T')) else {
        return DEFAULT_DATE.to_string();
    };
    let digits: String = date_part.chars().filter(|c| *c != '-').collect();
    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return DEFAULT_DATE.to_string();
    }
    format!("{}{}{}", &digits[6..8], &digits[4..6], &digits[2..4])
}

fn format_track(track_deg: f64) -> String {
    if (0.0..360.0).contains(&track_deg) {
        format!("{:.1}", track_deg)
    } else {
        "0.0".to_string()
    }
}

/// GGA: time, position, fix quality, satellites, HDOP, altitude.
pub fn build_position_sentence(
    lat: f64,
    lon: f64,
    alt_m: f64,
    fix_quality: i32,
    num_sats: u32,
    hdop: f64,
    time_iso: Option<&str>,
) -> String {
    let body = format!(
        "{}GGA,{},{},{},{},{:02},{:.1},{:.1},M,0.0,M,,",
        TALKER,
        format_time(time_iso),
        format_latitude(lat),
        format_longitude(lon),
        fix_quality,
        num_sats,
        hdop,
        alt_m,
    );
    frame(&body)
}

/// RMC: time, status, position, speed over ground, track, date.
pub fn build_navigation_sentence(
    lat: f64,
    lon: f64,
    speed_knots: f64,
    track_deg: f64,
    time_iso: Option<&str>,
    date_iso: Option<&str>,
    valid: bool,
) -> String {
    let body = format!(
        "{}RMC,{},{},{},{},{:.1},{},{},,,",
        TALKER,
        format_time(time_iso),
        if valid { 'A' } else { 'V' },
        format_latitude(lat),
        format_longitude(lon),
        speed_knots,
        format_track(track_deg),
        format_date(date_iso),
    );
    frame(&body)
}

/// Build `(GGA, RMC)` for a fix and the fused heading.
///
/// Returns `None` when the fix carries no usable geometry. `time_override`
/// replaces the fix's own timestamp when given.
pub fn fix_to_sentences(
    fix: &PositionFix,
    heading_deg: f64,
    time_override: Option<&str>,
) -> Option<(String, String)> {
    if !fix.is_usable() {
        return None;
    }
    let time_iso = time_override.or(fix.time_iso.as_deref());
    let track = if fix.speed_ms > TRACK_SPEED_THRESHOLD_MS {
        fix.track
    } else {
        heading_deg
    };
    let gga = build_position_sentence(fix.lat, fix.lon, fix.alt, fix.mode, 0, 1.0, time_iso);
    let rmc = build_navigation_sentence(
        fix.lat,
        fix.lon,
        fix.speed_ms * MS_TO_KNOTS,
        track,
        time_iso,
        time_iso,
        true,
    );
    Some((gga, rmc))
}
