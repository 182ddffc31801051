use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current host wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Render seconds since the epoch as `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Values outside chrono's representable range fall back to the raw number.
pub fn format_timestamp(secs: f64) -> String {
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    match DateTime::<Utc>::from_timestamp(whole as i64, nanos.min(999_999_999)) {
        Some(datetime) => datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{secs:.3}"),
    }
}
