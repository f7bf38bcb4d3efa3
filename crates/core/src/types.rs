/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Signed number of seconds from `earlier` to `later`, with sub-second precision.
pub fn secs_between(earlier: Timestamp, later: Timestamp) -> f64 {
    later.signed_duration_since(earlier).num_milliseconds() as f64 / 1000.0
}

/// Offset `at` by a (possibly fractional) number of seconds.
///
/// Saturates at the representable range instead of overflowing.
pub fn add_secs(at: Timestamp, secs: f64) -> Timestamp {
    let saturated = if secs.is_sign_negative() {
        chrono::DateTime::<chrono::Utc>::MIN_UTC
    } else {
        chrono::DateTime::<chrono::Utc>::MAX_UTC
    };
    chrono::Duration::try_milliseconds((secs * 1000.0).round() as i64)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(saturated)
}
