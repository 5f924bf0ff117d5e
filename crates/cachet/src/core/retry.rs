use std::time::Duration;

/// Apply `multiplier` to `current_ms` once per `attempt` and truncate.
///
/// The wait before attempt `n + 1` is `next_backoff_ms(m, n, wait_n)`, so the
/// sequence grows faster than plain exponential backoff. Saturates at
/// `u64::MAX`.
///
/// ```
/// use cachet::core::next_backoff_ms;
///
/// assert_eq!(next_backoff_ms(1.25, 1, 1000), 1250);
/// assert_eq!(next_backoff_ms(1.25, 2, 1000), 1562);
/// ```
pub fn next_backoff_ms(multiplier: f64, attempt: u32, current_ms: u64) -> u64 {
    let mut next = current_ms as f64;
    for _ in 0..attempt {
        next *= multiplier;
        if !next.is_finite() {
            return u64::MAX;
        }
    }
    // float-to-int casts saturate
    next as u64
}

/// Stretch a timeout after a timeout-class failure.
pub fn scale_timeout(timeout: Duration, multiplier: f64) -> Duration {
    Duration::try_from_secs_f64(timeout.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
    Other,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        400..=499 => StatusClass::ClientError,
        500..=599 => StatusClass::ServerError,
        _ => StatusClass::Other,
    }
}

pub fn is_client_error(status: u16) -> bool { classify_status(status) == StatusClass::ClientError }
