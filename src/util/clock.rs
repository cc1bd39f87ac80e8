//! Wall-clock and strictly monotonic millisecond timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_STAMP_MS: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch. Returns 0 if the system clock is before the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Process-wide timestamp that never repeats and never goes backwards.
///
/// Every call returns a value strictly greater than the previous one, even when
/// several calls land in the same wall-clock millisecond or the system clock
/// is stepped back. Lifecycle stamps and LRU ordering rely on this.
pub fn monotonic_ms() -> u64 {
    let wall = now_ms();
    let mut last = LAST_STAMP_MS.load(Ordering::Acquire);
    loop {
        let next = if wall > last { wall } else { last + 1 };
        match LAST_STAMP_MS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Convert a millisecond span into fractional seconds.
#[allow(clippy::cast_precision_loss)]
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}
