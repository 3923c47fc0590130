//! Retry delay calculations.

use std::time::Duration;

/// Delay before retry number `attempt` (1-based) of a protected connect:
/// `base * 2^(attempt - 1)`, saturating.
///
/// ```
/// use medcab_hardware::backoff::exponential_delay;
/// use std::time::Duration;
///
/// let base = Duration::from_millis(500);
/// assert_eq!(exponential_delay(base, 1), base);
/// assert_eq!(exponential_delay(base, 2), base * 2);
/// assert_eq!(exponential_delay(base, 3), base * 4);
/// ```
pub fn exponential_delay(base: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    // Prevent overflow of the shift
    let shift = attempt.saturating_sub(1).min(30);
    base.saturating_mul(1u32 << shift)
}

/// Delay before write attempt `attempt + 1`: `step * attempt`.
pub fn linear_delay(step: Duration, attempt: u32) -> Duration {
    step.saturating_mul(attempt)
}
