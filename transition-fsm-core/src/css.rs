//! CSS `<time>` parsing for computed transition timing.
//!
//! Computed styles report `transition-duration` and `transition-delay` as a
//! comma separated list, one entry per transitioned property (Safari joins
//! them even when they are all equal). The effective timing is the largest
//! entry of each list.

use std::time::Duration;

use crate::error::CssTimeError;

/// Parses a single CSS time token into milliseconds.
///
/// `"20ms"` is read as milliseconds, `"0.3s"` as seconds. A bare number is
/// read as seconds, matching how `parseFloat(v) * 1000` treats unit-less
/// computed values.
pub fn parse_time_ms(token: &str) -> Result<f64, CssTimeError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(CssTimeError::Empty);
    }

    let (number, scale) = if let Some(ms) = token.strip_suffix("ms") {
        (ms, 1.0)
    } else if let Some(s) = token.strip_suffix('s') {
        (s, 1000.0)
    } else {
        (token, 1000.0)
    };

    match number.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value * scale),
        _ => Err(CssTimeError::Invalid(token.to_owned())),
    }
}

/// Returns the largest entry of a comma separated time list, in milliseconds.
///
/// Empty lists and malformed entries count as zero. Negative entries are
/// kept, so a list of negative delays yields a negative maximum.
pub fn max_time_ms(list: &str) -> f64 {
    list.split(',')
        .filter(|token| !token.trim().is_empty())
        .map(|token| {
            parse_time_ms(token).unwrap_or_else(|err| {
                tracing::trace!(%err, "ignoring malformed transition time");
                0.0
            })
        })
        .reduce(f64::max)
        .unwrap_or(0.0)
}

/// Total time a transition takes given computed duration and delay lists.
///
/// Negative delays shorten the total; the result never goes below zero.
pub fn total_transition_time(duration: &str, delay: &str) -> Duration {
    let total = max_time_ms(duration) + max_time_ms(delay);
    if total <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((total * 1_000_000.0).round() as u64)
    }
}
