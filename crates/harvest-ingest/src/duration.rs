//! ISO-8601 durations as returned by the YouTube Data API
//!
//! Only the day/time subset the API emits is accepted: `P[nW][nD][T[nH][nM][nS]]`.
//! Missing units count as zero, so `PT45S` is 45 seconds and `P1DT1S` is 86401.
//! Fractional seconds are truncated.

use harvest_common::{HarvestError, Result};
use regex::Regex;
use std::sync::LazyLock;

static ISO_DURATION: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:[.,]\d+)?S)?)?$",
    )
});

const UNIT_SECS: [i64; 5] = [7 * 86_400, 86_400, 3_600, 60, 1];

/// Parse an ISO-8601 duration into whole seconds
pub fn parse_iso8601_duration(value: &str) -> Result<i64> {
    let pattern = ISO_DURATION
        .as_ref()
        .map_err(|e| HarvestError::parse(format!("duration pattern: {e}")))?;

    let value = value.trim();
    let captures = pattern
        .captures(value)
        .ok_or_else(|| HarvestError::parse(format!("not an ISO-8601 duration: '{value}'")))?;

    // "P" and "PT" match the pattern but carry no components.
    if captures.iter().skip(1).all(|c| c.is_none()) {
        return Err(HarvestError::parse(format!(
            "ISO-8601 duration has no components: '{value}'"
        )));
    }

    let mut total: i64 = 0;
    for (group, unit) in UNIT_SECS.iter().enumerate() {
        let Some(digits) = captures.get(group + 1) else {
            continue;
        };
        let amount: i64 = digits
            .as_str()
            .parse()
            .map_err(|_| HarvestError::parse(format!("duration component too large: '{value}'")))?;
        total = amount
            .checked_mul(*unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| HarvestError::parse(format!("duration overflows: '{value}'")))?;
    }

    Ok(total)
}
