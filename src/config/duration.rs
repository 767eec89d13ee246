//! Duration parsing utilities.

use std::time::Duration;

use anyhow::Context;

/// Parse a duration string like "1h", "30m", "300s", "250ms", "300".
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Milliseconds suffix: "250ms"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
///
/// Every duration the gateway takes is an interval or a timeout, so zero is
/// rejected.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let duration = parse_any(s)?;
    if duration.is_zero() {
        anyhow::bail!("Duration must be greater than zero: {s}");
    }
    Ok(duration)
}

fn parse_any(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    // "ms" must be checked before "m" and "s"
    if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str
            .parse()
            .with_context(|| format!("Invalid milliseconds value: {num_str}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(num_str) = s.strip_suffix('h') {
        return scaled_secs(num_str, 3600, "hours");
    }
    if let Some(num_str) = s.strip_suffix('m') {
        return scaled_secs(num_str, 60, "minutes");
    }
    if let Some(num_str) = s.strip_suffix('s') {
        return scaled_secs(num_str, 1, "seconds");
    }

    // No suffix - treat as seconds
    s.parse::<u64>()
        .map(Duration::from_secs)
        .with_context(|| format!("Invalid duration value: {s}"))
}

fn scaled_secs(num_str: &str, unit_secs: u64, unit: &str) -> anyhow::Result<Duration> {
    let value: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid {unit} value: {num_str}"))?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .with_context(|| format!("Duration too large: {num_str} {unit}"))
}
