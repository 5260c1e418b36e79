//! # Duration Validation
//!
//! Parses the Kubernetes-style duration strings used by `spec.syncInterval`.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{anyhow, Result};
use regex::Regex;

static DURATION_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").ok());

/// Parse `<number><unit>` with unit one of `s`, `m`, `h`, `d` (e.g. `30s`, `5m`, `1d`)
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Duration string cannot be empty"));
    }

    let regex = DURATION_REGEX
        .as_ref()
        .ok_or_else(|| anyhow!("Failed to compile duration regex"))?;
    let lower = trimmed.to_lowercase();
    let captures = regex.captures(&lower).ok_or_else(|| {
        anyhow!("Invalid duration format '{trimmed}'. Expected format: <number><unit> (e.g., '1m', '5m', '1h')")
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow!("Invalid duration number in '{trimmed}': {e}"))?;
    if number == 0 {
        return Err(anyhow!(
            "Duration number must be greater than 0, got '{trimmed}'"
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86_400,
    };
    number
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("Duration '{trimmed}' is too large"))
}

/// Parse a duration and enforce a lower bound
pub fn validate_duration_interval(
    interval: &str,
    field_name: &str,
    min_seconds: u64,
) -> Result<Duration> {
    if interval.trim().is_empty() {
        return Err(anyhow!("{field_name} cannot be empty"));
    }
    let duration = parse_kubernetes_duration(interval)
        .map_err(|e| anyhow!("{field_name}: {e}"))?;
    if duration.as_secs() < min_seconds {
        return Err(anyhow!(
            "{field_name} '{}' must be at least {min_seconds} seconds (got {} seconds)",
            interval.trim(),
            duration.as_secs()
        ));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_every_unit() {
        assert_eq!(parse_kubernetes_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_kubernetes_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_kubernetes_duration(" 2H ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_kubernetes_duration("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_malformed_values() {
        for bad in ["", "5", "m", "0m", "1.5h", "-1m", "1w", "5m30s"] {
            assert!(parse_kubernetes_duration(bad).is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn test_enforces_minimum() {
        assert!(validate_duration_interval("10s", "syncInterval", 30).is_err());
        assert_eq!(
            validate_duration_interval("1m", "syncInterval", 30).unwrap(),
            Duration::from_secs(60)
        );
    }
}
