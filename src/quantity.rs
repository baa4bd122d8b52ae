//! Parsing and formatting of walltime and memory expressions.
//!
//! Resource requirements arrive as human-written strings (`"1h"`,
//! `"01:30:00"`, `"4G"`). The master-task aggregator needs them as numbers to
//! scale them, and writes them back in canonical form.

use crate::error::{Result, TaskError};

fn invalid(kind: &'static str, value: &str) -> TaskError {
    TaskError::InvalidQuantity {
        kind,
        value: value.to_string(),
    }
}

/// Unit applied to a bare number by [`expand_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
    /// Weeks.
    Weeks,
}

impl TimeUnit {
    fn seconds(self) -> f64 {
        match self {
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3_600.0,
            Self::Days => 86_400.0,
            Self::Weeks => 604_800.0,
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "s" => Some(Self::Seconds),
            "m" => Some(Self::Minutes),
            "h" => Some(Self::Hours),
            "d" => Some(Self::Days),
            "w" => Some(Self::Weeks),
            _ => None,
        }
    }
}

/// Converts a time expression into seconds.
///
/// Accepts `HH:MM:SS`, `MM:SS`, a bare number (interpreted in
/// `default_unit`), or a number followed by one of `s`, `m`, `h`, `d`, `w`.
/// A leading `-` negates the result.
///
/// # Examples
///
/// ```
/// use taskwatch::quantity::{expand_time, TimeUnit};
///
/// assert_eq!(expand_time("01:30:00", TimeUnit::Seconds).unwrap(), 5400.0);
/// assert_eq!(expand_time("2h", TimeUnit::Seconds).unwrap(), 7200.0);
/// assert_eq!(expand_time("3", TimeUnit::Days).unwrap(), 259_200.0);
/// assert_eq!(expand_time("-1d", TimeUnit::Seconds).unwrap(), -86_400.0);
/// assert!(expand_time("soon", TimeUnit::Seconds).is_err());
/// ```
pub fn expand_time(text: &str, default_unit: TimeUnit) -> Result<f64> {
    let trimmed = text.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest.trim_start()),
        None => (1.0, trimmed),
    };
    if body.is_empty() {
        return Err(invalid("time", text));
    }

    if body.contains(':') {
        let mut total = 0.0;
        let parts: Vec<&str> = body.split(':').collect();
        if parts.len() > 3 {
            return Err(invalid("time", text));
        }
        for part in parts {
            let value: f64 = part.trim().parse().map_err(|_| invalid("time", text))?;
            total = total * 60.0 + value;
        }
        return finite_time(sign * total, text);
    }

    let split = body
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(split);
    let value: f64 = number.trim().parse().map_err(|_| invalid("time", text))?;
    let unit = if suffix.is_empty() {
        default_unit
    } else {
        TimeUnit::from_suffix(&suffix.to_ascii_lowercase()).ok_or_else(|| invalid("time", text))?
    };
    finite_time(sign * value * unit.seconds(), text)
}

fn finite_time(seconds: f64, text: &str) -> Result<f64> {
    if seconds.is_finite() {
        Ok(seconds)
    } else {
        Err(invalid("time", text))
    }
}

/// Formats seconds as `H:MM:SS`, the form schedulers expect for walltime.
///
/// # Examples
///
/// ```
/// use taskwatch::quantity::format_hhmmss;
///
/// assert_eq!(format_hhmmss(3 * 3600), "03:00:00");
/// assert_eq!(format_hhmmss(125), "00:02:05");
/// assert_eq!(format_hhmmss(100 * 3600), "100:00:00");
/// ```
pub fn format_hhmmss(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Converts a size expression into bytes.
///
/// Decimal suffixes `K`, `M`, `G`, `T` (optionally followed by `B`) scale by
/// powers of 1000; binary suffixes `KiB`, `MiB`, `GiB`, `TiB` by powers of
/// 1024. A bare number is taken as bytes.
///
/// # Examples
///
/// ```
/// use taskwatch::quantity::expand_size;
///
/// assert_eq!(expand_size("100M").unwrap(), 100_000_000);
/// assert_eq!(expand_size("2GB").unwrap(), 2_000_000_000);
/// assert_eq!(expand_size("1KiB").unwrap(), 1024);
/// assert_eq!(expand_size("512").unwrap(), 512);
/// ```
pub fn expand_size(text: &str) -> Result<u64> {
    let body = text.trim();
    let split = body
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(split);
    let value: f64 = number.trim().parse().map_err(|_| invalid("size", text))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid("size", text));
    }
    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "t" | "tb" => 1_000_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        "tib" => 1 << 40,
        _ => return Err(invalid("size", text)),
    };
    let bytes = (value * multiplier as f64).round();
    if bytes >= u64::MAX as f64 {
        return Err(invalid("size", text));
    }
    Ok(bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("30", 30.0)]
    #[case("30s", 30.0)]
    #[case("1.5m", 90.0)]
    #[case("1H", 3600.0)]
    #[case("1w", 604_800.0)]
    #[case("10:00", 600.0)]
    #[case("1:00:00", 3600.0)]
    fn parses_time_expressions(#[case] text: &str, #[case] expected: f64) {
        assert_eq!(expand_time(text, TimeUnit::Seconds).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("1:2:3:4")]
    #[case("5y")]
    #[case("-")]
    #[case("0:inf")]
    #[case("0:NaN")]
    #[case("1:-inf:00")]
    fn rejects_bad_time_expressions(#[case] text: &str) {
        assert!(expand_time(text, TimeUnit::Seconds).is_err());
    }

    #[test]
    fn rejects_overflowing_numbers() {
        let huge = "9".repeat(400);
        assert!(expand_time(&huge, TimeUnit::Seconds).is_err());
        assert!(expand_time(&format!("0:{huge}"), TimeUnit::Seconds).is_err());
        assert!(expand_size(&huge).is_err());
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(expand_size("lots").is_err());
        assert!(expand_size("-1G").is_err());
        assert!(expand_size("3Q").is_err());
        assert!(expand_size("NaN").is_err());
        assert!(expand_size("inf").is_err());
        assert!(expand_size("100000000000000000000000TB").is_err());
    }

    #[test]
    fn formats_round_trip_with_expand_time() {
        let text = format_hhmmss(3 * 3600 + 61);
        assert_eq!(text, "03:01:01");
        assert_eq!(expand_time(&text, TimeUnit::Seconds).unwrap(), 10_861.0);
    }
}
