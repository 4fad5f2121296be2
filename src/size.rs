//! Human-friendly byte quantities.
//!
//! [`parse_size`] reads strings like `100MB`, `1kiB`, `0.1Gi` or a bare `4096`.
//! [`format_size`] goes the other way for the upload acknowledgment, always
//! using SI units.

use thiserror::Error;

const SI_SUFFIXES: [&str; 7] = ["B", "kB", "MB", "GB", "TB", "PB", "EB"];

/// Reasons a size specification could not be turned into a byte count.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSizeError {
    #[error("size is empty")]
    Empty,

    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("unknown unit: {0:?}")]
    UnknownUnit(String),

    #[error("size is too large")]
    TooLarge,

    #[error("size is zero")]
    Zero,
}

/// Parses `<number>[<unit>]` into a byte count strictly greater than zero.
///
/// Units are case-insensitive. `k`, `M`, `G`, `T`, `P`, `E` are powers of
/// 1000, `ki` through `Ei` powers of 1024; either may carry a trailing `B`.
/// No unit, or a lone `B`, means bytes. Fractional results are truncated.
pub fn parse_size(s: &str) -> Result<u64, ParseSizeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseSizeError::Empty);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    // digit group separators carry no meaning
    let number: String = number.chars().filter(|&c| c != ',').collect();
    if number.is_empty() {
        return Err(ParseSizeError::InvalidNumber(s.to_string()));
    }

    let multiplier = unit_multiplier(unit.trim())?;

    let bytes = if number.contains('.') {
        let value: f64 = number
            .parse()
            .map_err(|_| ParseSizeError::InvalidNumber(number.clone()))?;
        let bytes = value * multiplier as f64;
        // u64::MAX rounds up to 2^64 as an f64, so compare against that
        if !bytes.is_finite() || bytes >= 18_446_744_073_709_551_616.0 {
            return Err(ParseSizeError::TooLarge);
        }
        bytes as u64
    } else {
        let value: u64 = number.parse().map_err(|e: std::num::ParseIntError| {
            match e.kind() {
                std::num::IntErrorKind::PosOverflow => ParseSizeError::TooLarge,
                _ => ParseSizeError::InvalidNumber(number.clone()),
            }
        })?;
        value.checked_mul(multiplier).ok_or(ParseSizeError::TooLarge)?
    };

    if bytes == 0 {
        return Err(ParseSizeError::Zero);
    }
    Ok(bytes)
}

fn unit_multiplier(unit: &str) -> Result<u64, ParseSizeError> {
    let lower = unit.to_ascii_lowercase();
    let prefix = lower.strip_suffix('b').unwrap_or(&lower);
    let (prefix, base) = match prefix.strip_suffix('i') {
        Some(prefix) if !prefix.is_empty() => (prefix, 1024u64),
        Some(_) => return Err(ParseSizeError::UnknownUnit(unit.to_string())),
        None => (prefix, 1000u64),
    };

    let exponent = match prefix {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        "e" => 6,
        _ => return Err(ParseSizeError::UnknownUnit(unit.to_string())),
    };
    Ok(base.pow(exponent))
}

/// Renders a byte count with SI units: `7 B`, `1.0 kB`, `100 MB`.
///
/// Values under ten keep one decimal place, everything else is rounded to
/// a whole number of the chosen unit.
pub fn format_size(bytes: u64) -> String {
    if bytes < 10 {
        return format!("{bytes} B");
    }

    let mut exponent = 0;
    while exponent + 1 < SI_SUFFIXES.len() && bytes >= 1000u64.pow(exponent as u32 + 1) {
        exponent += 1;
    }

    let scaled = bytes as f64 / 1000u64.pow(exponent as u32) as f64;
    let rounded = (scaled * 10.0 + 0.5).floor() / 10.0;
    let suffix = SI_SUFFIXES[exponent];
    if rounded < 10.0 {
        format!("{rounded:.1} {suffix}")
    } else {
        format!("{rounded:.0} {suffix}")
    }
}
