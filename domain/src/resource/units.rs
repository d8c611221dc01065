//! Human-readable resource string parsing.
//!
//! - CPU: decimal core count (`"0.5"`, `"2"`)
//! - Memory / storage / network: number with optional `K`, `M`, `G` suffix
//!   (binary multiples, case-insensitive, optional trailing `B`/`iB`).
//!   A bare number is a byte count.
//!
//! Sizes are normalised to megabytes.

use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A resource string could not be interpreted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceUnitError {
    #[error("empty resource value")]
    Empty,

    #[error("invalid number in resource value '{0}'")]
    InvalidNumber(String),

    #[error("unknown unit suffix '{suffix}' in resource value '{value}'")]
    UnknownSuffix { value: String, suffix: String },

    #[error("resource value '{0}' must not be negative")]
    Negative(String),
}

/// Parse a CPU core count such as `"0.5"`.
pub fn parse_cpu(value: &str) -> Result<f64, ResourceUnitError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ResourceUnitError::Empty);
    }
    let cores: f64 = trimmed
        .parse()
        .map_err(|_| ResourceUnitError::InvalidNumber(trimmed.to_string()))?;
    if !cores.is_finite() {
        return Err(ResourceUnitError::InvalidNumber(trimmed.to_string()));
    }
    if cores < 0.0 {
        return Err(ResourceUnitError::Negative(trimmed.to_string()));
    }
    Ok(cores)
}

/// Parse a size such as `"512M"`, `"1G"`, `"2048K"` or `"1048576"` into megabytes.
pub fn parse_size_mb(value: &str) -> Result<f64, ResourceUnitError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ResourceUnitError::Empty);
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let amount: f64 = number
        .trim()
        .parse()
        .map_err(|_| ResourceUnitError::InvalidNumber(trimmed.to_string()))?;
    if !amount.is_finite() {
        return Err(ResourceUnitError::InvalidNumber(trimmed.to_string()));
    }
    if amount < 0.0 {
        return Err(ResourceUnitError::Negative(trimmed.to_string()));
    }

    let multiplier = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "K" | "KB" | "KIB" => 1024.0,
        "M" | "MB" | "MIB" => BYTES_PER_MB,
        "G" | "GB" | "GIB" => BYTES_PER_MB * 1024.0,
        _ => {
            return Err(ResourceUnitError::UnknownSuffix {
                value: trimmed.to_string(),
                suffix: suffix.trim().to_string(),
            });
        }
    };

    Ok(amount * multiplier / BYTES_PER_MB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_cpu("0.5"), Ok(0.5));
        assert_eq!(parse_cpu(" 2 "), Ok(2.0));
        assert_eq!(parse_cpu(""), Err(ResourceUnitError::Empty));
        assert!(matches!(parse_cpu("two"), Err(ResourceUnitError::InvalidNumber(_))));
        assert!(matches!(parse_cpu("-1"), Err(ResourceUnitError::Negative(_))));
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size_mb("512M"), Ok(512.0));
        assert_eq!(parse_size_mb("1G"), Ok(1024.0));
        assert_eq!(parse_size_mb("2048K"), Ok(2.0));
        assert_eq!(parse_size_mb("128m"), Ok(128.0));
        assert_eq!(parse_size_mb("1GiB"), Ok(1024.0));
    }

    #[test]
    fn test_parse_size_bare_number_is_bytes() {
        assert_eq!(parse_size_mb("1048576"), Ok(1.0));
    }

    #[test]
    fn test_parse_size_rejects_unknown_suffix() {
        match parse_size_mb("5T") {
            Err(ResourceUnitError::UnknownSuffix { suffix, .. }) => assert_eq!(suffix, "T"),
            other => panic!("expected UnknownSuffix, got {:?}", other),
        }
        assert!(parse_size_mb("M").is_err());
    }
}
