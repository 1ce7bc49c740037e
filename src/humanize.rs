//! Human-readable size, duration and speed formatting/parsing utilities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid size format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),
}

/// Byte size wrapper with human-readable parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u64)] = &[
            ("B", 1),
            ("KB", 1024),
            ("MB", 1024 * 1024),
            ("GB", 1024 * 1024 * 1024),
            ("TB", 1024 * 1024 * 1024 * 1024),
        ];

        for (i, &(unit, divisor)) in UNITS.iter().enumerate().rev() {
            if self.0 >= divisor {
                let value = self.0 / divisor;
                let remainder = self.0 % divisor;

                if remainder == 0 || i == 0 {
                    return format!("{}{}", value, unit);
                } else {
                    let decimal = (remainder * 10 / divisor) as u64;
                    if decimal > 0 {
                        return format!("{}.{}{}", value, decimal, unit);
                    }
                    return format!("{}{}", value, unit);
                }
            }
        }

        format!("{}B", self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl<'de> serde::de::Visitor<'de> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a byte size as string (e.g., \"5MB\", \"1GB\") or integer")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(ByteSize(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<ByteSize>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();

        // Try to parse as plain number first
        if let Ok(num) = s.parse::<u64>() {
            return Ok(ByteSize(num));
        }

        // Parse with unit suffix
        let (num_str, unit) = if let Some(pos) = s.find(|c: char| !c.is_ascii_digit()) {
            (&s[..pos], &s[pos..])
        } else {
            return Err(ParseError::InvalidFormat(s.to_string()));
        };

        let num: u64 = num_str.parse()?;

        let multiplier = match unit.trim() {
            "B" => 1,
            "KB" | "K" => 1024,
            "MB" | "M" => 1024 * 1024,
            "GB" | "G" => 1024 * 1024 * 1024,
            "TB" | "T" => 1024u64 * 1024 * 1024 * 1024,
            other => return Err(ParseError::InvalidUnit(other.to_string())),
        };

        num.checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ParseError::InvalidFormat(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

/// Format a media duration in seconds as `h:mm:ss` or `m:ss`
pub fn format_duration(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Format an average transfer speed given bytes moved and elapsed seconds
pub fn format_speed(bytes: u64, elapsed_secs: f64) -> String {
    if elapsed_secs <= 0.0 || bytes == 0 {
        return "-".to_string();
    }
    let mb_per_sec = bytes as f64 / (1024.0 * 1024.0) / elapsed_secs;
    if mb_per_sec >= 1.0 {
        format!("{:.1} MB/s", mb_per_sec)
    } else {
        format!("{:.0} KB/s", mb_per_sec * 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_number() {
        assert_eq!("1024".parse::<ByteSize>().unwrap(), ByteSize(1024));
    }

    #[test]
    fn test_parse_with_units() {
        assert_eq!("1KB".parse::<ByteSize>().unwrap(), ByteSize(1024));
        assert_eq!("5MB".parse::<ByteSize>().unwrap(), ByteSize(5 * 1024 * 1024));
        assert_eq!(
            "500MB".parse::<ByteSize>().unwrap(),
            ByteSize(500 * 1024 * 1024)
        );
        assert_eq!(
            "2GB".parse::<ByteSize>().unwrap(),
            ByteSize(2 * 1024 * 1024 * 1024)
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!("abc".parse::<ByteSize>().is_err());
        assert!("5XB".parse::<ByteSize>().is_err());
        assert!("".parse::<ByteSize>().is_err());
    }

    #[test]
    fn test_human_readable() {
        assert_eq!(ByteSize(512).to_human_readable(), "512B");
        assert_eq!(ByteSize(1024).to_human_readable(), "1KB");
        assert_eq!(ByteSize(1536).to_human_readable(), "1.5KB");
        assert_eq!(ByteSize(5 * 1024 * 1024).to_human_readable(), "5MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(61), "1:01");
        assert_eq!(format_duration(3661), "1:01:01");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0, 10.0), "-");
        assert_eq!(format_speed(10 * 1024 * 1024, 0.0), "-");
        assert_eq!(format_speed(10 * 1024 * 1024, 5.0), "2.0 MB/s");
        assert_eq!(format_speed(512 * 1024, 2.0), "256 KB/s");
    }
}
