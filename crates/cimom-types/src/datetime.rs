//! The CIM datetime string form (DSP0004 §2.2.1).
//!
//! A CIM datetime is a fixed 25-character string in one of two layouts:
//!
//! - timestamp: `yyyymmddhhmmss.mmmmmmsutc` where `s` is `+` or `-` and `utc`
//!   is the offset from UTC in minutes, e.g. `20250830143000.000000+000`
//! - interval:  `ddddddddhhmmss.mmmmmm:000` (the `:` marks an interval)
//!
//! Stored canonically as the validated 25-byte string; field arithmetic is out
//! of scope here, but the timestamp/interval distinction is preserved.

use std::fmt;

/// Length of the fixed CIM datetime string form.
pub const CIM_DATETIME_LEN: usize = 25;

/// A validated CIM datetime or interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CimDateTime {
    repr: String,
}

/// Error returned when a datetime string fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidDateTime {
    pub input: String,
    pub detail: &'static str,
}

impl fmt::Display for InvalidDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid CIM datetime '{}': {}", self.input, self.detail)
    }
}

impl std::error::Error for InvalidDateTime {}

impl CimDateTime {
    /// Parse and validate the 25-character string form.
    pub fn parse(s: &str) -> Result<Self, InvalidDateTime> {
        let bytes = s.as_bytes();
        if bytes.len() != CIM_DATETIME_LEN {
            return Err(InvalidDateTime {
                input: s.to_owned(),
                detail: "must be exactly 25 characters",
            });
        }
        if bytes[14] != b'.' {
            return Err(InvalidDateTime {
                input: s.to_owned(),
                detail: "character 15 must be '.'",
            });
        }
        let sign = bytes[21];
        if sign != b'+' && sign != b'-' && sign != b':' {
            return Err(InvalidDateTime {
                input: s.to_owned(),
                detail: "character 22 must be '+', '-' or ':'",
            });
        }
        let digits_ok = bytes[..14]
            .iter()
            .chain(&bytes[15..21])
            .chain(&bytes[22..])
            .all(u8::is_ascii_digit);
        if !digits_ok {
            return Err(InvalidDateTime {
                input: s.to_owned(),
                detail: "non-digit in a digit field",
            });
        }
        if sign == b':' && &bytes[22..] != b"000" {
            return Err(InvalidDateTime {
                input: s.to_owned(),
                detail: "interval form must end in ':000'",
            });
        }
        Ok(Self { repr: s.to_owned() })
    }

    /// Whether this is an interval (`:` separator) rather than a timestamp.
    #[must_use]
    pub fn is_interval(&self) -> bool {
        self.repr.as_bytes()[21] == b':'
    }

    /// The canonical 25-character string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.repr
    }
}

impl fmt::Display for CimDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl TryFrom<String> for CimDateTime {
    type Error = InvalidDateTime;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CimDateTime> for String {
    fn from(dt: CimDateTime) -> Self {
        dt.repr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamp() {
        let dt = CimDateTime::parse("20250830143000.000000+000").unwrap();
        assert!(!dt.is_interval());
        assert_eq!(dt.as_str(), "20250830143000.000000+000");
    }

    #[test]
    fn parses_interval() {
        let dt = CimDateTime::parse("00000001000000.000000:000").unwrap();
        assert!(dt.is_interval());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(CimDateTime::parse("20250830").is_err());
        assert!(CimDateTime::parse("").is_err());
    }

    #[test]
    fn rejects_bad_separator() {
        assert!(CimDateTime::parse("20250830143000x000000+000").is_err());
        assert!(CimDateTime::parse("20250830143000.000000*000").is_err());
    }

    #[test]
    fn rejects_interval_with_nonzero_offset() {
        assert!(CimDateTime::parse("00000001000000.000000:060").is_err());
    }

    #[test]
    fn rejects_non_digits() {
        assert!(CimDateTime::parse("2025083014300a.000000+000").is_err());
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let dt = CimDateTime::parse("20250830143000.000000+000").unwrap();
        let json = serde_json::to_string(&dt).unwrap();
        assert_eq!(json, "\"20250830143000.000000+000\"");
        let back: CimDateTime = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dt);
        assert!(serde_json::from_str::<CimDateTime>("\"not a datetime\"").is_err());
    }
}
