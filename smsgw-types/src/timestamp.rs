//! Wire timestamp format and reverse-timestamp encoding.
//!
//! All timestamps are naive UTC values with microsecond precision. On the
//! wire they use one fixed textual format, which also sorts lexically in
//! chronological order:
//!
//! ```text
//! 2100-10-05 11:10:09.000000
//! ```
//!
//! The reverse encoding maps a timestamp to a fixed-width hex string whose
//! ascending order is the *descending* order of the timestamps, so an
//! ascending index scan yields newest-first results.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

/// Format used when writing timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format used when reading timestamps. Accepts any number of fractional
/// digits (including none) so legacy records still parse.
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// The value reverse timestamps are subtracted from: 2^60 - 1 microseconds,
/// comfortably past the year 9999.
pub const REVERSE_TIMESTAMP_BASE: u64 = (1 << 60) - 1;

/// Hex digits needed to render `REVERSE_TIMESTAMP_BASE`.
const REVERSE_TIMESTAMP_WIDTH: usize = 15;

/// Returns the current UTC time truncated to microseconds.
#[must_use]
pub fn utc_now() -> NaiveDateTime {
    truncate_to_micros(Utc::now().naive_utc())
}

fn truncate_to_micros(ts: NaiveDateTime) -> NaiveDateTime {
    let nanos = ts.nanosecond();
    ts.with_nanosecond(nanos - nanos % 1_000).unwrap_or(ts)
}

/// Renders a timestamp in the wire format.
#[must_use]
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a timestamp in the wire format.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_PARSE_FORMAT)
        .map(truncate_to_micros)
        .map_err(|e| Error::InvalidTimestamp(format!("{s:?}: {e}")))
}

/// Encodes a timestamp so that ascending order of the result is descending
/// order of the input.
///
/// Fails for timestamps before the Unix epoch or past the encodable range.
pub fn to_reverse_timestamp(ts: &NaiveDateTime) -> Result<String> {
    let micros = ts.and_utc().timestamp_micros();
    let micros = u64::try_from(micros)
        .map_err(|_| Error::InvalidTimestamp(format!("{ts} is before the Unix epoch")))?;
    if micros > REVERSE_TIMESTAMP_BASE {
        return Err(Error::InvalidTimestamp(format!(
            "{ts} is past the reverse timestamp range"
        )));
    }
    Ok(format!(
        "{:0width$x}",
        REVERSE_TIMESTAMP_BASE - micros,
        width = REVERSE_TIMESTAMP_WIDTH
    ))
}

/// Decodes a value produced by [`to_reverse_timestamp`].
pub fn from_reverse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let value = u64::from_str_radix(s, 16)
        .map_err(|e| Error::InvalidReverseTimestamp(format!("{s:?}: {e}")))?;
    if value > REVERSE_TIMESTAMP_BASE {
        return Err(Error::InvalidReverseTimestamp(format!(
            "{s:?} is out of range"
        )));
    }
    let micros = (REVERSE_TIMESTAMP_BASE - value) as i64;
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| Error::InvalidReverseTimestamp(format!("{s:?} is out of range")))
}

/// Serde adapter for `NaiveDateTime` fields using the wire format.
pub mod timestamp_format {
    use super::{format_timestamp, parse_timestamp};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
