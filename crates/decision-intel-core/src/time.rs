// decision-intel-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: Wall-clock timestamp wrapper used across decision records.
// Purpose: Provide a single serializable timestamp type with a stable wire
//          format (RFC 3339) independent of the underlying clock crate.
// Dependencies: time, serde
// ============================================================================

//! ## Overview
//! `Timestamp` wraps `time::OffsetDateTime` so the rest of the workspace does
//! not need to reason about the underlying clock crate. Components that need
//! a monotonic clock (the circuit breaker's sliding window) use
//! [`std::time::Instant`] directly; `Timestamp` is reserved for wall-clock
//! values that are persisted or shown to a caller.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A wall-clock instant, serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing `OffsetDateTime`.
    #[must_use]
    pub const fn from_offset_date_time(value: OffsetDateTime) -> Self {
        Self(value)
    }

    /// Returns the inner `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns the number of whole milliseconds elapsed since `earlier`.
    ///
    /// Returns `0` when `self` is not after `earlier`.
    #[must_use]
    pub fn millis_since(&self, earlier: &Self) -> i64 {
        let delta = self.0 - earlier.0;
        delta.whole_milliseconds().max(0) as i64
    }

    /// Returns `self + duration_ms` milliseconds.
    #[must_use]
    pub fn plus_millis(&self, duration_ms: i64) -> Self {
        Self(self.0 + time::Duration::milliseconds(duration_ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.format(&Rfc3339) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<invalid-timestamp>"),
        }
    }
}

mod rfc3339 {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use time::OffsetDateTime;
    use time::format_description::well_known::Rfc3339;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, ser: S) -> Result<S::Ok, S::Error> {
        let text = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        ser.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<OffsetDateTime, D::Error> {
        let text = String::deserialize(de)?;
        OffsetDateTime::parse(&text, &Rfc3339).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn round_trips_through_json() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).expect("serialize");
        let back: Timestamp = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ts, back);
    }

    #[test]
    fn millis_since_is_nonnegative() {
        let earlier = Timestamp::now();
        let later = earlier.plus_millis(1500);
        assert_eq!(later.millis_since(&earlier), 1500);
        assert_eq!(earlier.millis_since(&later), 0);
    }
}
