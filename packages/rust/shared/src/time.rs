//! Conversion between caller timestamps and the stored time representation.
//!
//! History rows persist timestamps as microseconds since 1601-01-01 UTC,
//! the WebKit/Chromium history format. Everything public-facing uses
//! [`DateTime<Utc>`]; conversion happens at the storage boundary in both
//! directions. Precision is milliseconds, so stored values are always a
//! multiple of 1000.

use chrono::{DateTime, Utc};

/// Microseconds between 1601-01-01 and 1970-01-01.
const WEBKIT_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Encode a UTC timestamp into WebKit microseconds for storage.
pub fn to_webkit_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis() * 1_000 + WEBKIT_EPOCH_OFFSET_MICROS
}

/// Decode a stored WebKit microsecond value back into a UTC timestamp.
///
/// Values outside chrono's representable range clamp to the range bound
/// instead of panicking.
pub fn from_webkit_micros(micros: i64) -> DateTime<Utc> {
    let unix_millis = micros.saturating_sub(WEBKIT_EPOCH_OFFSET_MICROS) / 1_000;
    DateTime::from_timestamp_millis(unix_millis).unwrap_or(if unix_millis < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_reference_value() {
        let epoch = DateTime::from_timestamp_millis(0).expect("unix epoch");
        assert_eq!(to_webkit_micros(epoch), WEBKIT_EPOCH_OFFSET_MICROS);
        assert_eq!(from_webkit_micros(WEBKIT_EPOCH_OFFSET_MICROS), epoch);
    }

    #[test]
    fn round_trip_preserves_millisecond_precision() {
        let t = DateTime::from_timestamp_millis(1_700_000_000_123).expect("in range");
        assert_eq!(from_webkit_micros(to_webkit_micros(t)), t);
    }

    #[test]
    fn encoding_preserves_ordering() {
        let earlier = DateTime::from_timestamp_millis(1_000).expect("in range");
        let later = DateTime::from_timestamp_millis(2_000).expect("in range");
        assert!(to_webkit_micros(earlier) < to_webkit_micros(later));
    }

    #[test]
    fn out_of_range_decodes_clamp() {
        assert_eq!(from_webkit_micros(i64::MIN), DateTime::<Utc>::MIN_UTC);
        assert_eq!(from_webkit_micros(i64::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
