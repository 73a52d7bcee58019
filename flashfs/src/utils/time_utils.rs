// SPDX-License-Identifier: MIT

//! Time utilities for file creation timestamps.
//!
//! On-device timestamps are 64-bit UNIX seconds (UTC). In `std` mode the
//! system clock is used; in `no_std` the epoch is returned as a fixed
//! fallback.

use time::OffsetDateTime;

/// Returns "now" as UNIX seconds.
pub fn now_unix() -> u64 {
    #[cfg(feature = "std")]
    {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        ts.max(0) as u64
    }

    #[cfg(not(feature = "std"))]
    {
        // Fallback: UNIX_EPOCH (1970-01-01T00:00:00Z).
        0
    }
}

/// Converts an on-device timestamp back to an [`OffsetDateTime`].
///
/// Out-of-range values collapse to the epoch rather than failing the read
/// path.
pub fn unix_to_datetime(secs: u64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs as i64).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        let now = now_unix();
        assert!(now > 1_577_836_800, "clock before 2020: {now}");
    }

    #[test]
    fn test_roundtrip() {
        let dt = unix_to_datetime(1_600_000_000);
        assert_eq!(dt.unix_timestamp(), 1_600_000_000);
        assert_eq!(unix_to_datetime(u64::MAX), OffsetDateTime::UNIX_EPOCH);
    }
}
