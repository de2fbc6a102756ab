//! Unix timestamps and their conversion into calendar time.

use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from the given system time.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Creates a unix timestamp from a timezone aware date.
    ///
    /// Returns `None` for dates before the UNIX epoch.
    pub fn from_datetime<Tz: TimeZone>(date_time: &DateTime<Tz>) -> Option<Self> {
        u64::try_from(date_time.timestamp()).ok().map(Self)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Returns the timestamp as chrono datetime in UTC.
    pub fn as_datetime(self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.0).ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    /// Returns the timestamp in the local timezone of this host.
    ///
    /// Falls back to the UNIX epoch for timestamps chrono cannot represent.
    pub fn as_local(self) -> DateTime<Local> {
        self.as_datetime().unwrap_or_default().with_timezone(&Local)
    }

    /// Moves the timestamp back by `duration`, saturating at the UNIX epoch.
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_secs()))
    }

    /// Aligns the timestamp down to a multiple of `interval`.
    ///
    /// A zero interval leaves the timestamp unchanged.
    pub fn align_down(self, interval: Duration) -> Self {
        match interval.as_secs() {
            0 => self,
            step => Self(self.0 - self.0 % step),
        }
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

impl std::ops::Sub for UnixTimestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration::from_secs(self.0.saturating_sub(rhs.0))
    }
}

/// An error returned from parsing [`UnixTimestamp`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid unix timestamp")]
pub struct ParseUnixTimestampError(());

impl std::str::FromStr for UnixTimestamp {
    type Err = ParseUnixTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ts = s.parse().or(Err(ParseUnixTimestampError(())))?;
        Ok(Self(ts))
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Self::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        let ts: UnixTimestamp = "1500000000".parse().unwrap();
        assert_eq!(ts.as_secs(), 1_500_000_000);
        assert!("-1".parse::<UnixTimestamp>().is_err());
        assert!("".parse::<UnixTimestamp>().is_err());
    }

    #[test]
    fn test_align_down() {
        let ts = UnixTimestamp::from_secs(1_000_123);
        assert_eq!(
            ts.align_down(Duration::from_secs(300)),
            UnixTimestamp::from_secs(999_900)
        );
        assert_eq!(ts.align_down(Duration::ZERO), ts);
    }

    #[test]
    fn test_saturating_sub() {
        let ts = UnixTimestamp::from_secs(10);
        assert_eq!(ts.saturating_sub(Duration::from_secs(60)), UnixTimestamp::from_secs(0));
        assert_eq!(ts - UnixTimestamp::from_secs(4), Duration::from_secs(6));
    }

    #[test]
    fn test_serde() {
        let ts = UnixTimestamp::from_secs(42);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "42");
        assert_eq!(serde_json::from_str::<UnixTimestamp>("42").unwrap(), ts);
    }
}
