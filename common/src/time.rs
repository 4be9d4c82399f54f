// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::ops::Deref;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    Database, Decode, Encode, Sqlite, Type, encode::IsNull, error::BoxDynError,
    sqlite::SqliteTypeInfo,
};

/// A point in time with millisecond precision.
///
/// Serialized and persisted as milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeStamp(#[serde(with = "chrono::serde::ts_milliseconds")] DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Returns `None` if `millis` is out of the representable range.
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Returns true if more than `age` has passed between `self` and `now`.
    pub fn is_older_than(&self, age: Duration, now: TimeStamp) -> bool {
        now.0 - self.0 > age
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(time: DateTime<Utc>) -> Self {
        // Truncate to the persisted precision, so that values survive a store round trip.
        Self::from_millis(time.timestamp_millis()).unwrap_or(Self(time))
    }
}

impl Deref for TimeStamp {
    type Target = DateTime<Utc>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Type<Sqlite> for TimeStamp {
    fn type_info() -> SqliteTypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <i64 as Type<Sqlite>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Sqlite> for TimeStamp {
    fn decode(value: <Sqlite as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
        let millis: i64 = Decode::<Sqlite>::decode(value)?;
        TimeStamp::from_millis(millis)
            .ok_or_else(|| format!("Timestamp out of range: {millis}").into())
    }
}

impl<'q> Encode<'q, Sqlite> for TimeStamp {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        <i64 as Encode<Sqlite>>::encode(self.as_millis(), buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_epoch_millis() {
        let timestamp = TimeStamp::from_millis(1_700_000_000_123).unwrap();
        let json = serde_json::to_string(&timestamp).unwrap();
        assert_eq!(json, "1700000000123");
        let decoded: TimeStamp = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, timestamp);
    }

    #[test]
    fn now_has_millisecond_precision() {
        let now = TimeStamp::now();
        assert_eq!(TimeStamp::from_millis(now.as_millis()), Some(now));
    }

    #[test]
    fn age_comparison() {
        let then = TimeStamp::from_millis(10_000).unwrap();
        let now = TimeStamp::from_millis(40_000).unwrap();
        assert!(then.is_older_than(Duration::seconds(29), now));
        assert!(!then.is_older_than(Duration::seconds(30), now));
    }
}
