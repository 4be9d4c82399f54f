// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The queued mutation record and its identifiers.

use std::{fmt, str::FromStr};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use sqlx::{
    Database, Decode, Encode, Sqlite, Type, encode::IsNull, error::BoxDynError,
    sqlite::SqliteTypeInfo,
};
use uuid::Uuid;

use crate::time::TimeStamp;

/// Store-assigned identifier of a queued mutation.
///
/// Identifiers are assigned monotonically, so ordering by id is append order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MutationId(i64);

impl MutationId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// HTTP verb of a queued mutation.
///
/// There is no `GET`: reads are never queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported method for a queued mutation: {0}")]
pub struct UnsupportedMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(UnsupportedMethod(s.to_owned())),
        }
    }
}

impl Type<Sqlite> for HttpMethod {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <String as Type<Sqlite>>::compatible(ty)
    }
}

impl<'r> Decode<'r, Sqlite> for HttpMethod {
    fn decode(value: <Sqlite as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = Decode::<Sqlite>::decode(value)?;
        Ok(s.parse()?)
    }
}

impl<'q> Encode<'q, Sqlite> for HttpMethod {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        <&str as Encode<Sqlite>>::encode(self.as_str(), buf)
    }
}

/// Identifies the execution context holding a claim on a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ClaimOwner(Uuid);

impl ClaimOwner {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClaimOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A cooperative lock on a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub owner: ClaimOwner,
    pub acquired_at: TimeStamp,
}

impl Claim {
    /// A claim older than `lease` is considered abandoned.
    pub fn is_expired(&self, lease: Duration, now: TimeStamp) -> bool {
        self.acquired_at.is_older_than(lease, now)
    }
}

/// A mutation that is about to be queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMutation {
    pub endpoint: String,
    pub method: HttpMethod,
    pub data: Option<serde_json::Value>,
}

/// A mutating request recorded while it could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    /// Path relative to the backend origin, e.g. `/responses`
    pub endpoint: String,
    pub method: HttpMethod,
    pub data: Option<serde_json::Value>,
    pub timestamp: TimeStamp,
    /// Set while a drain pass attempts to send this mutation
    pub processing: bool,
    pub claim: Option<Claim>,
}

impl QueuedMutation {
    /// Returns true if no drain pass holds a live claim on this mutation.
    ///
    /// A processing mutation without claim information, or with a claim older than `lease`,
    /// counts as abandoned and therefore pending.
    pub fn is_pending(&self, lease: Duration, now: TimeStamp) -> bool {
        if !self.processing {
            return true;
        }
        self.claim.is_none_or(|claim| claim.is_expired(lease, now))
    }

    /// Returns true if `owner` holds the current claim, expired or not.
    pub fn is_claimed_by(&self, owner: ClaimOwner) -> bool {
        self.processing && self.claim.is_some_and(|claim| claim.owner == owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutation(processing: bool, claim: Option<Claim>) -> QueuedMutation {
        QueuedMutation {
            id: MutationId::new(1),
            endpoint: "/responses".to_owned(),
            method: HttpMethod::Post,
            data: None,
            timestamp: TimeStamp::from_millis(0).unwrap(),
            processing,
            claim,
        }
    }

    #[test]
    fn get_is_not_a_queueable_method() {
        assert!("GET".parse::<HttpMethod>().is_err());
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!(
            serde_json::to_string(&HttpMethod::Delete).unwrap(),
            "\"DELETE\""
        );
    }

    #[test]
    fn pending_respects_claim_lease() {
        let lease = Duration::seconds(60);
        let acquired_at = TimeStamp::from_millis(1_000).unwrap();
        let claim = Claim {
            owner: ClaimOwner::random(),
            acquired_at,
        };

        assert!(mutation(false, None).is_pending(lease, acquired_at));
        assert!(mutation(true, None).is_pending(lease, acquired_at));

        let claimed = mutation(true, Some(claim));
        assert!(!claimed.is_pending(lease, acquired_at));
        let later = TimeStamp::from_millis(1_000 + 61_000).unwrap();
        assert!(claimed.is_pending(lease, later));
    }

    #[test]
    fn claimed_by_owner() {
        let owner = ClaimOwner::random();
        let claim = Claim {
            owner,
            acquired_at: TimeStamp::now(),
        };
        assert!(mutation(true, Some(claim)).is_claimed_by(owner));
        assert!(!mutation(true, Some(claim)).is_claimed_by(ClaimOwner::random()));
        assert!(!mutation(false, Some(claim)).is_claimed_by(owner));
    }
}
