// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use outboxcommon::{
    Claim, ClaimOwner, HttpMethod, MutationId, NewMutation, QueuedMutation, TimeStamp,
};
use sqlx::{SqliteExecutor, query, query_as, query_scalar};
use tracing::debug;

use super::StoreError;

/// Row of the `offline_requests` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MutationRecord {
    id: MutationId,
    endpoint: String,
    method: HttpMethod,
    data: Option<String>,
    timestamp: TimeStamp,
    processing: bool,
    claimed_by: Option<ClaimOwner>,
    claimed_at: Option<TimeStamp>,
}

impl MutationRecord {
    fn into_mutation(self) -> Result<QueuedMutation, StoreError> {
        let data = self
            .data
            .map(|data| serde_json::from_str(&data))
            .transpose()?;
        let claim = match (self.claimed_by, self.claimed_at) {
            (Some(owner), Some(acquired_at)) => Some(Claim { owner, acquired_at }),
            _ => None,
        };
        Ok(QueuedMutation {
            id: self.id,
            endpoint: self.endpoint,
            method: self.method,
            data,
            timestamp: self.timestamp,
            processing: self.processing,
            claim,
        })
    }

    pub(crate) async fn insert(
        executor: impl SqliteExecutor<'_>,
        mutation: &NewMutation,
        timestamp: TimeStamp,
    ) -> Result<MutationId, StoreError> {
        let data = encode_data(mutation.data.as_ref())?;
        let id: MutationId = query_scalar(
            "INSERT INTO offline_requests
                (endpoint, method, data, timestamp, processing)
            VALUES (?1, ?2, ?3, ?4, FALSE)
            RETURNING id",
        )
        .bind(mutation.endpoint.as_str())
        .bind(mutation.method)
        .bind(data)
        .bind(timestamp)
        .fetch_one(executor)
        .await?;
        debug!(%id, endpoint = %mutation.endpoint, method = %mutation.method, "Stored mutation");
        Ok(id)
    }

    pub(crate) async fn load(
        executor: impl SqliteExecutor<'_>,
        id: MutationId,
    ) -> Result<Option<QueuedMutation>, StoreError> {
        query_as::<_, MutationRecord>(
            "SELECT id, endpoint, method, data, timestamp, processing, claimed_by, claimed_at
            FROM offline_requests
            WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?
        .map(MutationRecord::into_mutation)
        .transpose()
    }

    pub(crate) async fn load_all(
        executor: impl SqliteExecutor<'_>,
    ) -> Result<Vec<QueuedMutation>, StoreError> {
        query_as::<_, MutationRecord>(
            "SELECT id, endpoint, method, data, timestamp, processing, claimed_by, claimed_at
            FROM offline_requests
            ORDER BY id ASC",
        )
        .fetch_all(executor)
        .await?
        .into_iter()
        .map(MutationRecord::into_mutation)
        .collect()
    }

    pub(crate) async fn store(
        executor: impl SqliteExecutor<'_>,
        mutation: &QueuedMutation,
    ) -> Result<bool, StoreError> {
        let data = encode_data(mutation.data.as_ref())?;
        let claimed_by = mutation.claim.map(|claim| claim.owner);
        let claimed_at = mutation.claim.map(|claim| claim.acquired_at);
        let result = query(
            "UPDATE offline_requests
            SET endpoint = ?1,
                method = ?2,
                data = ?3,
                timestamp = ?4,
                processing = ?5,
                claimed_by = ?6,
                claimed_at = ?7
            WHERE id = ?8",
        )
        .bind(mutation.endpoint.as_str())
        .bind(mutation.method)
        .bind(data)
        .bind(mutation.timestamp)
        .bind(mutation.processing)
        .bind(claimed_by)
        .bind(claimed_at)
        .bind(mutation.id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub(crate) async fn delete(
        executor: impl SqliteExecutor<'_>,
        id: MutationId,
    ) -> Result<bool, StoreError> {
        let result = query("DELETE FROM offline_requests WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// JSON `null` is stored as an absent payload.
fn encode_data(data: Option<&serde_json::Value>) -> Result<Option<String>, StoreError> {
    data.filter(|data| !data.is_null())
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}
