// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client API of the offline queue.
//!
//! Every execution context works with its own [`MutationQueue`] handle. The handle carries a
//! random [`ClaimOwner`], so that claims of different contexts can be told apart.

use chrono::Duration;
use outboxcommon::{
    Claim, ClaimOwner, HttpMethod, MutationId, NewMutation, QueuedMutation, TimeStamp,
};
use tracing::{debug, info};

use crate::store::{MutationRecord, QueueStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The mutation was removed, most likely by a drain pass of another context.
    #[error("Queued mutation {0} not found")]
    NotFound(MutationId),
}

impl QueueError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }
}

#[derive(Debug, Clone)]
pub struct MutationQueue {
    store: QueueStore,
    owner: ClaimOwner,
    claim_lease: Duration,
}

impl MutationQueue {
    /// Creates a queue handle with a fresh claim owner.
    ///
    /// Claims older than `claim_lease` are treated as abandoned.
    pub fn new(store: QueueStore, claim_lease: Duration) -> Self {
        Self {
            store,
            owner: ClaimOwner::random(),
            claim_lease,
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn owner(&self) -> ClaimOwner {
        self.owner
    }

    /// Appends a mutation to the queue.
    pub async fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        data: Option<serde_json::Value>,
    ) -> Result<MutationId, QueueError> {
        let mutation = NewMutation {
            endpoint: endpoint.into(),
            method,
            data,
        };
        let id = self.store.add(&mutation, TimeStamp::now()).await?;
        info!(%id, endpoint = %mutation.endpoint, %method, "Queued mutation for later delivery");
        Ok(id)
    }

    /// Returns a snapshot of all mutations not claimed by a live drain pass, in append order.
    pub async fn list_pending(&self) -> Result<Vec<QueuedMutation>, QueueError> {
        let now = TimeStamp::now();
        let mut mutations = self.store.scan().await?;
        mutations.retain(|mutation| mutation.is_pending(self.claim_lease, now));
        Ok(mutations)
    }

    pub async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.list_pending().await?.len())
    }

    /// Marks the mutation as processing by this queue's owner.
    ///
    /// Returns `false` if another owner holds a claim which has not expired yet. Fails with
    /// [`QueueError::NotFound`] if the mutation no longer exists.
    pub async fn claim(&self, id: MutationId) -> Result<bool, QueueError> {
        let owner = self.owner;
        let lease = self.claim_lease;
        self.store
            .with_transaction(async |txn| {
                let Some(mut mutation) = MutationRecord::load(txn.as_mut(), id).await? else {
                    return Err(QueueError::NotFound(id));
                };

                let now = TimeStamp::now();
                if !mutation.is_pending(lease, now) && !mutation.is_claimed_by(owner) {
                    debug!(%id, claim = ?mutation.claim, "Mutation is claimed by another owner");
                    return Ok(false);
                }

                mutation.processing = true;
                mutation.claim = Some(Claim {
                    owner,
                    acquired_at: now,
                });
                MutationRecord::store(txn.as_mut(), &mutation).await?;
                debug!(%id, %owner, "Claimed mutation");
                Ok(true)
            })
            .await
    }

    /// Clears the processing flag, so that a later drain pass retries the mutation.
    ///
    /// A missing mutation counts as released. Returns `false` if another owner holds a live claim,
    /// in which case the mutation is left untouched.
    pub async fn release(&self, id: MutationId) -> Result<bool, QueueError> {
        let owner = self.owner;
        let lease = self.claim_lease;
        self.store
            .with_transaction(async |txn| {
                let Some(mut mutation) = MutationRecord::load(txn.as_mut(), id).await? else {
                    debug!(%id, "Released mutation no longer exists");
                    return Ok(true);
                };
                if !mutation.processing {
                    return Ok(true);
                }

                let now = TimeStamp::now();
                if !mutation.is_pending(lease, now) && !mutation.is_claimed_by(owner) {
                    debug!(%id, claim = ?mutation.claim, "Not releasing a claim of another owner");
                    return Ok(false);
                }

                mutation.processing = false;
                mutation.claim = None;
                MutationRecord::store(txn.as_mut(), &mutation).await?;
                debug!(%id, %owner, "Released mutation");
                Ok(true)
            })
            .await
    }

    /// Removes the mutation from the queue.
    ///
    /// Fails with [`QueueError::NotFound`] if it was already removed.
    pub async fn dequeue(&self, id: MutationId) -> Result<(), QueueError> {
        if !self.store.delete(id).await? {
            return Err(QueueError::NotFound(id));
        }
        debug!(%id, "Dequeued mutation");
        Ok(())
    }
}
