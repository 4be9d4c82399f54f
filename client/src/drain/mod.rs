// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Replays queued mutations against the backend.
//!
//! A [`DrainEngine`] runs one drain pass at a time per execution context. A pass takes a snapshot
//! of the pending mutations and handles them strictly one after another in append order:
//!
//! 1. claim the mutation (skip it if it vanished or another context holds it),
//! 2. obtain the credential,
//! 3. send it to the backend,
//! 4. dequeue it on success and broadcast a sync completion, or release it for a later pass.
//!
//! A failing mutation never aborts the pass. The only fatal error is failing to read the queue.

use std::{
    fmt,
    sync::{Arc, atomic::AtomicBool},
};

use outboxcommon::{MutationId, QueuedMutation};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backend::Backend,
    bus::ContextBus,
    credentials::CredentialSource,
    network::NetworkStatus,
    queue::{MutationQueue, QueueError},
    utils::FlagGuard,
};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Foreground,
    Background,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Foreground => write!(f, "foreground"),
            ContextKind::Background => write!(f, "background"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass of the same engine is running.
    Busy,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Delivered and removed from the queue.
    pub sent: usize,
    /// Released again for a later pass.
    pub deferred: usize,
    /// Left alone because another context handles or handled them.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The pass did not run at all.
    Skipped(SkipReason),
    /// Every mutation of the snapshot was handled.
    Completed(DrainStats),
    /// The pass was stopped before handling every mutation of the snapshot.
    Interrupted(DrainStats),
}

impl DrainOutcome {
    pub fn ran(&self) -> bool {
        !matches!(self, DrainOutcome::Skipped(_))
    }

    pub fn stats(&self) -> DrainStats {
        match self {
            DrainOutcome::Skipped(_) => DrainStats::default(),
            DrainOutcome::Completed(stats) | DrainOutcome::Interrupted(stats) => *stats,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("Failed to read pending mutations: {0}")]
    Queue(#[from] QueueError),
}

enum Handled {
    Sent,
    Deferred,
    Skipped,
}

#[derive(Debug)]
pub struct DrainEngine<B: Backend, C: CredentialSource> {
    context: ContextKind,
    queue: MutationQueue,
    backend: B,
    credentials: C,
    bus: ContextBus,
    network: NetworkStatus,
    busy: Arc<AtomicBool>,
}

// Clones share the busy flag.
impl<B: Backend, C: CredentialSource> Clone for DrainEngine<B, C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context,
            queue: self.queue.clone(),
            backend: self.backend.clone(),
            credentials: self.credentials.clone(),
            bus: self.bus.clone(),
            network: self.network.clone(),
            busy: self.busy.clone(),
        }
    }
}

impl<B: Backend, C: CredentialSource> DrainEngine<B, C> {
    pub fn new(
        context: ContextKind,
        queue: MutationQueue,
        backend: B,
        credentials: C,
        bus: ContextBus,
        network: NetworkStatus,
    ) -> Self {
        Self {
            context,
            queue,
            backend,
            credentials,
            bus,
            network,
            busy: Default::default(),
        }
    }

    pub fn context(&self) -> ContextKind {
        self.context
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Runs a drain pass unless one is already running in this engine.
    pub async fn drain(&self) -> Result<DrainOutcome, DrainError> {
        self.drain_until(&CancellationToken::new()).await
    }

    /// Like [`DrainEngine::drain`], but stops between two mutations once `cancel` fires.
    ///
    /// A send which already started always runs to completion.
    pub async fn drain_until(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DrainOutcome, DrainError> {
        let context = self.context;
        let Some(_busy) = FlagGuard::acquire(&self.busy) else {
            debug!(%context, "Drain pass already running");
            return Ok(DrainOutcome::Skipped(SkipReason::Busy));
        };
        if !self.network.is_online() {
            debug!(%context, "Offline, not draining");
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }

        let pending = self.queue.list_pending().await?;
        if pending.is_empty() {
            debug!(%context, "Nothing to drain");
            return Ok(DrainOutcome::Completed(DrainStats::default()));
        }
        info!(%context, pending = pending.len(), "Draining queued mutations");

        let mut stats = DrainStats::default();
        for mutation in pending {
            if cancel.is_cancelled() {
                info!(%context, ?stats, "Drain pass stopped");
                return Ok(DrainOutcome::Interrupted(stats));
            }
            match self.handle(&mutation).await {
                Handled::Sent => stats.sent += 1,
                Handled::Deferred => stats.deferred += 1,
                Handled::Skipped => stats.skipped += 1,
            }
        }

        info!(
            %context,
            sent = stats.sent,
            deferred = stats.deferred,
            skipped = stats.skipped,
            "Drain pass completed"
        );
        Ok(DrainOutcome::Completed(stats))
    }

    async fn handle(&self, mutation: &QueuedMutation) -> Handled {
        let id = mutation.id;
        let context = self.context;

        match self.queue.claim(id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%context, %id, "Mutation is handled by another context");
                return Handled::Skipped;
            }
            Err(error) if error.is_not_found() => {
                debug!(%context, %id, "Mutation was already delivered");
                return Handled::Skipped;
            }
            Err(error) => {
                warn!(%context, %id, %error, "Failed to claim mutation");
                return Handled::Skipped;
            }
        }

        let token = match self.credentials.credential().await {
            Ok(token) => token,
            Err(error) => {
                info!(%context, %id, %error, "No credential, deferring mutation");
                self.release(id).await;
                return Handled::Deferred;
            }
        };

        let sent = self
            .backend
            .send(
                &mutation.endpoint,
                mutation.method,
                mutation.data.as_ref(),
                &token,
            )
            .await;
        if let Err(error) = sent {
            info!(
                %context,
                %id,
                endpoint = %mutation.endpoint,
                method = %mutation.method,
                %error,
                "Failed to deliver mutation, deferring"
            );
            self.release(id).await;
            return Handled::Deferred;
        }

        match self.queue.dequeue(id).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {
                debug!(%context, %id, "Delivered mutation was already removed");
            }
            Err(error) => {
                // The claim stays in place, so the mutation is retried only after the lease.
                error!(%context, %id, %error, "Failed to dequeue delivered mutation");
                return Handled::Sent;
            }
        }
        info!(
            %context,
            %id,
            endpoint = %mutation.endpoint,
            method = %mutation.method,
            "Delivered queued mutation"
        );
        self.bus
            .notify_sync_completed(mutation.endpoint.clone(), mutation.method);
        Handled::Sent
    }

    async fn release(&self, id: MutationId) {
        match self.queue.release(id).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(context = %self.context, %id, "Mutation was taken over by another context")
            }
            Err(error) => {
                error!(context = %self.context, %id, %error, "Failed to release mutation")
            }
        }
    }
}
