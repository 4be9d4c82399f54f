// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The foreground side of the offline queue.
//!
//! A [`ForegroundContext`] lives as long as the application is open. It
//! * submits mutations, queueing them when the backend is unreachable,
//! * answers credential requests of the background agent,
//! * drains the queue on application load and whenever connectivity is restored.

use std::sync::atomic::{AtomicBool, Ordering};

use outboxcommon::{
    HttpMethod, MutationId,
    messages::{AuthTokenReply, ForegroundRequest, Notification},
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backend::{Backend, HttpBackend, TransportError},
    bus::{ContextBus, RequestReceiver},
    credentials::{CredentialError, CredentialSource, LocalCredentials},
    drain::{ContextKind, DrainEngine, DrainError, DrainOutcome},
    network::NetworkStatus,
    queue::{MutationQueue, QueueError},
    settings::SyncSettings,
    store::QueueStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The backend accepted the mutation.
    Sent,
    /// The mutation was queued for later delivery.
    Queued(MutationId),
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The backend was reached but rejected the mutation.
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[derive(Debug)]
pub struct ForegroundContext<B: Backend = HttpBackend> {
    engine: DrainEngine<B, LocalCredentials>,
    bus: ContextBus,
    network: NetworkStatus,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl<B: Backend> ForegroundContext<B> {
    pub fn new(
        store: QueueStore,
        backend: B,
        bus: ContextBus,
        network: NetworkStatus,
        credentials: LocalCredentials,
        settings: &SyncSettings,
    ) -> Self {
        let engine = DrainEngine::new(
            ContextKind::Foreground,
            MutationQueue::new(store, settings.claim_lease),
            backend,
            credentials,
            bus.clone(),
            network.clone(),
        );
        Self {
            engine,
            bus,
            network,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Connects to the bus and spawns the credential responder and the connectivity watcher.
    ///
    /// Both tasks run until [`ForegroundContext::stop`] is called or the context is dropped.
    /// Calling this more than once has no effect.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let (requests, _) = self.bus.connect_foreground().into_parts();

        let credentials = self.engine.credentials().clone();
        tokio::spawn(
            self.cancel
                .clone()
                .run_until_cancelled_owned(answer_requests(requests, credentials)),
        );

        let engine = self.engine.clone();
        let online_rx = self.network.subscribe();
        tokio::spawn(
            self.cancel
                .clone()
                .run_until_cancelled_owned(drain_on_reconnect(engine, online_rx)),
        );
        debug!("Foreground context started");
    }

    /// Disconnects from the bus and stops the background tasks of this context.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn queue(&self) -> &MutationQueue {
        self.engine.queue()
    }

    pub fn credentials(&self) -> &LocalCredentials {
        self.engine.credentials()
    }

    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    /// Notifications of completed syncs and cache updates.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    pub async fn pending_count(&self) -> Result<usize, QueueError> {
        self.engine.queue().pending_count().await
    }

    /// Drains the queue after the application was loaded.
    pub async fn on_app_load(&self) -> Result<DrainOutcome, DrainError> {
        info!("Application loaded");
        self.engine.drain().await
    }

    /// Drains the queue after connectivity was restored.
    pub async fn on_connectivity_restored(&self) -> Result<DrainOutcome, DrainError> {
        info!("Connectivity restored");
        self.engine.drain().await
    }

    /// Sends a mutation to the backend, queueing it if that is not possible right now.
    ///
    /// While offline, or if the backend cannot be reached, the mutation is queued and the
    /// background agent is asked to sync. A rejection by the backend is returned to the caller.
    pub async fn submit(
        &self,
        endpoint: impl Into<String>,
        method: HttpMethod,
        data: Option<serde_json::Value>,
    ) -> Result<Submission, SubmitError> {
        let endpoint = endpoint.into();
        if !self.network.is_online() {
            debug!(%endpoint, %method, "Offline, queueing mutation");
            return self.queue_for_later(endpoint, method, data).await;
        }

        let token = self.engine.credentials().credential().await?;
        match self
            .engine
            .backend()
            .send(&endpoint, method, data.as_ref(), &token)
            .await
        {
            Ok(()) => Ok(Submission::Sent),
            Err(error) if error.is_network() => {
                warn!(%endpoint, %method, %error, "Backend unreachable, queueing mutation");
                self.queue_for_later(endpoint, method, data).await
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn queue_for_later(
        &self,
        endpoint: String,
        method: HttpMethod,
        data: Option<serde_json::Value>,
    ) -> Result<Submission, SubmitError> {
        let id = self.engine.queue().enqueue(endpoint, method, data).await?;
        self.bus.request_background_sync();
        Ok(Submission::Queued(id))
    }
}

impl<B: Backend> Drop for ForegroundContext<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn answer_requests(mut requests: RequestReceiver, credentials: LocalCredentials) {
    while let Some(incoming) = requests.next_request().await {
        match incoming.request() {
            ForegroundRequest::GetAuthToken => {
                let token = credentials.current();
                debug!(has_token = token.is_some(), "Answering auth token request");
                incoming.reply(AuthTokenReply { token });
            }
        }
    }
}

async fn drain_on_reconnect<B: Backend>(
    engine: DrainEngine<B, LocalCredentials>,
    mut online_rx: watch::Receiver<bool>,
) {
    let mut was_online = *online_rx.borrow_and_update();
    while online_rx.changed().await.is_ok() {
        let online = *online_rx.borrow_and_update();
        if online && !was_online {
            info!("Connectivity restored");
            if let Err(error) = engine.drain().await {
                error!(%error, "Drain after reconnect failed");
            }
        }
        was_online = online;
    }
}
