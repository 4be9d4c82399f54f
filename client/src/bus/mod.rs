// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message bus between the foreground contexts and the background agent.
//!
//! The bus carries three kinds of traffic:
//! * requests from the background agent to exactly one foreground context, answered through a
//!   private reply channel ([`ForegroundRequest`]),
//! * requests from a foreground context to the background agent ([`BackgroundRequest`]),
//! * fire-and-forget broadcasts to every listening foreground context ([`Notification`]).

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use outboxcommon::{
    AuthToken, HttpMethod,
    messages::{AuthTokenReply, BackgroundRequest, ForegroundRequest, Notification},
};
use parking_lot::Mutex;
use tokio::{
    sync::{
        broadcast,
        mpsc::{self, error::TrySendError},
    },
    time::timeout,
};
use tracing::{debug, warn};

use crate::credentials::CredentialError;

use response::{Responder, responder};

mod response;

const REQUEST_CHANNEL_CAPACITY: usize = 16;
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ContextBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    next_foreground_id: AtomicU64,
    foregrounds: Mutex<Vec<ForegroundSlot>>,
    background: Mutex<Option<mpsc::Sender<BackgroundRequest>>>,
    notifications: broadcast::Sender<Notification>,
}

#[derive(Debug)]
struct ForegroundSlot {
    id: u64,
    requests: mpsc::Sender<IncomingRequest>,
}

impl Default for ContextBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBus {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                next_foreground_id: AtomicU64::new(0),
                foregrounds: Mutex::new(Vec::new()),
                background: Mutex::new(None),
                notifications,
            }),
        }
    }

    /// Registers a foreground context.
    ///
    /// The context counts as connected until the returned port is dropped.
    pub fn connect_foreground(&self) -> ForegroundPort {
        let id = self.inner.next_foreground_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        self.inner.foregrounds.lock().push(ForegroundSlot { id, requests: tx });
        debug!(id, "Foreground context connected");
        ForegroundPort {
            id,
            requests: rx,
            notifications: self.inner.notifications.subscribe(),
        }
    }

    /// Number of currently connected foreground contexts.
    pub fn connected_foregrounds(&self) -> usize {
        let mut foregrounds = self.inner.foregrounds.lock();
        foregrounds.retain(|slot| !slot.requests.is_closed());
        foregrounds.len()
    }

    /// Returns the oldest foreground context which is still connected.
    fn live_foreground(&self) -> Option<(u64, mpsc::Sender<IncomingRequest>)> {
        let mut foregrounds = self.inner.foregrounds.lock();
        foregrounds.retain(|slot| !slot.requests.is_closed());
        foregrounds
            .first()
            .map(|slot| (slot.id, slot.requests.clone()))
    }

    /// Asks a connected foreground context for its credential.
    ///
    /// Fails immediately if no foreground context is connected. Waiting for the reply is bounded
    /// by `reply_timeout`.
    pub async fn request_auth_token(
        &self,
        reply_timeout: Duration,
    ) -> Result<AuthToken, CredentialError> {
        let Some((id, foreground)) = self.live_foreground() else {
            return Err(CredentialError::NoForegroundContext);
        };
        debug!(id, "Requesting auth token from foreground context");

        let (responder, response) = responder();
        let request = IncomingRequest {
            request: ForegroundRequest::GetAuthToken,
            responder,
        };
        let exchange = async {
            foreground
                .send(request)
                .await
                .map_err(|_| CredentialError::Cancelled)?;
            response.await.map_err(|_| CredentialError::Cancelled)
        };

        let reply = match timeout(reply_timeout, exchange).await {
            Ok(reply) => reply?,
            Err(_) => return Err(CredentialError::Timeout(reply_timeout)),
        };
        reply.token.ok_or(CredentialError::Missing)
    }

    /// Subscribes to broadcasts without registering a foreground context.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Sends a notification to everyone listening right now.
    pub fn broadcast(&self, notification: Notification) {
        match self.inner.notifications.send(notification) {
            Ok(receivers) => debug!(receivers, "Broadcast notification"),
            Err(broadcast::error::SendError(notification)) => {
                debug!(?notification, "No listeners for notification");
            }
        }
    }

    pub fn notify_sync_completed(&self, endpoint: impl Into<String>, method: HttpMethod) {
        self.broadcast(Notification::SyncCompleted {
            endpoint: endpoint.into(),
            method,
        });
    }

    pub fn notify_cache_updated(&self, url: impl Into<String>) {
        self.broadcast(Notification::CacheUpdated { url: url.into() });
    }

    /// Attaches the background agent.
    ///
    /// A previously attached agent stops receiving requests.
    pub fn attach_background(&self) -> mpsc::Receiver<BackgroundRequest> {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        *self.inner.background.lock() = Some(tx);
        rx
    }

    /// Asks the background agent to drain the queue.
    ///
    /// Returns false if no background agent is attached.
    pub fn request_background_sync(&self) -> bool {
        let background = self.inner.background.lock().clone();
        let Some(background) = background else {
            debug!("No background agent attached");
            return false;
        };
        match background.try_send(BackgroundRequest::SyncNow) {
            // A full channel already holds sync requests, which is just as good.
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => {
                warn!("Background agent is gone");
                false
            }
        }
    }
}

/// Connection of a foreground context to the bus.
#[derive(Debug)]
pub struct ForegroundPort {
    id: u64,
    requests: mpsc::Receiver<IncomingRequest>,
    notifications: broadcast::Receiver<Notification>,
}

impl ForegroundPort {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next request addressed to this context.
    ///
    /// Returns `None` when the bus is gone.
    pub async fn next_request(&mut self) -> Option<IncomingRequest> {
        self.requests.recv().await
    }

    /// Waits for the next broadcast.
    ///
    /// Notifications this context fell behind on are skipped. Returns `None` when the bus is gone.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        loop {
            match self.notifications.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Foreground context missed notifications");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Splits off the broadcast receiver, e.g. to listen for notifications in a separate task.
    pub fn into_parts(self) -> (RequestReceiver, broadcast::Receiver<Notification>) {
        (
            RequestReceiver {
                requests: self.requests,
            },
            self.notifications,
        )
    }
}

/// Request half of a [`ForegroundPort`].
#[derive(Debug)]
pub struct RequestReceiver {
    requests: mpsc::Receiver<IncomingRequest>,
}

impl RequestReceiver {
    pub async fn next_request(&mut self) -> Option<IncomingRequest> {
        self.requests.recv().await
    }
}

/// A request delivered to a foreground context, together with its reply channel.
#[derive(Debug)]
pub struct IncomingRequest {
    request: ForegroundRequest,
    responder: Responder<AuthTokenReply>,
}

impl IncomingRequest {
    pub fn request(&self) -> ForegroundRequest {
        self.request
    }

    pub fn reply(self, reply: AuthTokenReply) {
        self.responder.send(reply);
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn no_foreground_fails_immediately() {
        let bus = ContextBus::new();
        let started = Instant::now();

        let error = bus.request_auth_token(REPLY_TIMEOUT).await.unwrap_err();

        assert!(matches!(error, CredentialError::NoForegroundContext));
        assert!(started.elapsed() < REPLY_TIMEOUT);
    }

    #[tokio::test]
    async fn foreground_replies_with_token() {
        let bus = ContextBus::new();
        let mut port = bus.connect_foreground();
        tokio::spawn(async move {
            while let Some(incoming) = port.next_request().await {
                assert_eq!(incoming.request(), ForegroundRequest::GetAuthToken);
                incoming.reply(AuthTokenReply {
                    token: Some(AuthToken::new("token")),
                });
            }
        });

        let token = bus.request_auth_token(REPLY_TIMEOUT).await.unwrap();
        assert_eq!(token.expose(), "token");
    }

    #[tokio::test]
    async fn foreground_without_token_is_missing() {
        let bus = ContextBus::new();
        let mut port = bus.connect_foreground();
        tokio::spawn(async move {
            while let Some(incoming) = port.next_request().await {
                incoming.reply(AuthTokenReply::default());
            }
        });

        let error = bus.request_auth_token(REPLY_TIMEOUT).await.unwrap_err();
        assert!(matches!(error, CredentialError::Missing));
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_foreground_times_out() {
        let bus = ContextBus::new();
        // Keeps the port alive without ever reading from it.
        let _port = bus.connect_foreground();
        let started = Instant::now();

        let error = bus.request_auth_token(REPLY_TIMEOUT).await.unwrap_err();

        assert!(matches!(error, CredentialError::Timeout(_)));
        assert!(started.elapsed() >= REPLY_TIMEOUT);
    }

    #[tokio::test]
    async fn dropped_request_is_cancelled() {
        let bus = ContextBus::new();
        let mut port = bus.connect_foreground();
        tokio::spawn(async move {
            while let Some(incoming) = port.next_request().await {
                drop(incoming);
            }
        });

        let error = bus.request_auth_token(REPLY_TIMEOUT).await.unwrap_err();
        assert!(matches!(error, CredentialError::Cancelled));
    }

    #[tokio::test]
    async fn dropped_ports_are_disconnected() {
        let bus = ContextBus::new();
        let first = bus.connect_foreground();
        let second = bus.connect_foreground();
        assert_eq!(bus.connected_foregrounds(), 2);

        drop(first);
        assert_eq!(bus.connected_foregrounds(), 1);
        drop(second);
        assert_eq!(bus.connected_foregrounds(), 0);

        let error = bus.request_auth_token(REPLY_TIMEOUT).await.unwrap_err();
        assert!(matches!(error, CredentialError::NoForegroundContext));
    }

    #[tokio::test]
    async fn broadcasts_reach_every_foreground() {
        let bus = ContextBus::new();
        let mut first = bus.connect_foreground();
        let mut second = bus.connect_foreground();

        bus.notify_sync_completed("/responses", HttpMethod::Post);
        bus.notify_cache_updated("/api/questions");

        let expected = Notification::SyncCompleted {
            endpoint: "/responses".to_owned(),
            method: HttpMethod::Post,
        };
        assert_eq!(first.next_notification().await, Some(expected.clone()));
        assert_eq!(second.next_notification().await, Some(expected));
        assert_eq!(
            first.next_notification().await,
            Some(Notification::CacheUpdated {
                url: "/api/questions".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn broadcast_without_listeners_is_dropped() {
        let bus = ContextBus::new();
        bus.notify_sync_completed("/responses", HttpMethod::Post);

        // A late listener never sees earlier notifications.
        let mut port = bus.connect_foreground();
        bus.notify_cache_updated("/later");
        assert_eq!(
            port.next_notification().await,
            Some(Notification::CacheUpdated {
                url: "/later".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn background_sync_requests() {
        let bus = ContextBus::new();
        assert!(!bus.request_background_sync());

        let mut requests = bus.attach_background();
        assert!(bus.request_background_sync());
        assert_eq!(requests.recv().await, Some(BackgroundRequest::SyncNow));

        drop(requests);
        assert!(!bus.request_background_sync());
    }
}
