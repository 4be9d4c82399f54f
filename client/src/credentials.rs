// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sources of the bearer token attached to replayed mutations.
//!
//! A foreground context owns the token ([`LocalCredentials`]). The background agent has no token
//! of its own and asks a foreground context for it over the bus ([`BusCredentials`]).

use std::{sync::Arc, time::Duration};

use outboxcommon::AuthToken;
use tokio::sync::watch;
use tracing::debug;

use crate::bus::ContextBus;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("No foreground context is connected")]
    NoForegroundContext,
    #[error("Foreground context did not reply within {0:?}")]
    Timeout(Duration),
    #[error("Foreground context dropped the request")]
    Cancelled,
    #[error("No auth token available")]
    Missing,
}

pub trait CredentialSource: Clone + Send + Sync + 'static {
    fn credential(&self) -> impl Future<Output = Result<AuthToken, CredentialError>> + Send;
}

/// Token held in memory by a foreground context.
#[derive(Debug, Clone)]
pub struct LocalCredentials {
    token: Arc<watch::Sender<Option<AuthToken>>>,
}

impl Default for LocalCredentials {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LocalCredentials {
    pub fn new(token: Option<AuthToken>) -> Self {
        Self {
            token: Arc::new(watch::Sender::new(token)),
        }
    }

    pub fn set(&self, token: AuthToken) {
        debug!("Auth token updated");
        self.token.send_replace(Some(token));
    }

    pub fn clear(&self) {
        debug!("Auth token cleared");
        self.token.send_replace(None);
    }

    pub fn current(&self) -> Option<AuthToken> {
        self.token.borrow().clone()
    }
}

impl CredentialSource for LocalCredentials {
    async fn credential(&self) -> Result<AuthToken, CredentialError> {
        self.current().ok_or(CredentialError::Missing)
    }
}

/// Token fetched from a foreground context on every call.
#[derive(Debug, Clone)]
pub struct BusCredentials {
    bus: ContextBus,
    reply_timeout: Duration,
}

impl BusCredentials {
    pub fn new(bus: ContextBus, reply_timeout: Duration) -> Self {
        Self { bus, reply_timeout }
    }
}

impl CredentialSource for BusCredentials {
    async fn credential(&self) -> Result<AuthToken, CredentialError> {
        self.bus.request_auth_token(self.reply_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use outboxcommon::messages::AuthTokenReply;

    use super::*;

    #[tokio::test]
    async fn local_credentials_follow_updates() {
        let credentials = LocalCredentials::default();
        assert!(matches!(
            credentials.credential().await,
            Err(CredentialError::Missing)
        ));

        credentials.set(AuthToken::new("first"));
        let clone = credentials.clone();
        assert_eq!(clone.credential().await.unwrap().expose(), "first");

        credentials.clear();
        assert!(clone.current().is_none());
    }

    #[tokio::test]
    async fn bus_credentials_ask_the_foreground() {
        let bus = ContextBus::new();
        let local = LocalCredentials::new(Some(AuthToken::new("shared")));
        let mut port = bus.connect_foreground();
        let answering = local.clone();
        tokio::spawn(async move {
            while let Some(incoming) = port.next_request().await {
                incoming.reply(AuthTokenReply {
                    token: answering.current(),
                });
            }
        });

        let credentials = BusCredentials::new(bus, Duration::from_secs(1));
        assert_eq!(credentials.credential().await.unwrap().expose(), "shared");

        local.clear();
        assert!(matches!(
            credentials.credential().await,
            Err(CredentialError::Missing)
        ));
    }
}
