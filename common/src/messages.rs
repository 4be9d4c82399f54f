// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Messages exchanged between the foreground contexts and the background agent.
//!
//! All messages are tagged by a `type` field when serialized, e.g.
//! `{"type":"SYNC_COMPLETED","endpoint":"/responses","method":"POST"}`.

use serde::{Deserialize, Serialize};

use crate::{auth::AuthToken, mutation::HttpMethod};

/// Requests the background agent sends to a single foreground context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForegroundRequest {
    /// Asks for the credential the foreground context currently holds
    GetAuthToken,
}

/// Reply to [`ForegroundRequest::GetAuthToken`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthTokenReply {
    pub token: Option<AuthToken>,
}

/// Requests a foreground context sends to the background agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundRequest {
    /// Asks the agent to drain the queue as soon as possible
    SyncNow,
}

/// Advisory broadcasts to all connected foreground contexts.
///
/// Delivery is best effort: a context which is not listening never learns about the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    SyncCompleted {
        endpoint: String,
        method: HttpMethod,
    },
    CacheUpdated {
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wire_format() {
        assert_eq!(
            serde_json::to_value(ForegroundRequest::GetAuthToken).unwrap(),
            json!({ "type": "GET_AUTH_TOKEN" })
        );
        assert_eq!(
            serde_json::to_value(BackgroundRequest::SyncNow).unwrap(),
            json!({ "type": "SYNC_NOW" })
        );
        assert_eq!(
            serde_json::to_value(Notification::SyncCompleted {
                endpoint: "/responses".to_owned(),
                method: HttpMethod::Post,
            })
            .unwrap(),
            json!({ "type": "SYNC_COMPLETED", "endpoint": "/responses", "method": "POST" })
        );
        assert_eq!(
            serde_json::to_value(Notification::CacheUpdated {
                url: "/api/questions".to_owned()
            })
            .unwrap(),
            json!({ "type": "CACHE_UPDATED", "url": "/api/questions" })
        );
    }

    #[test]
    fn auth_token_reply_allows_null() {
        let reply: AuthTokenReply = serde_json::from_value(json!({ "token": null })).unwrap();
        assert_eq!(reply, AuthTokenReply::default());

        let reply: AuthTokenReply = serde_json::from_value(json!({ "token": "abc" })).unwrap();
        assert_eq!(reply.token.unwrap().expose(), "abc");
    }
}
