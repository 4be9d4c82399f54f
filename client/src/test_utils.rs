// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backend double for engine tests.

use std::{collections::HashSet, sync::Arc};

use outboxcommon::{AuthToken, HttpMethod};
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::{Notify, Semaphore};

use crate::backend::{Backend, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentRequest {
    pub(crate) endpoint: String,
    pub(crate) method: HttpMethod,
    pub(crate) data: Option<serde_json::Value>,
    pub(crate) token: String,
}

/// Records every request; answers 500 for endpoints marked as failing.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeBackend {
    sent: Arc<Mutex<Vec<SentRequest>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    gate: Option<Gate>,
}

#[derive(Debug, Clone)]
struct Gate {
    entered: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl FakeBackend {
    /// Backend whose sends block until [`FakeBackend::open_gate`] is called.
    pub(crate) fn gated() -> Self {
        Self {
            gate: Some(Gate {
                entered: Arc::new(Notify::new()),
                permits: Arc::new(Semaphore::new(0)),
            }),
            ..Default::default()
        }
    }

    pub(crate) fn fail_endpoint(&self, endpoint: &str) {
        self.failing.lock().insert(endpoint.to_owned());
    }

    pub(crate) fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_endpoints(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|request| request.endpoint.clone())
            .collect()
    }

    /// Waits until a send is blocked at the gate.
    pub(crate) async fn wait_entered(&self) {
        if let Some(gate) = &self.gate {
            gate.entered.notified().await;
        }
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.permits.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }
}

impl Backend for FakeBackend {
    async fn send(
        &self,
        endpoint: &str,
        method: HttpMethod,
        data: Option<&serde_json::Value>,
        token: &AuthToken,
    ) -> Result<(), TransportError> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            let _permit = gate.permits.acquire().await;
        }
        self.sent.lock().push(SentRequest {
            endpoint: endpoint.to_owned(),
            method,
            data: data.cloned(),
            token: token.expose().to_owned(),
        });
        if self.failing.lock().contains(endpoint) {
            Err(TransportError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        } else {
            Ok(())
        }
    }
}
