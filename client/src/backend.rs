// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP boundary to the backend which receives replayed mutations.

use std::time::Duration;

use outboxcommon::{AuthToken, HttpMethod};
use reqwest::{Client, Method, StatusCode, header::CONTENT_TYPE};
use tracing::debug;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid request URL {0}")]
    InvalidUrl(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Server rejected the request with status {0}")]
    Status(StatusCode),
}

impl TransportError {
    /// Returns true if the request most likely never reached the server.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Delivers a single mutation to the backend.
///
/// Only a 2xx response counts as success.
pub trait Backend: Clone + Send + Sync + 'static {
    fn send(
        &self,
        endpoint: &str,
        method: HttpMethod,
        data: Option<&serde_json::Value>,
        token: &AuthToken,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// [`Backend`] talking JSON over HTTP to a fixed origin.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    origin: Url,
}

impl HttpBackend {
    pub fn new(origin: Url, request_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Appends `endpoint` to the origin.
    ///
    /// This is a plain concatenation, so a path prefix of the origin (e.g. `/api`) is kept.
    fn url(&self, endpoint: &str) -> Result<Url, TransportError> {
        let origin = self.origin.as_str().trim_end_matches('/');
        let url = if endpoint.starts_with('/') {
            format!("{origin}{endpoint}")
        } else {
            format!("{origin}/{endpoint}")
        };
        url.parse().map_err(|_| TransportError::InvalidUrl(url))
    }
}

fn reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

impl Backend for HttpBackend {
    async fn send(
        &self,
        endpoint: &str,
        method: HttpMethod,
        data: Option<&serde_json::Value>,
        token: &AuthToken,
    ) -> Result<(), TransportError> {
        let url = self.url(endpoint)?;
        debug!(%url, %method, "Sending mutation");

        let mut request = self
            .client
            .request(reqwest_method(method), url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(token.expose());
        if let Some(data) = data {
            request = request.json(data);
        }

        let status = request.send().await?.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(status))
        }
    }
}
