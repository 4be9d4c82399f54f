// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Private reply channels for requests sent over the [`ContextBus`](super::ContextBus).

use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use pin_project::pin_project;
use tokio::sync::oneshot;
use tracing::warn;

/// Creates a new [`Responder`] and [`Response`].
///
/// The responder travels with the request to the other context; the response stays with the
/// requester.
pub(super) fn responder<T>() -> (Responder<T>, Response<T>) {
    let (tx, rx) = oneshot::channel();
    (Responder { tx }, Response { rx })
}

/// The replying side went away without sending a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ReplyCancelled;

#[pin_project]
pub(super) struct Response<T> {
    #[pin]
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Response<T> {
    type Output = Result<T, ReplyCancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().rx.poll(cx)) {
            Ok(reply) => Poll::Ready(Ok(reply)),
            Err(_) => Poll::Ready(Err(ReplyCancelled)),
        }
    }
}

/// Sends exactly one reply; dropping it cancels the request.
#[derive(Debug)]
pub(super) struct Responder<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Responder<T> {
    pub(super) fn send(self, reply: T) {
        if self.tx.send(reply).is_err() {
            warn!("Requester dropped the reply channel; most likely it timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_reply() {
        let (responder, response) = responder();
        responder.send(42);
        assert_eq!(response.await, Ok(42));
    }

    #[tokio::test]
    async fn dropped_responder_cancels() {
        let (responder, response) = responder::<u32>();
        drop(responder);
        assert_eq!(response.await, Err(ReplyCancelled));
    }
}
