// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Offline mutation queue.
//!
//! Mutating requests which cannot reach the backend are stored in a local SQLite queue and
//! replayed once connectivity returns. Two kinds of execution contexts drain the queue: the
//! [`ForegroundContext`] of the running application and the [`BackgroundAgent`]. Per-record
//! claims keep them from sending the same mutation twice.

pub mod backend;
pub mod background;
pub mod bus;
pub mod credentials;
pub mod drain;
pub mod foreground;
pub mod network;
pub mod queue;
pub mod settings;
pub mod store;

#[cfg(test)]
mod test_utils;
mod utils;

pub use backend::{Backend, HttpBackend, TransportError};
pub use background::{AgentWork, BackgroundAgent, DrainWork, WaitForDoneFuture};
pub use bus::{ContextBus, ForegroundPort, IncomingRequest};
pub use credentials::{BusCredentials, CredentialError, CredentialSource, LocalCredentials};
pub use drain::{ContextKind, DrainEngine, DrainError, DrainOutcome, DrainStats, SkipReason};
pub use foreground::{ForegroundContext, SubmitError, Submission};
pub use network::NetworkStatus;
pub use queue::{MutationQueue, QueueError};
pub use settings::Settings;
pub use store::{QueueStore, StoreError};

pub use outboxcommon::{AuthToken, HttpMethod, MutationId, QueuedMutation};
