// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Types shared between the foreground client, the background agent and the agent binary.

pub mod auth;
pub mod messages;
pub mod mutation;
pub mod time;

pub use auth::AuthToken;
pub use mutation::{
    Claim, ClaimOwner, HttpMethod, MutationId, NewMutation, QueuedMutation, UnsupportedMethod,
};
pub use time::TimeStamp;
