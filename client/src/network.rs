// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shared view of the connectivity of the device.
///
/// The embedding application reports changes with [`NetworkStatus::set_online`].
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    online: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(watch::Sender::new(online)),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Returns true if the status changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.online.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
        if changed {
            info!(online, "Network status changed");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}
