// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use chrono::Duration;
use serde::Deserialize;
use url::Url;

/// Configuration of the offline queue and its engines.
#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub backend: BackendSettings,
    pub store: StoreSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl Settings {
    /// Checks constraints between individual settings.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let request_timeout = Duration::from_std(self.backend.request_timeout)
            .map_err(|_| SettingsError::OutOfRange("backend.request_timeout_secs"))?;
        // A send must never outlive the claim protecting it.
        if self.sync.claim_lease <= request_timeout {
            return Err(SettingsError::LeaseTooShort {
                lease: self.sync.claim_lease,
                request_timeout,
            });
        }
        if self.sync.periodic_interval.is_zero() {
            return Err(SettingsError::OutOfRange("sync.periodic_interval_secs"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Setting {0} is out of range")]
    OutOfRange(&'static str),
    #[error("Claim lease {lease} must exceed the request timeout {request_timeout}")]
    LeaseTooShort {
        lease: Duration,
        request_timeout: Duration,
    },
}

/// The backend receiving replayed mutations.
#[derive(Deserialize, Clone, Debug)]
pub struct BackendSettings {
    /// Origin to which the endpoints of queued mutations are appended
    pub origin: Url,
    /// Default is 30 seconds.
    #[serde(
        rename = "request_timeout_secs",
        default = "default_request_timeout",
        with = "std_duration_seconds"
    )]
    pub request_timeout: std::time::Duration,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StoreSettings {
    /// Path of the SQLite database
    ///
    /// Every context draining the same queue must use the same path.
    pub path: PathBuf,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SyncSettings {
    /// How long the background agent waits for a foreground context to hand out a credential
    ///
    /// Default is 1 second.
    #[serde(
        rename = "credential_timeout_ms",
        default = "default_credential_timeout",
        with = "duration_millis"
    )]
    pub credential_timeout: std::time::Duration,
    /// Claims older than this are considered abandoned
    ///
    /// Default is 2 minutes.
    #[serde(
        rename = "claim_lease_secs",
        default = "default_claim_lease",
        with = "duration_seconds"
    )]
    pub claim_lease: Duration,
    /// Interval of the periodic sync of the background agent
    ///
    /// Default is 5 minutes.
    #[serde(
        rename = "periodic_interval_secs",
        default = "default_periodic_interval",
        with = "std_duration_seconds"
    )]
    pub periodic_interval: std::time::Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            credential_timeout: default_credential_timeout(),
            claim_lease: default_claim_lease(),
            periodic_interval: default_periodic_interval(),
        }
    }
}

fn default_request_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(30)
}

fn default_credential_timeout() -> std::time::Duration {
    std::time::Duration::from_millis(1000)
}

fn default_claim_lease() -> Duration {
    Duration::seconds(120)
}

fn default_periodic_interval() -> std::time::Duration {
    std::time::Duration::from_secs(5 * 60)
}

mod duration_seconds {
    use serde::de;

    use chrono::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let seconds: u64 = serde::Deserialize::deserialize(d)?;
        let seconds: i64 = seconds
            .try_into()
            .map_err(|_| de::Error::custom("out of range"))?;
        Duration::try_seconds(seconds).ok_or_else(|| de::Error::custom("out of range"))
    }
}

mod std_duration_seconds {
    use serde::de;

    use std::time::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let seconds: u64 = serde::Deserialize::deserialize(d)?;
        Ok(Duration::from_secs(seconds))
    }
}

mod duration_millis {
    use serde::de;

    use std::time::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let millis: u64 = serde::Deserialize::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
