// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use outboxcommon::HttpMethod;

#[derive(clap::Parser)]
pub struct Args {
    /// Directory containing the `configuration` directory
    #[arg(long, default_value = "agent/")]
    pub config_dir: String,
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Default, clap::Subcommand)]
pub enum Command {
    /// Run the background agent
    #[default]
    Run,
    /// Run the background agent together with a foreground context holding a token
    Serve {
        /// Bearer token handed out to the background agent
        #[arg(long, env = "OUTBOX_TOKEN")]
        token: String,
    },
    /// Queue a mutation for later delivery
    Enqueue {
        /// POST, PUT, PATCH or DELETE
        method: HttpMethod,
        /// Path relative to the backend origin
        endpoint: String,
        /// JSON payload
        data: Option<String>,
    },
    /// List pending mutations as JSON lines
    Pending,
    /// Run a single foreground drain pass
    Drain {
        /// Bearer token attached to the replayed mutations
        #[arg(long, env = "OUTBOX_TOKEN")]
        token: String,
    },
}
