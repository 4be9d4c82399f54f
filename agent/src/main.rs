// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Context;
use clap::Parser;
use outboxagent::{
    args::{Args, Command},
    configurations::get_configuration,
    logging::init_logging,
};
use outboxclient::AuthToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let args = Args::parse();

    let settings = get_configuration(&args.config_dir).context("Could not load configuration")?;

    match args.cmd.unwrap_or_default() {
        Command::Run => outboxagent::run(settings, None).await,
        Command::Serve { token } => outboxagent::run(settings, Some(AuthToken::new(token))).await,
        Command::Enqueue {
            method,
            endpoint,
            data,
        } => outboxagent::enqueue(settings, method, endpoint, data).await,
        Command::Pending => outboxagent::pending(settings).await,
        Command::Drain { token } => outboxagent::drain(settings, AuthToken::new(token)).await,
    }
}
