// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::io::Write;

use anyhow::Context;
use outboxclient::{
    AuthToken, BackgroundAgent, ContextBus, ContextKind, DrainEngine, ForegroundContext,
    HttpBackend, HttpMethod, LocalCredentials, MutationQueue, NetworkStatus, QueueStore, Settings,
};
use tracing::info;

pub mod args;
pub mod configurations;
pub mod logging;

async fn open_store(settings: &Settings) -> anyhow::Result<QueueStore> {
    QueueStore::open(&settings.store.path)
        .await
        .with_context(|| format!("Failed to open store {}", settings.store.path.display()))
}

fn http_backend(settings: &Settings) -> anyhow::Result<HttpBackend> {
    HttpBackend::new(
        settings.backend.origin.clone(),
        settings.backend.request_timeout,
    )
    .context("Failed to create HTTP client")
}

/// Runs the background agent until ctrl-c.
///
/// With a `token`, a foreground context holding it runs in the same process and hands it out to
/// the agent. Without one, the agent defers every mutation until some foreground context connects.
pub async fn run(settings: Settings, token: Option<AuthToken>) -> anyhow::Result<()> {
    let store = open_store(&settings).await?;
    let backend = http_backend(&settings)?;
    let bus = ContextBus::new();
    // The agent has no connectivity signal of its own; failed sends are retried on later syncs.
    let network = NetworkStatus::new(true);

    let agent = BackgroundAgent::new(
        store.clone(),
        backend.clone(),
        bus.clone(),
        network.clone(),
        &settings.sync,
    );
    agent.listen(&bus);
    agent.schedule_periodic_sync(settings.sync.periodic_interval);

    let foreground = token.map(|token| {
        let foreground = ForegroundContext::new(
            store,
            backend,
            bus.clone(),
            network,
            LocalCredentials::new(Some(token)),
            &settings.sync,
        );
        foreground.start();
        foreground
    });
    if let Some(foreground) = &foreground {
        let outcome = foreground.on_app_load().await?;
        info!(?outcome, "Initial foreground drain");
    }

    info!(
        origin = %settings.backend.origin,
        interval = ?settings.sync.periodic_interval,
        "Background agent running"
    );
    agent.on_sync_event();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    if let Some(foreground) = &foreground {
        foreground.stop();
    }
    agent.shutdown().await;
    Ok(())
}

pub async fn enqueue(
    settings: Settings,
    method: HttpMethod,
    endpoint: String,
    data: Option<String>,
) -> anyhow::Result<()> {
    let data = data
        .map(|data| serde_json::from_str(&data))
        .transpose()
        .context("Payload is not valid JSON")?;
    let store = open_store(&settings).await?;
    let queue = MutationQueue::new(store, settings.sync.claim_lease);
    let id = queue.enqueue(endpoint, method, data).await?;
    println!("{id}");
    Ok(())
}

pub async fn pending(settings: Settings) -> anyhow::Result<()> {
    let store = open_store(&settings).await?;
    let queue = MutationQueue::new(store, settings.sync.claim_lease);
    let mut stdout = std::io::stdout().lock();
    for mutation in queue.list_pending().await? {
        serde_json::to_writer(&mut stdout, &mutation)?;
        writeln!(stdout)?;
    }
    Ok(())
}

/// Runs one foreground drain pass.
pub async fn drain(settings: Settings, token: AuthToken) -> anyhow::Result<()> {
    let store = open_store(&settings).await?;
    let engine = DrainEngine::new(
        ContextKind::Foreground,
        MutationQueue::new(store, settings.sync.claim_lease),
        http_backend(&settings)?,
        LocalCredentials::new(Some(token)),
        ContextBus::new(),
        NetworkStatus::new(true),
    );
    let outcome = engine.drain().await?;
    let stats = outcome.stats();
    println!(
        "sent: {}, deferred: {}, skipped: {}",
        stats.sent, stats.deferred, stats.skipped
    );
    Ok(())
}
