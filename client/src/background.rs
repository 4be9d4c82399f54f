// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The background agent draining the queue independently of any foreground context.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use outboxcommon::messages::BackgroundRequest;
use pin_project::pin_project;
use tokio::{sync::watch, time::MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFutureOwned};
use tracing::{debug, error, info};

use crate::{
    backend::{Backend, HttpBackend},
    bus::ContextBus,
    credentials::BusCredentials,
    drain::{ContextKind, DrainEngine},
    network::NetworkStatus,
    queue::MutationQueue,
    settings::SyncSettings,
    store::QueueStore,
};

/// A service which drains the queue in a background task.
///
/// The initial state of the agent is `Stopped`, that is, the background task is idle. It only
/// works when the agent is started, and when there is a notification to run. After doing the work
/// once, it waits for the next notification, or stops if it is stopped.
///
/// Clones of the agent control the same background task. When the last clone is dropped, the
/// background task, the bus listener and the periodic sync end.
#[derive(Debug, Clone)]
pub struct BackgroundAgent<W: AgentWork = DrainWork<HttpBackend>> {
    work: W,
    run_token_tx: Arc<watch::Sender<RunToken>>,
    tasks: CancellationToken,
    _tasks_guard: Arc<DropGuard>,
}

pub trait AgentWork: Clone + Send + 'static {
    fn work(&self, run_token: CancellationToken) -> impl Future<Output = ()> + Send;
}

/// Drains the queue with credentials obtained from a foreground context.
#[derive(Debug, Clone)]
pub struct DrainWork<B: Backend> {
    engine: DrainEngine<B, BusCredentials>,
}

impl<B: Backend> DrainWork<B> {
    pub fn engine(&self) -> &DrainEngine<B, BusCredentials> {
        &self.engine
    }
}

impl<B: Backend> AgentWork for DrainWork<B> {
    async fn work(&self, run_token: CancellationToken) {
        match self.engine.drain_until(&run_token).await {
            Ok(outcome) => debug!(?outcome, "Background drain pass finished"),
            Err(error) => error!(%error, "Background drain pass failed"),
        }
    }
}

impl<B: Backend> BackgroundAgent<DrainWork<B>> {
    pub fn new(
        store: QueueStore,
        backend: B,
        bus: ContextBus,
        network: NetworkStatus,
        settings: &SyncSettings,
    ) -> Self {
        let engine = DrainEngine::new(
            ContextKind::Background,
            MutationQueue::new(store, settings.claim_lease),
            backend,
            BusCredentials::new(bus.clone(), settings.credential_timeout),
            bus,
            network,
        );
        Self::with_work(DrainWork { engine })
    }

    pub fn engine(&self) -> &DrainEngine<B, BusCredentials> {
        self.work.engine()
    }
}

impl<W: AgentWork> BackgroundAgent<W> {
    pub fn with_work(work: W) -> Self {
        let (run_token_tx, run_token_rx) = watch::channel(RunToken::new_cancelled());
        let task = AgentTask { work: work.clone() };
        tokio::spawn(task.run(run_token_rx));
        let tasks = CancellationToken::new();
        Self {
            work,
            run_token_tx: Arc::new(run_token_tx),
            _tasks_guard: Arc::new(tasks.clone().drop_guard()),
            tasks,
        }
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    /// Starts the background task.
    ///
    /// Returns a future which finishes when the background task is done.
    pub fn start(&self) -> WaitForDoneFuture {
        start_run(&self.run_token_tx)
    }

    /// Notifies the background task to stop.
    ///
    /// A running drain pass stops before its next mutation. Returns a future which resolves when
    /// the background task fully stops.
    pub fn stop(&self) -> WaitForDoneFuture {
        let mut done_token = None;
        self.run_token_tx.send_if_modified(|run_token| {
            run_token.cancel();
            done_token = Some(run_token.done.clone());
            false // no more work => no need to wake up the background task
        });
        debug!("Stopping background agent");
        WaitForDoneFuture::new(done_token)
    }

    /// Notifies the background task about new work.
    ///
    /// Has no effect if the agent is stopped.
    pub fn notify_work(&self) -> WaitForDoneFuture {
        let mut done_token = None;
        let notified = self.run_token_tx.send_if_modified(|run_token| {
            if run_token.is_cancelled() {
                false
            } else {
                run_token.rotate_done();
                done_token = Some(run_token.done.clone());
                true
            }
        });
        debug!(?notified, "Notifying background agent about new work");
        WaitForDoneFuture::new(done_token)
    }

    /// Runs the background task and waits until it is done.
    ///
    /// If the background is already running, just waits until it is done.
    ///
    /// The task is stopped in any case.
    pub async fn run_once(&self) {
        self.start().await;
        self.stop().await;
    }

    /// Handles a deferred sync callback of the platform.
    pub fn on_sync_event(&self) -> WaitForDoneFuture {
        info!("Sync event");
        self.start()
    }

    /// Drains the queue whenever a foreground context sends [`BackgroundRequest::SyncNow`].
    pub fn listen(&self, bus: &ContextBus) {
        let mut requests = bus.attach_background();
        let run_token_tx = Arc::downgrade(&self.run_token_tx);
        tokio::spawn(self.tasks.clone().run_until_cancelled_owned(async move {
            while let Some(request) = requests.recv().await {
                let Some(run_token_tx) = run_token_tx.upgrade() else {
                    break;
                };
                match request {
                    BackgroundRequest::SyncNow => {
                        debug!("Sync requested by foreground context");
                        start_run(&run_token_tx);
                    }
                }
            }
        }));
    }

    /// Raises a sync event every `interval`, starting after the first interval.
    ///
    /// `interval` must be non-zero.
    pub fn schedule_periodic_sync(&self, interval: Duration) {
        let run_token_tx = Arc::downgrade(&self.run_token_tx);
        tokio::spawn(self.tasks.clone().run_until_cancelled_owned(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticks = tokio::time::interval_at(start, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(run_token_tx) = run_token_tx.upgrade() else {
                    break;
                };
                info!("Periodic sync event");
                start_run(&run_token_tx);
            }
        }));
    }

    /// Stops the background task together with the bus listener and periodic sync.
    pub fn shutdown(&self) -> WaitForDoneFuture {
        self.tasks.cancel();
        self.stop()
    }
}

fn start_run(run_token_tx: &watch::Sender<RunToken>) -> WaitForDoneFuture {
    let mut done_token = None;
    run_token_tx.send_if_modified(|run_token| {
        if !run_token.rotate() {
            run_token.rotate_done();
        }
        done_token = Some(run_token.done.clone());
        true // wake up the background task
    });
    debug!("Starting background agent");
    WaitForDoneFuture::new(done_token)
}

struct AgentTask<W> {
    work: W,
}

impl<W: AgentWork> AgentTask<W> {
    async fn run(self, mut run_token_rx: watch::Receiver<RunToken>) {
        loop {
            if run_token_rx.changed().await.is_err() {
                break;
            }

            let run_token = {
                let run_token = run_token_rx.borrow_and_update().clone();
                debug!(?run_token, "Incoming work notification");

                if run_token.is_cancelled() {
                    run_token.mark_as_done();
                    continue;
                }

                run_token
            };

            debug!("Background agent starts working");
            self.work.work(run_token.cancel.clone()).await;
            debug!("Background agent finished working");

            run_token.mark_as_done();
        }
    }
}

/// A token sent to the background task as work permit.
///
/// The token is stored in a [`tokio::sync::watch`] cell. Whenever the token is updated, the
/// background task is woken up and uses the token to start work (if it is not running yet). When
/// the token is cancelled, the running work (if any) is cancelled, without waking up the task.
///
/// The `done` token is shared between the callers and the background task, which uses it to mark
/// the work as done. If the run token is cancelled before the background task ever receives it,
/// the done token is cancelled too.
#[derive(Debug, Default, Clone)]
struct RunToken {
    cancel: CancellationToken,
    done: CancellationToken,
}

impl RunToken {
    fn new_cancelled() -> Self {
        let run_token = RunToken::default();
        run_token.cancel();
        run_token.mark_as_done();
        run_token
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn rotate(&mut self) -> bool {
        if self.is_cancelled() {
            *self = RunToken::default();
            true
        } else {
            false
        }
    }

    fn rotate_done(&mut self) -> bool {
        if self.done.is_cancelled() {
            self.done = CancellationToken::new();
            true
        } else {
            false
        }
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn mark_as_done(&self) {
        self.done.cancel();
    }
}

/// A future that resolves when the background task is done.
///
/// Not `must_use`: callers usually trigger the agent without waiting for it.
#[pin_project]
pub struct WaitForDoneFuture {
    #[pin]
    done_fut: Option<WaitForCancellationFutureOwned>,
}

impl WaitForDoneFuture {
    fn new(done: Option<CancellationToken>) -> Self {
        Self {
            done_fut: done.map(|done| done.cancelled_owned()),
        }
    }
}

impl Future for WaitForDoneFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().done_fut.as_pin_mut() {
            Some(fut) => fut.poll(cx),
            None => Poll::Ready(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as LeaseDuration;
    use outboxcommon::{
        AuthToken, HttpMethod,
        messages::{AuthTokenReply, Notification},
    };
    use tokio::{
        sync::Notify,
        time::{sleep, timeout},
    };

    use crate::{test_utils::FakeBackend, utils::init_test_tracing};

    use super::*;

    #[derive(Default, Clone)]
    struct DelayedCounter {
        counter: Arc<AtomicUsize>,
    }

    impl AgentWork for DelayedCounter {
        async fn work(&self, run_token: CancellationToken) {
            sleep(Duration::from_millis(50)).await;
            if !run_token.is_cancelled() {
                self.counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn start_triggers_work() {
        init_test_tracing();

        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());

        agent.start().await;

        assert_eq!(1, work.counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_cancels_work() {
        init_test_tracing();

        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());

        agent.start();
        agent.stop().await;

        assert_eq!(0, work.counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn notify_work_triggers_another_run() {
        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());

        agent.start().await;
        agent.notify_work().await;

        assert_eq!(2, work.counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn notify_work_is_ignored_when_stopped() {
        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());

        agent.notify_work().await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(0, work.counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn start_coalesces_triggers() {
        init_test_tracing();

        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());

        agent.start();
        agent.start();
        agent.start().await;
        agent.on_sync_event();
        agent.on_sync_event().await;

        assert_eq!(2, work.counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_once_stops_afterwards() {
        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());

        agent.run_once().await;
        agent.run_once().await;

        assert_eq!(2, work.counter.load(Ordering::SeqCst));
        assert!(agent.run_token_tx.borrow().is_cancelled());
    }

    #[derive(Clone)]
    struct BlockingWork {
        gate: Arc<Notify>,
        started: Arc<Notify>,
    }

    impl AgentWork for BlockingWork {
        async fn work(&self, _run_token: CancellationToken) {
            self.started.notify_one();
            self.gate.notified().await;
        }
    }

    #[tokio::test]
    async fn stop_waits_for_running_work() {
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let agent = BackgroundAgent::with_work(BlockingWork {
            gate: gate.clone(),
            started: started.clone(),
        });

        agent.start();
        started.notified().await;

        let mut stop1 = Box::pin(agent.stop());
        let mut stop2 = Box::pin(agent.clone().stop());
        assert!(
            timeout(Duration::from_millis(10), &mut stop1)
                .await
                .is_err()
        );
        assert!(
            timeout(Duration::from_millis(10), &mut stop2)
                .await
                .is_err()
        );

        gate.notify_one();
        tokio::join!(stop1, stop2);

        assert!(
            timeout(Duration::from_millis(10), agent.stop())
                .await
                .is_ok()
        );
    }

    fn answer_token_requests(bus: &ContextBus) {
        let mut port = bus.connect_foreground();
        tokio::spawn(async move {
            while let Some(incoming) = port.next_request().await {
                incoming.reply(AuthTokenReply {
                    token: Some(AuthToken::new("token")),
                });
            }
        });
    }

    fn drain_agent(
        store: &QueueStore,
        backend: &FakeBackend,
        bus: &ContextBus,
    ) -> BackgroundAgent<DrainWork<FakeBackend>> {
        let settings = SyncSettings {
            claim_lease: LeaseDuration::seconds(120),
            ..Default::default()
        };
        BackgroundAgent::new(
            store.clone(),
            backend.clone(),
            bus.clone(),
            NetworkStatus::new(true),
            &settings,
        )
    }

    #[tokio::test]
    async fn run_once_drains_the_queue() -> anyhow::Result<()> {
        init_test_tracing();

        let store = QueueStore::open_in_memory().await?;
        let backend = FakeBackend::default();
        let bus = ContextBus::new();
        answer_token_requests(&bus);
        let agent = drain_agent(&store, &backend, &bus);

        let queue = agent.engine().queue();
        queue.enqueue("/a", HttpMethod::Post, None).await?;
        queue.enqueue("/b", HttpMethod::Delete, None).await?;

        agent.run_once().await;

        assert_eq!(backend.sent_endpoints(), ["/a", "/b"]);
        assert!(store.scan().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn sync_now_from_foreground_drains_the_queue() -> anyhow::Result<()> {
        init_test_tracing();

        let store = QueueStore::open_in_memory().await?;
        let backend = FakeBackend::default();
        let bus = ContextBus::new();
        answer_token_requests(&bus);
        let mut notifications = bus.subscribe();
        let agent = drain_agent(&store, &backend, &bus);
        agent.listen(&bus);

        agent
            .engine()
            .queue()
            .enqueue("/responses", HttpMethod::Post, None)
            .await?;
        assert!(bus.request_background_sync());

        let notification = timeout(Duration::from_secs(5), notifications.recv()).await??;
        assert_eq!(
            notification,
            Notification::SyncCompleted {
                endpoint: "/responses".to_owned(),
                method: HttpMethod::Post,
            }
        );
        agent.shutdown().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sync_starts_work() {
        let work = DelayedCounter::default();
        let agent = BackgroundAgent::with_work(work.clone());
        agent.schedule_periodic_sync(Duration::from_secs(60));

        sleep(Duration::from_secs(30)).await;
        assert_eq!(0, work.counter.load(Ordering::SeqCst));

        sleep(Duration::from_secs(31)).await;
        assert_eq!(1, work.counter.load(Ordering::SeqCst));

        agent.shutdown().await;
    }

    #[tokio::test]
    async fn dropping_the_last_handle_ends_spawned_tasks() {
        init_test_tracing();

        let bus = ContextBus::new();
        let agent = BackgroundAgent::with_work(DelayedCounter::default());
        agent.listen(&bus);
        agent.schedule_periodic_sync(Duration::from_secs(60));
        let run_token_tx = Arc::downgrade(&agent.run_token_tx);

        let clone = agent.clone();
        drop(agent);
        assert!(bus.request_background_sync());
        drop(clone);

        assert!(run_token_tx.upgrade().is_none());
        timeout(Duration::from_secs(5), async {
            while bus.request_background_sync() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("bus listener still running");
    }
}
