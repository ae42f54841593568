//! EventBus - one live connection fanned out to topic subscribers
//!
//! A single driver task owns the connection. It opens the transport, feeds the
//! chunks through the reassembler and decoder, and dispatches each named event
//! to the registry on its own task, so delivery per subscriber follows arrival
//! order. On failure it reconnects with bounded exponential backoff; the delay
//! resets once a connection has stayed open for the grace period.
//!
//! State changes are published on a `watch` channel tagged with a generation
//! number: a driver from before the last `disconnect()` can no longer change
//! what consumers see.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{SubscriberRegistry, Subscription};
use super::transport::{ChunkStream, EventTransport};
use super::types::{ConnectionState, ConnectionStatus, DisconnectReason, NamedEvent};
use crate::guard::{BackoffPolicy, BackoffState, Sleeper, TokioSleeper};
use crate::lock;
use crate::stream::{ChunkReassembler, Decoded, decode_as};

/// Runtime options for the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusOptions {
    pub reconnect: BackoffPolicy,
    /// A connection open this long resets the reconnect delay
    pub stable_grace: Duration,
    /// Consecutive auth rejections before the bus gives up
    pub max_auth_failures: u32,
    /// `subscribe` also calls `connect` until the bus is first disconnected
    pub connect_on_subscribe: bool,
    /// Capacity of the broadcast tap
    pub dispatch_buffer: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            reconnect: BackoffPolicy::default(),
            stable_grace: Duration::from_secs(5),
            max_auth_failures: 2,
            connect_on_subscribe: true,
            dispatch_buffer: 256,
        }
    }
}

struct Driver {
    generation: u64,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    transport: Arc<dyn EventTransport>,
    sleeper: Arc<dyn Sleeper>,
    options: BusOptions,
    registry: Arc<SubscriberRegistry>,
    status: watch::Sender<ConnectionStatus>,
    tap: broadcast::Sender<NamedEvent>,
    generation: AtomicU64,
    driver: Mutex<Option<Driver>>,
}

/// How one open connection ended
enum ReadOutcome {
    Shutdown,
    Dropped,
}

impl Inner {
    /// Publish a state change from the driver of `generation`
    ///
    /// Ignored when a newer `connect`/`disconnect` has happened since.
    fn publish(&self, generation: u64, next: ConnectionStatus) -> bool {
        self.status.send_if_modified(|current| {
            if self.generation.load(Ordering::SeqCst) != generation || *current == next {
                return false;
            }
            info!(generation, from = %current.state, to = %next.state, reason = ?next.reason, "connection state changed");
            *current = next;
            true
        })
    }

    /// Empty the driver slot if it still holds the driver of `generation`
    ///
    /// Runs before a terminal state is published so that a `connect()` which
    /// observes that state always spawns a fresh driver.
    fn release(&self, generation: u64) {
        let mut driver = lock(&self.driver);
        if driver.as_ref().is_some_and(|d| d.generation == generation) {
            *driver = None;
        }
    }

    fn dispatch_line(&self, line: &str) {
        match decode_as::<NamedEvent>(line) {
            Ok(Some(Decoded::Value(event))) => {
                let delivered = self.registry.dispatch(&event);
                debug!(topic = %event.topic, delivered, "dispatch_line: event delivered");
                let _ = self.tap.send(event);
            }
            Ok(Some(Decoded::EndOfStream)) => debug!("dispatch_line: ignoring end-of-stream sentinel"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "dispatch_line: skipping undecodable event"),
        }
    }

    async fn run(self: Arc<Self>, generation: u64, mut shutdown: watch::Receiver<bool>) {
        debug!(generation, "run: driver started");
        let policy = self.options.reconnect;
        let mut backoff = policy.start();
        let mut auth_failures = 0u32;

        loop {
            self.publish(generation, ConnectionStatus::new(ConnectionState::Connecting));

            let opened = tokio::select! {
                _ = shutdown.changed() => break,
                opened = self.transport.open() => opened,
            };

            match opened {
                Ok(stream) => {
                    auth_failures = 0;
                    self.publish(generation, ConnectionStatus::new(ConnectionState::Connected));
                    match self.read(stream, &mut shutdown, &mut backoff).await {
                        ReadOutcome::Shutdown => break,
                        ReadOutcome::Dropped => {}
                    }
                }
                Err(e) if e.is_auth() => {
                    auth_failures += 1;
                    warn!(error = %e, auth_failures, max = self.options.max_auth_failures, "run: authentication rejected");
                    if auth_failures >= self.options.max_auth_failures {
                        self.release(generation);
                        self.publish(generation, ConnectionStatus::disconnected(DisconnectReason::AuthRejected));
                        break;
                    }
                }
                Err(e) => {
                    auth_failures = 0;
                    warn!(error = %e, "run: connect failed");
                }
            }

            self.publish(generation, ConnectionStatus::new(ConnectionState::Reconnecting));
            let delay = backoff.advance(&policy);
            info!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempt_count, "run: reconnecting after delay");

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.sleeper.sleep(delay) => {}
            }
        }

        debug!(generation, "run: driver stopped");
    }

    /// Pump one open connection until it ends or shutdown is signalled
    async fn read(
        &self,
        mut stream: ChunkStream,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut BackoffState,
    ) -> ReadOutcome {
        let mut reassembler = ChunkReassembler::new();
        let grace = self.sleeper.sleep(self.options.stable_grace);
        tokio::pin!(grace);
        let mut stable = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => return ReadOutcome::Shutdown,
                _ = &mut grace, if !stable => {
                    stable = true;
                    backoff.reset(&self.options.reconnect);
                    debug!("read: connection stable, reconnect delay reset");
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for line in reassembler.feed(&bytes) {
                            if *shutdown.borrow() {
                                return ReadOutcome::Shutdown;
                            }
                            self.dispatch_line(&line);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "read: transport error");
                        return ReadOutcome::Dropped;
                    }
                    None => {
                        if let Some(fragment) = reassembler.finish() {
                            self.dispatch_line(&fragment);
                        }
                        info!("read: stream closed by server");
                        return ReadOutcome::Dropped;
                    }
                },
            }
        }
    }
}

/// Live event connection with topic fan-out
///
/// `connect`, `subscribe` (with `connect_on_subscribe`) and friends spawn onto
/// the current tokio runtime.
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(transport: Arc<dyn EventTransport>, options: BusOptions) -> Self {
        Self::with_sleeper(transport, options, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(transport: Arc<dyn EventTransport>, options: BusOptions, sleeper: Arc<dyn Sleeper>) -> Self {
        debug!(?options, "EventBus::with_sleeper: called");
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (tap, _) = broadcast::channel(options.dispatch_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                transport,
                sleeper,
                options,
                registry: Arc::new(SubscriberRegistry::new()),
                status,
                tap,
                generation: AtomicU64::new(0),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Register `handler` for `topic`
    ///
    /// With `connect_on_subscribe` this also connects, unless the bus has been
    /// disconnected by request or by auth rejection. Only an explicit
    /// `connect()` leaves those states.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&NamedEvent) + Send + Sync + 'static,
    {
        let id = self.inner.registry.add(topic, Arc::new(handler));
        if self.inner.options.connect_on_subscribe {
            let status = self.status();
            if status.reason.is_none() {
                self.connect();
            } else {
                debug!(?status, "subscribe: bus was disconnected, not reconnecting");
            }
        }
        Subscription::new(topic, id, &self.inner.registry)
    }

    /// Start the connection driver; no-op if one is already running
    pub fn connect(&self) {
        let mut driver = lock(&self.inner.driver);
        if let Some(running) = driver.as_ref()
            && !running.handle.is_finished()
        {
            debug!("connect: driver already running");
            return;
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.inner.clone().run(generation, shutdown_rx));
        debug!(generation, "connect: driver spawned");
        *driver = Some(Driver {
            generation,
            shutdown,
            handle,
        });
    }

    /// Stop the driver and publish `Disconnected`; idempotent
    pub fn disconnect(&self) {
        let running = lock(&self.inner.driver).take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
        }

        self.inner.status.send_if_modified(|current| {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            let next = ConnectionStatus::disconnected(DisconnectReason::Requested);
            if current.state == ConnectionState::Disconnected {
                return false;
            }
            info!(from = %current.state, "disconnect: connection closed");
            *current = next;
            true
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Receiver of every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Broadcast copy of every dispatched event, after the callbacks ran
    pub fn tap(&self) -> broadcast::Receiver<NamedEvent> {
        self.inner.tap.subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.registry.subscriber_count(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.topics()
    }

    /// Disconnect and drop every subscription
    pub fn teardown(&self) {
        debug!("teardown: called");
        self.disconnect();
        self.inner.registry.clear();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(running) = lock(&self.inner.driver).take() {
            let _ = running.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::transport::TransportError;
    use crate::bus::mock::ScriptedTransport;
    use crate::guard::mock::RecordingSleeper;
    use serde_json::json;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);
    const GRACE: Duration = Duration::from_millis(5000);

    fn options() -> BusOptions {
        BusOptions {
            reconnect: BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(800)),
            stable_grace: GRACE,
            max_auth_failures: 2,
            connect_on_subscribe: false,
            dispatch_buffer: 64,
        }
    }

    fn bus_with(transport: &Arc<ScriptedTransport>, sleeper: &Arc<RecordingSleeper>, options: BusOptions) -> EventBus {
        EventBus::with_sleeper(transport.clone(), options, sleeper.clone())
    }

    async fn wait_state(rx: &mut watch::Receiver<ConnectionStatus>, state: ConnectionState) -> ConnectionStatus {
        *timeout(WAIT, rx.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("status channel closed")
    }

    async fn wait_opens(transport: &ScriptedTransport, n: usize) {
        timeout(WAIT, async {
            while transport.opens() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("timed out waiting for open");
    }

    fn line(topic: &str, data: serde_json::Value) -> Vec<u8> {
        format!("data: {}\n\n", json!({"type": topic, "data": data})).into_bytes()
    }

    fn reconnect_delays(sleeper: &RecordingSleeper) -> Vec<Duration> {
        sleeper.delays().into_iter().filter(|d| *d != GRACE).collect()
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        assert_eq!(bus.state(), ConnectionState::Disconnected);
        assert_eq!(bus.status().reason, None);
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        let feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());

        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let seen = seen.clone();
            bus.subscribe("job.completed", move |e: &NamedEvent| {
                seen.lock().unwrap().push(format!("{}:{}", name, e.payload["id"]));
            });
        }
        let mut tap = bus.tap();
        let mut status = bus.watch_status();

        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;

        feed.send(Ok(line("job.completed", json!({"id": 1})))).unwrap();
        let event = timeout(WAIT, tap.recv()).await.unwrap().unwrap();
        assert_eq!(event.topic, "job.completed");

        assert_eq!(*seen.lock().unwrap(), vec!["a:1", "b:1"]);
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_is_not_called() {
        let transport = Arc::new(ScriptedTransport::new());
        let feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            bus.subscribe("t", move |_: &NamedEvent| seen.lock().unwrap().push("first"))
        };
        {
            let seen = seen.clone();
            bus.subscribe("t", move |_: &NamedEvent| seen.lock().unwrap().push("second"));
        }
        first.unsubscribe();
        first.unsubscribe();

        let mut tap = bus.tap();
        bus.connect();
        feed.send(Ok(line("t", json!({})))).unwrap();
        timeout(WAIT, tap.recv()).await.unwrap().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["second"]);
        assert_eq!(bus.subscriber_count("t"), 1);
    }

    #[tokio::test]
    async fn test_connect_on_subscribe() {
        let transport = Arc::new(ScriptedTransport::new());
        let _feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(
            &transport,
            &sleeper,
            BusOptions {
                connect_on_subscribe: true,
                ..options()
            },
        );
        let mut status = bus.watch_status();

        bus.subscribe("job.started", |_: &NamedEvent| {});
        wait_state(&mut status, ConnectionState::Connected).await;

        bus.subscribe("job.failed", |_: &NamedEvent| {});
        tokio::task::yield_now().await;
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = Arc::new(ScriptedTransport::new());
        let _feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut status = bus.watch_status();

        bus.connect();
        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;
        bus.connect();
        tokio::task::yield_now().await;

        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn test_bad_line_does_not_stop_the_stream() {
        let transport = Arc::new(ScriptedTransport::new());
        let feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut tap = bus.tap();

        bus.connect();
        feed.send(Ok(b"data: {\"ty\n: comment\nevent: x\n".to_vec())).unwrap();
        feed.send(Ok(line("ok", json!(1)))).unwrap();

        let event = timeout(WAIT, tap.recv()).await.unwrap().unwrap();
        assert_eq!(event, NamedEvent::new("ok", json!(1)));
        assert_eq!(bus.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_reconnect_backoff_grows_while_flapping() {
        let transport = Arc::new(ScriptedTransport::new());
        let feeds: Vec<_> = (0..4).map(|_| transport.push_open()).collect();
        let sleeper = Arc::new(RecordingSleeper::new());
        sleeper.hold(GRACE);
        let bus = bus_with(&transport, &sleeper, options());

        bus.connect();
        for (i, feed) in feeds.iter().take(3).enumerate() {
            wait_opens(&transport, i + 1).await;
            feed.send(Err(TransportError::Closed("reset".to_string()))).unwrap();
        }
        wait_opens(&transport, 4).await;

        assert_eq!(
            reconnect_delays(&sleeper),
            vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
        );
    }

    #[tokio::test]
    async fn test_stable_connection_resets_backoff() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure(TransportError::Closed("refused".to_string()));
        transport.push_failure(TransportError::Closed("refused".to_string()));
        let feeds: Vec<_> = (0..2).map(|_| transport.push_open()).collect();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut tap = bus.tap();

        bus.connect();
        wait_opens(&transport, 3).await;
        // The grace sleep completes at once and is polled ahead of the stream
        feeds[0].send(Ok(line("ping", json!(null)))).unwrap();
        timeout(WAIT, tap.recv()).await.unwrap().unwrap();
        feeds[0].send(Err(TransportError::Closed("reset".to_string()))).unwrap();
        wait_opens(&transport, 4).await;

        assert_eq!(
            reconnect_delays(&sleeper),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(100)
            ]
        );
    }

    #[tokio::test]
    async fn test_auth_rejection_is_terminal() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..2 {
            transport.push_failure(TransportError::Unauthorized {
                status: 401,
                message: "token expired".to_string(),
            });
        }
        let _spare = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut status = bus.watch_status();

        bus.connect();
        let last = timeout(WAIT, status.wait_for(|s| s.is_terminal())).await.unwrap().unwrap().clone();

        assert_eq!(last.reason, Some(DisconnectReason::AuthRejected));
        assert_eq!(transport.opens(), 2);
        assert_eq!(reconnect_delays(&sleeper), vec![Duration::from_millis(100)]);
    }

    #[tokio::test]
    async fn test_auth_streak_broken_by_other_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        let unauthorized = || TransportError::Unauthorized {
            status: 403,
            message: String::new(),
        };
        transport.push_failure(unauthorized());
        transport.push_failure(TransportError::Closed("blip".to_string()));
        transport.push_failure(unauthorized());
        let _feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut status = bus.watch_status();

        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 4);
    }

    #[tokio::test]
    async fn test_disconnect_stops_driver_and_ignores_late_data() {
        let transport = Arc::new(ScriptedTransport::new());
        let feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let seen = Arc::new(Mutex::new(0));
        {
            let seen = seen.clone();
            bus.subscribe("t", move |_: &NamedEvent| *seen.lock().unwrap() += 1);
        }
        let mut status = bus.watch_status();

        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;
        bus.disconnect();
        bus.disconnect();

        assert_eq!(bus.status(), ConnectionStatus::disconnected(DisconnectReason::Requested));
        let _ = feed.send(Ok(line("t", json!({}))));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock().unwrap(), 0);
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let transport = Arc::new(ScriptedTransport::new());
        let _first = transport.push_open();
        let _second = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut status = bus.watch_status();

        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;
        bus.disconnect();
        wait_state(&mut status, ConnectionState::Disconnected).await;

        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 2);
    }

    fn unauthorized() -> TransportError {
        TransportError::Unauthorized {
            status: 401,
            message: "token expired".to_string(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_after_auth_rejection_stays_disconnected() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..4 {
            transport.push_failure(unauthorized());
        }
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(
            &transport,
            &sleeper,
            BusOptions {
                connect_on_subscribe: true,
                ..options()
            },
        );
        let mut status = bus.watch_status();

        bus.subscribe("job.started", |_: &NamedEvent| {});
        timeout(WAIT, status.wait_for(|s| s.is_terminal())).await.unwrap().unwrap();

        bus.subscribe("backup.failed", |_: &NamedEvent| {});
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert_eq!(transport.opens(), 2);
        assert_eq!(bus.status(), ConnectionStatus::disconnected(DisconnectReason::AuthRejected));
        assert_eq!(bus.subscriber_count("backup.failed"), 1);
    }

    #[tokio::test]
    async fn test_subscribe_after_disconnect_stays_disconnected() {
        let transport = Arc::new(ScriptedTransport::new());
        let _first = transport.push_open();
        let _second = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(
            &transport,
            &sleeper,
            BusOptions {
                connect_on_subscribe: true,
                ..options()
            },
        );
        let mut status = bus.watch_status();

        bus.subscribe("job.started", |_: &NamedEvent| {});
        wait_state(&mut status, ConnectionState::Connected).await;
        bus.disconnect();

        bus.subscribe("job.failed", |_: &NamedEvent| {});
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        assert_eq!(transport.opens(), 1);
        assert_eq!(bus.status(), ConnectionStatus::disconnected(DisconnectReason::Requested));
    }

    #[tokio::test]
    async fn test_explicit_connect_after_auth_rejection() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure(unauthorized());
        transport.push_failure(unauthorized());
        let _feed = transport.push_open();
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let mut status = bus.watch_status();

        bus.connect();
        timeout(WAIT, status.wait_for(|s| s.is_terminal())).await.unwrap().unwrap();

        // The driver slot is empty by the time the terminal state is visible
        bus.connect();
        wait_state(&mut status, ConnectionState::Connected).await;
        assert_eq!(transport.opens(), 3);
        assert_eq!(bus.status().reason, None);
    }

    /// Transport and sleeper that wait for the test before each open and each
    /// reconnect delay; the grace timer never fires
    struct Stepped {
        script: ScriptedTransport,
        opens: tokio::sync::Semaphore,
        delays: tokio::sync::Semaphore,
    }

    impl Stepped {
        fn new() -> Self {
            Self {
                script: ScriptedTransport::new(),
                opens: tokio::sync::Semaphore::new(0),
                delays: tokio::sync::Semaphore::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EventTransport for Stepped {
        async fn open(&self) -> Result<ChunkStream, TransportError> {
            self.opens.acquire().await.unwrap().forget();
            self.script.open().await
        }
    }

    #[async_trait::async_trait]
    impl Sleeper for Stepped {
        async fn sleep(&self, duration: Duration) {
            if duration == GRACE {
                std::future::pending::<()>().await;
            }
            self.delays.acquire().await.unwrap().forget();
        }
    }

    #[tokio::test]
    async fn test_state_sequence_through_reconnect() {
        let stepped = Arc::new(Stepped::new());
        let feed = stepped.script.push_open();
        let _second = stepped.script.push_open();
        let bus = EventBus::with_sleeper(stepped.clone(), options(), stepped.clone());
        let mut status = bus.watch_status();
        let mut states = vec![bus.state()];

        bus.connect();
        states.push(wait_state(&mut status, ConnectionState::Connecting).await.state);
        stepped.opens.add_permits(1);
        states.push(wait_state(&mut status, ConnectionState::Connected).await.state);

        feed.send(Err(TransportError::Closed("reset".to_string()))).unwrap();
        states.push(wait_state(&mut status, ConnectionState::Reconnecting).await.state);
        stepped.delays.add_permits(1);
        states.push(wait_state(&mut status, ConnectionState::Connecting).await.state);
        stepped.opens.add_permits(1);
        states.push(wait_state(&mut status, ConnectionState::Connected).await.state);

        assert_eq!(
            states,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Reconnecting,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
        assert_eq!(stepped.script.opens(), 2);
    }

    #[tokio::test]
    async fn test_teardown_clears_subscriptions() {
        let transport = Arc::new(ScriptedTransport::new());
        let sleeper = Arc::new(RecordingSleeper::new());
        let bus = bus_with(&transport, &sleeper, options());
        let sub = bus.subscribe("t", |_: &NamedEvent| {});

        bus.teardown();

        assert!(bus.topics().is_empty());
        sub.unsubscribe();
        assert_eq!(bus.state(), ConnectionState::Disconnected);
    }
}
