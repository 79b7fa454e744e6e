//! The persistent connection to the debugger proxy and the worker lifetimes
//! it creates and retires.
//!
//! One driver task owns the socket, the current [`WorkerLifetime`] and all
//! dispatch state. Replies from sandboxes and results of lifetime starts are
//! funneled back into that task over channels, so nothing here is shared.

use futures::{SinkExt, StreamExt};
use script_importer::ScriptFetcher;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{ProxyConfig, WorkerConfig};
use crate::error::{TransportError, WorkerError, print_debugging_error};
use crate::lifetime::WorkerLifetime;
use crate::limiter::ExecutionsLimiter;
use crate::protocol::{ReplyMessage, WireMessage};
use crate::transport::{FrameSink, ProxyConnection, ProxyConnector};

const SOCKET_OPENED_KEY: &str = "onSocketOpened.msg";
const SOCKET_CLOSED_KEY: &str = "onSocketClose.msg";

pub struct LifetimeMultiplexer {
    proxy: ProxyConfig,
    worker: WorkerConfig,
    connector: Arc<dyn ProxyConnector>,
    fetcher: Arc<dyn ScriptFetcher>,
}

/// Handle to a running multiplexer.
pub struct MultiplexerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl MultiplexerHandle {
    /// Stop reconnecting, retire the current lifetime and wait for the
    /// driver to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!("Lifetime multiplexer task failed: {}", e);
        }
    }
}

impl LifetimeMultiplexer {
    pub fn new(
        proxy: ProxyConfig,
        worker: WorkerConfig,
        connector: Arc<dyn ProxyConnector>,
        fetcher: Arc<dyn ScriptFetcher>,
    ) -> Self {
        Self {
            proxy,
            worker,
            connector,
            fetcher,
        }
    }

    /// Spawn the connection driver onto the current tokio runtime.
    ///
    /// The returned future resolves once the grace window has passed, or
    /// fails with the error of the first connection attempt if it fails
    /// inside that window. Either way the driver keeps reconnecting until
    /// [`MultiplexerHandle::shutdown`].
    pub fn start(
        self,
        warn_on_failure: bool,
    ) -> (
        MultiplexerHandle,
        impl Future<Output = Result<(), TransportError>> + Send + 'static,
    ) {
        let shutdown = CancellationToken::new();
        let (first_failure_tx, first_failure_rx) = oneshot::channel();
        let grace = self.proxy.start_grace;

        let driver = Driver::new(self, shutdown.clone());
        let task = tokio::spawn(driver.run(warn_on_failure, first_failure_tx));

        let started = async move {
            tokio::select! {
                Ok(error) = first_failure_rx => Err(error),
                _ = tokio::time::sleep(grace) => Ok(()),
            }
        };

        (MultiplexerHandle { shutdown, task }, started)
    }
}

/// Result of a lifetime's `start()`, reported back to the driver.
struct StartOutcome {
    lifetime_id: u64,
    reply: ReplyMessage,
    raw: Value,
    result: Result<(), WorkerError>,
}

struct Driver {
    proxy: ProxyConfig,
    worker: WorkerConfig,
    connector: Arc<dyn ProxyConnector>,
    fetcher: Arc<dyn ScriptFetcher>,
    shutdown: CancellationToken,
    limiter: ExecutionsLimiter,

    lifetime: Option<WorkerLifetime>,
    next_lifetime_id: u64,

    outbound_tx: mpsc::UnboundedSender<Value>,
    outbound_rx: mpsc::UnboundedReceiver<Value>,
    started_tx: mpsc::UnboundedSender<StartOutcome>,
    started_rx: mpsc::UnboundedReceiver<StartOutcome>,
}

impl Driver {
    fn new(multiplexer: LifetimeMultiplexer, shutdown: CancellationToken) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            proxy: multiplexer.proxy,
            worker: multiplexer.worker,
            connector: multiplexer.connector,
            fetcher: multiplexer.fetcher,
            shutdown,
            limiter: ExecutionsLimiter::new(),
            lifetime: None,
            next_lifetime_id: 0,
            outbound_tx,
            outbound_rx,
            started_tx,
            started_rx,
        }
    }

    async fn run(
        mut self,
        mut warn_on_failure: bool,
        first_failure: oneshot::Sender<TransportError>,
    ) {
        let url = self.proxy.debugger_proxy_url();
        let mut first_failure = Some(first_failure);

        loop {
            debug!("Connecting to the debugger proxy at {}", url);
            let connect = self.connector.connect(&url);
            let Some(attempt) = self.while_disconnected(connect).await else {
                break;
            };

            match attempt {
                Ok(connection) => {
                    // The first attempt got through; start() falls back to its grace window
                    first_failure.take();
                    self.limiter
                        .execute(SOCKET_OPENED_KEY, self.proxy.log_rate_limit, || {
                            info!("Established a connection with the Proxy (Packager) to the React Native application")
                        });
                    if let Err(e) = self.session(connection).await {
                        debug!("Connection to the debugger proxy failed: {}", e);
                    }
                }
                Err(e) => {
                    if warn_on_failure {
                        print_debugging_error(
                            "Reconnection to the proxy (Packager) failed. Please check the output window for Packager errors, if any. If failure persists, please restart the React Native debugger",
                            &e,
                        );
                    }
                    if let Some(tx) = first_failure.take() {
                        let _ = tx.send(e);
                    }
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            self.limiter
                .execute(SOCKET_CLOSED_KEY, self.proxy.log_rate_limit, || {
                    info!("Disconnected from the Proxy (Packager) to the React Native application. Retrying reconnection soon...")
                });

            let delay = tokio::time::sleep(self.proxy.reconnect_delay);
            if self.while_disconnected(delay).await.is_none() {
                break;
            }
            warn_on_failure = true;
        }

        self.lifetime.take();
        debug!("Lifetime multiplexer stopped");
    }

    /// Drive `fut` to completion while no socket is open. Replies and start
    /// outcomes that arrive meanwhile are dropped, never held for the next
    /// connection. Returns `None` on shutdown.
    async fn while_disconnected<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                Some(message) = self.outbound_rx.recv() => drop_unsent(&message),
                Some(outcome) = self.started_rx.recv() => {
                    if let Some(reply) = self.on_lifetime_started(outcome) {
                        drop_unsent(&reply);
                    }
                }
                output = &mut fut => return Some(output),
            }
        }
    }

    /// Pump one connection until it closes, errors or shutdown is requested.
    async fn session(&mut self, connection: ProxyConnection) -> Result<(), TransportError> {
        let ProxyConnection {
            mut sink,
            mut stream,
        } = connection;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
                Some(outcome) = self.started_rx.recv() => {
                    if let Some(reply) = self.on_lifetime_started(outcome) {
                        send_message_to_app(&mut sink, &reply).await;
                    }
                }
                Some(message) = self.outbound_rx.recv() => {
                    send_message_to_app(&mut sink, &message).await;
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.on_message(&text),
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                },
            }
        }
    }

    fn on_message(&mut self, text: &str) {
        trace!("From RN APP: {}", text);

        let message = match WireMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                print_debugging_error(
                    &format!("Failed to process message from the React Native app. Message:\n{}", text),
                    &e,
                );
                return;
            }
        };

        match message {
            WireMessage::PrepareJsRuntime { id, raw } => self.prepare_js_runtime(id, raw),
            WireMessage::Disconnected => {
                if let Some(lifetime) = self.lifetime.take() {
                    debug!("The app disconnected; retired lifetime {}", lifetime.id());
                }
            }
            WireMessage::Forward { method, raw } => match &self.lifetime {
                Some(lifetime) => {
                    if let Err(e) = lifetime.post_message(raw) {
                        print_debugging_error(
                            &format!("Failed to deliver {} to the app worker", method),
                            &e,
                        );
                    }
                }
                None => {
                    warn!(
                        "Dropping {} from the React Native app: no app worker lifetime is active",
                        method
                    );
                }
            },
            WireMessage::NoMethod(_) => {
                debug!(
                    "The react-native app sent a message without specifying a method: {}",
                    text
                );
            }
        }
    }

    /// Replace the current lifetime with a fresh one and start it. The
    /// acknowledgement is sent once the start completes.
    fn prepare_js_runtime(&mut self, id: Option<Value>, raw: Value) {
        // Retire the previous lifetime before the new one exists
        self.lifetime.take();
        self.next_lifetime_id += 1;
        let lifetime_id = self.next_lifetime_id;
        let reply = ReplyMessage::for_request(id.as_ref());

        let outbound = self.outbound_tx.clone();
        let spawned = WorkerLifetime::spawn(
            lifetime_id,
            self.worker.clone(),
            self.fetcher.clone(),
            move |message| {
                let _ = outbound.send(message);
            },
        );
        let lifetime = match spawned {
            Ok(lifetime) => lifetime,
            Err(e) => {
                print_debugging_error(
                    &format!("Failed to prepare the JavaScript runtime environment. Message:\n{}", raw),
                    &e,
                );
                return;
            }
        };
        debug!("A new app worker lifetime was created.");

        let start = lifetime.start();
        self.lifetime = Some(lifetime);

        let started_tx = self.started_tx.clone();
        tokio::spawn(async move {
            let result = start.await;
            let _ = started_tx.send(StartOutcome {
                lifetime_id,
                reply,
                raw,
                result,
            });
        });
    }

    /// Returns the acknowledgement to send, if any.
    ///
    /// A request whose lifetime was replaced before its start finished is
    /// still acknowledged, unless the start itself failed.
    fn on_lifetime_started(&mut self, outcome: StartOutcome) -> Option<Value> {
        let current = self
            .lifetime
            .as_ref()
            .is_some_and(|lifetime| lifetime.id() == outcome.lifetime_id);

        if !current {
            return match outcome.result {
                Ok(()) | Err(WorkerError::LifetimeGone) => {
                    debug!("Acknowledging superseded lifetime {}", outcome.lifetime_id);
                    Some(outcome.reply.to_value())
                }
                Err(e) => {
                    debug!("Superseded lifetime {} failed to start: {}", outcome.lifetime_id, e);
                    None
                }
            };
        }

        match outcome.result {
            Ok(()) => Some(outcome.reply.to_value()),
            Err(e) => {
                print_debugging_error(
                    &format!(
                        "Failed to prepare the JavaScript runtime environment. Message:\n{}",
                        outcome.raw
                    ),
                    &e,
                );
                self.lifetime.take();
                None
            }
        }
    }
}

/// Replies produced while no socket is connected cannot be delivered.
fn drop_unsent(message: &Value) {
    print_debugging_error(
        &format!("Failed to send message to the React Native app. Message:\n{}", message),
        &TransportError::Closed,
    );
}

async fn send_message_to_app(sink: &mut FrameSink, message: &Value) {
    let stringified = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            print_debugging_error(
                &format!("Failed to send message to the React Native app. Message:\n{:?}", message),
                &e,
            );
            return;
        }
    };

    trace!("To RN APP: {}", stringified);
    if let Err(e) = sink.send(stringified.clone()).await {
        print_debugging_error(
            &format!("Failed to send message to the React Native app. Message:\n{}", stringified),
            &e,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyFileConfig, WorkerFileConfig};
    use futures::FutureExt;
    use futures::channel::mpsc as fmpsc;
    use futures::future::BoxFuture;
    use script_importer::{FetchError, FetchedScript};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tracing::Level;
    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    const WORKER: &str = r#"
        var messageHandlers = {
            executeApplicationScript: function (message, sendReply) {
                importScripts(message.url);
                sendReply();
            },
            ping: function (message, sendReply) { sendReply("pong"); },
            check: function (message, sendReply) { sendReply(typeof imported); }
        };
        onmessage = function (message) {
            var object = message.data;
            var sendReply = function (result) {
                postMessage({ replyID: object.id, result: result });
            };
            messageHandlers[object.method](object, sendReply);
        };
    "#;

    struct InlineFetcher;

    impl ScriptFetcher for InlineFetcher {
        fn fetch(
            &self,
            _url: &str,
            _debug_adapter_port: u16,
        ) -> BoxFuture<'static, Result<FetchedScript, FetchError>> {
            async {
                Ok(FetchedScript {
                    filepath: PathBuf::from("/tmp/index.bundle"),
                    contents: "var imported = true;".to_string(),
                })
            }
            .boxed()
        }
    }

    /// The proxy side of one fake connection.
    struct ProxyEnd {
        to_worker: fmpsc::UnboundedSender<Result<String, TransportError>>,
        from_worker: fmpsc::UnboundedReceiver<String>,
    }

    impl ProxyEnd {
        fn send(&self, text: &str) {
            self.to_worker.unbounded_send(Ok(text.to_string())).unwrap();
        }

        async fn recv(&mut self) -> Value {
            let text = tokio::time::timeout(Duration::from_secs(5), self.from_worker.next())
                .await
                .expect("timed out waiting for the worker")
                .expect("worker closed the connection");
            serde_json::from_str(&text).unwrap()
        }

        async fn expect_silence(&mut self, wait: Duration) {
            if let Ok(Some(text)) = tokio::time::timeout(wait, self.from_worker.next()).await {
                panic!("unexpected message from the worker: {}", text);
            }
        }
    }

    /// Hands out queued connections; fails once the queue is empty.
    #[derive(Default)]
    struct FakeConnector {
        attempts: AtomicUsize,
        connections: Mutex<VecDeque<ProxyConnection>>,
    }

    impl FakeConnector {
        fn push_connection(&self) -> ProxyEnd {
            let (to_worker, stream) = fmpsc::unbounded();
            let (sink, from_worker) = fmpsc::unbounded::<String>();
            self.connections.lock().unwrap().push_back(ProxyConnection {
                sink: Box::pin(sink.sink_map_err(|e| TransportError::Other(e.to_string()))),
                stream: stream.boxed(),
            });
            ProxyEnd {
                to_worker,
                from_worker,
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl ProxyConnector for FakeConnector {
        fn connect(&self, url: &str) -> BoxFuture<'static, Result<ProxyConnection, TransportError>> {
            assert!(url.ends_with("/debugger-proxy?role=debugger&name=vscode"));
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.connections.lock().unwrap().pop_front();
            async move { next.ok_or_else(|| TransportError::Other("connection refused".to_string())) }
                .boxed()
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        connector: Arc<FakeConnector>,
    }

    impl Fixture {
        fn new(worker_source: Option<&str>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            if let Some(source) = worker_source {
                std::fs::write(dir.path().join("debuggerWorker.js"), source).unwrap();
            }
            Self {
                dir,
                connector: Arc::new(FakeConnector::default()),
            }
        }

        fn multiplexer(&self) -> LifetimeMultiplexer {
            self.multiplexer_with(Arc::new(InlineFetcher), Duration::from_millis(10))
        }

        fn multiplexer_with(
            &self,
            fetcher: Arc<dyn ScriptFetcher>,
            reconnect_delay: Duration,
        ) -> LifetimeMultiplexer {
            let mut proxy = ProxyConfig::from_file(&ProxyFileConfig::default());
            proxy.reconnect_delay = reconnect_delay;
            proxy.start_grace = Duration::from_millis(50);
            let worker =
                WorkerConfig::from_file(&WorkerFileConfig::default(), self.dir.path().to_path_buf());
            LifetimeMultiplexer::new(proxy, worker, self.connector.clone(), fetcher)
        }
    }

    /// Serves the same script as [`InlineFetcher`] once a permit is released.
    struct GatedFetcher(Arc<Semaphore>);

    impl ScriptFetcher for GatedFetcher {
        fn fetch(
            &self,
            url: &str,
            debug_adapter_port: u16,
        ) -> BoxFuture<'static, Result<FetchedScript, FetchError>> {
            let gate = self.0.clone();
            let fetch = InlineFetcher.fetch(url, debug_adapter_port);
            async move {
                let _permit = gate.acquire_owned().await.unwrap();
                fetch.await
            }
            .boxed()
        }
    }

    /// Records the level and message of every event on this thread.
    #[derive(Clone, Default)]
    struct CapturedLogs {
        events: Arc<Mutex<Vec<(Level, String)>>>,
    }

    impl CapturedLogs {
        fn count(&self, level: Level, needle: &str) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, message)| *l == level && message.contains(needle))
                .count()
        }
    }

    struct MessageVisitor<'a>(&'a mut String);

    impl tracing::field::Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CapturedLogs {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.events
                .lock()
                .unwrap()
                .push((*event.metadata().level(), message));
        }
    }

    fn capture_logs() -> (CapturedLogs, DefaultGuard) {
        let logs = CapturedLogs::default();
        let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(logs.clone()));
        (logs, guard)
    }

    const RECONNECT_FAILED: &str = "Reconnection to the proxy (Packager) failed";

    #[tokio::test]
    async fn prepare_js_runtime_is_acknowledged_with_numeric_id() {
        let fx = Fixture::new(Some(WORKER));
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send(r#"{"method":"prepareJSRuntime","id":"7"}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 7 }));

        proxy.send(r#"{"method":"ping","id":8}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 8, "result": "pong" }));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frames_do_not_break_the_connection() {
        let fx = Fixture::new(Some(WORKER));
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send("{this is not json");
        proxy.send(r#"{"no":"method"}"#);
        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 1 }));
        assert_eq!(fx.connector.attempts(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn import_reply_arrives_after_script_evaluated() {
        let fx = Fixture::new(Some(WORKER));
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 1 }));

        proxy.send(r#"{"method":"executeApplicationScript","id":2,"url":"http://localhost:8081/index.bundle"}"#);
        assert_eq!(proxy.recv().await["replyID"], json!(2));

        proxy.send(r#"{"method":"check","id":3}"#);
        assert_eq!(
            proxy.recv().await,
            json!({ "replyID": 3, "result": "boolean" })
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failed_start_sends_no_reply() {
        let fx = Fixture::new(None);
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        proxy.expect_silence(Duration::from_millis(200)).await;

        // No lifetime is active afterwards
        proxy.send(r#"{"method":"ping","id":2}"#);
        proxy.expect_silence(Duration::from_millis(100)).await;

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn disconnected_retires_the_lifetime() {
        let fx = Fixture::new(Some(WORKER));
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 1 }));

        proxy.send(r#"{"method":"$disconnected"}"#);
        proxy.send(r#"{"method":"ping","id":2}"#);
        proxy.expect_silence(Duration::from_millis(200)).await;

        // A new prepareJSRuntime brings the worker back
        proxy.send(r#"{"method":"prepareJSRuntime","id":3}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 3 }));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn prepare_js_runtime_replaces_worker_state() {
        let fx = Fixture::new(Some(WORKER));
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 1 }));
        proxy.send(r#"{"method":"executeApplicationScript","id":2,"url":"http://localhost:8081/index.bundle"}"#);
        assert_eq!(proxy.recv().await["replyID"], json!(2));

        proxy.send(r#"{"method":"prepareJSRuntime","id":3}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 3 }));
        proxy.send(r#"{"method":"check","id":4}"#);
        assert_eq!(
            proxy.recv().await,
            json!({ "replyID": 4, "result": "undefined" })
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn closed_socket_is_reopened_and_lifetime_survives() {
        let fx = Fixture::new(Some(WORKER));
        let mut first = fx.connector.push_connection();
        let mut second = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        first.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(first.recv().await, json!({ "replyID": 1 }));

        // Proxy hangs up
        drop(first.to_worker);

        second.send(r#"{"method":"ping","id":2}"#);
        assert_eq!(second.recv().await, json!({ "replyID": 2, "result": "pong" }));
        assert_eq!(fx.connector.attempts(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn reconnects_after_every_close() {
        let fx = Fixture::new(Some(WORKER));
        let ends: Vec<ProxyEnd> = (0..3).map(|_| fx.connector.push_connection()).collect();
        let mut last = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        for end in ends {
            drop(end);
        }

        last.send(r#"{"method":"prepareJSRuntime","id":9}"#);
        assert_eq!(last.recv().await, json!({ "replyID": 9 }));
        assert_eq!(fx.connector.attempts(), 4);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn start_reports_first_connection_failure() {
        let fx = Fixture::new(Some(WORKER));
        let (handle, started) = fx.multiplexer().start(false);

        let err = started.await.unwrap_err();
        assert!(matches!(err, TransportError::Other(_)));

        // Still retrying in the background
        let mut proxy = fx.connector.push_connection();
        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 1 }));
        assert!(fx.connector.attempts() >= 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_reconnecting() {
        let fx = Fixture::new(Some(WORKER));
        let (handle, started) = fx.multiplexer().start(false);
        let _ = started.await;

        handle.shutdown().await;
        let attempts = fx.connector.attempts();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.connector.attempts(), attempts);
    }

    #[tokio::test]
    async fn reply_during_reconnect_delay_is_dropped() {
        let fx = Fixture::new(Some(WORKER));
        let gate = Arc::new(Semaphore::new(0));
        let mut first = fx.connector.push_connection();
        let mut second = fx.connector.push_connection();
        let (handle, started) = fx
            .multiplexer_with(Arc::new(GatedFetcher(gate.clone())), Duration::from_millis(300))
            .start(false);
        started.await.unwrap();

        first.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(first.recv().await, json!({ "replyID": 1 }));
        first.send(r#"{"method":"executeApplicationScript","id":2,"url":"http://localhost:8081/index.bundle"}"#);

        // Proxy hangs up; the import resolves while the driver waits to reconnect
        drop(first.to_worker);
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.add_permits(1);

        second.expect_silence(Duration::from_millis(600)).await;
        assert_eq!(fx.connector.attempts(), 2);

        second.send(r#"{"method":"check","id":3}"#);
        assert_eq!(
            second.recv().await,
            json!({ "replyID": 3, "result": "boolean" })
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn superseded_prepare_is_still_acknowledged() {
        let (logs, _guard) = capture_logs();
        let fx = Fixture::new(Some(WORKER));
        let mut proxy = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        proxy.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        proxy.send(r#"{"method":"prepareJSRuntime","id":2}"#);
        let mut acknowledged = vec![
            proxy.recv().await["replyID"].as_i64(),
            proxy.recv().await["replyID"].as_i64(),
        ];
        acknowledged.sort();
        assert_eq!(acknowledged, vec![Some(1), Some(2)]);

        proxy.send(r#"{"method":"ping","id":3}"#);
        assert_eq!(proxy.recv().await, json!({ "replyID": 3, "result": "pong" }));
        assert_eq!(logs.count(Level::WARN, "Failed to prepare"), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_the_reconnect_delay_and_warn_after_the_first() {
        let (logs, _guard) = capture_logs();
        let fx = Fixture::new(None);
        let (handle, started) = fx
            .multiplexer_with(Arc::new(InlineFetcher), Duration::from_secs(1))
            .start(false);
        assert!(started.await.is_err());
        assert_eq!(fx.connector.attempts(), 1);
        assert_eq!(logs.count(Level::WARN, RECONNECT_FAILED), 0);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(fx.connector.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.connector.attempts(), 2);
        assert_eq!(logs.count(Level::WARN, RECONNECT_FAILED), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.connector.attempts(), 3);
        assert_eq!(logs.count(Level::WARN, RECONNECT_FAILED), 2);
        assert_eq!(logs.count(Level::INFO, "Disconnected from the Proxy"), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn warn_on_failure_covers_the_first_attempt() {
        let (logs, _guard) = capture_logs();
        let fx = Fixture::new(None);
        let (handle, started) = fx.multiplexer().start(true);

        assert!(started.await.is_err());
        assert_eq!(logs.count(Level::WARN, RECONNECT_FAILED), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn connection_changes_are_logged_once_per_window() {
        let (logs, _guard) = capture_logs();
        let fx = Fixture::new(Some(WORKER));
        let ends: Vec<ProxyEnd> = (0..3).map(|_| fx.connector.push_connection()).collect();
        let mut last = fx.connector.push_connection();
        let (handle, started) = fx.multiplexer().start(false);
        started.await.unwrap();

        drop(ends);
        last.send(r#"{"method":"prepareJSRuntime","id":1}"#);
        assert_eq!(last.recv().await, json!({ "replyID": 1 }));
        assert_eq!(fx.connector.attempts(), 4);

        assert_eq!(logs.count(Level::INFO, "Established a connection"), 1);
        assert_eq!(logs.count(Level::INFO, "Disconnected from the Proxy"), 1);

        handle.shutdown().await;
    }
}
