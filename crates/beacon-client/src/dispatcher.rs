//! The event dispatcher.
//!
//! Presents a single `on(event, callback)` surface and hides the transport:
//! the first registration opens a WebSocket to the push endpoint when one is
//! configured and reachable, and otherwise falls back to HTTP long-polling
//! for the life of the dispatcher. Event names double as channel filter
//! entries; registrations arriving while the filter update is pending are
//! coalesced into a single `set-filter` (or a single poll restart).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_protocol::MessageId;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::events::EventRegistry;
use crate::longpoll::HttpPoller;
use crate::traits::{PollBackend, PollReply, PushStream};
use crate::websocket::WsStream;

/// A listener invoked when the push connection closes for good.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Dispatcher configuration.
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Push endpoint URL (`ws://…`). `None` forces long-polling.
    pub websocket_url: Option<String>,
    /// Long-poll base URL (`http://…`). `None` disables the fallback.
    pub poll_base_url: Option<String>,
    /// Last message id already seen, for catch-up across page loads.
    pub start_id: MessageId,
    /// Reopen the push connection after an unexpected close.
    pub auto_reconnect: bool,
    /// How long to wait for the WebSocket before falling back.
    pub connect_timeout: Duration,
    /// Delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Window in which filter changes are batched into one update.
    pub filter_debounce: Duration,
    /// Delay before retrying after a transport-level poll failure.
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            websocket_url: None,
            poll_base_url: None,
            start_id: 0,
            auto_reconnect: false,
            connect_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(2),
            filter_debounce: Duration::from_millis(200),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Connection lifecycle, observable via [`EventDispatcher::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport active.
    Disconnected,
    /// Transport selection or handshake in progress.
    Connecting,
    /// Receiving events.
    Ready,
    /// Push connection lost; waiting to reopen it.
    Reconnecting,
}

/// State shared between the API surface and the connection task.
struct Shared {
    config: DispatcherConfig,
    registry: EventRegistry,
    close_listeners: Mutex<Vec<CloseCallback>>,
    last_seen: AtomicU64,
    state: Mutex<ConnectionState>,
    started: AtomicBool,
    filter_dirty: AtomicBool,
    filter_notify: Notify,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "Dispatcher state change");
            *state = next;
        }
    }

    fn last_seen(&self) -> MessageId {
        self.last_seen.load(Ordering::Acquire)
    }

    fn mark_filter_dirty(&self) {
        self.filter_dirty.store(true, Ordering::Release);
        self.filter_notify.notify_one();
    }

    /// Handle one frame from the push endpoint. Anything that is not a
    /// delivery (e.g. an error envelope) is logged and dropped.
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<beacon_protocol::Message>(text) {
            Ok(message) => {
                self.last_seen.store(message.id, Ordering::Release);
                self.registry.dispatch(&message.channel, &message.payload);
            }
            Err(_) => {
                warn!(frame = text, "Unexpected frame from push endpoint");
            }
        }
    }

    fn fire_close(&self) {
        let listeners = self.close_listeners.lock().clone();
        for listener in listeners {
            listener();
        }
    }
}

/// The client-side event dispatcher.
pub struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    /// Create a dispatcher. No connection is made until the first
    /// [`on`](Self::on) call.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        let start_id = config.start_id;
        Self {
            shared: Arc::new(Shared {
                config,
                registry: EventRegistry::new(),
                close_listeners: Mutex::new(Vec::new()),
                last_seen: AtomicU64::new(start_id),
                state: Mutex::new(ConnectionState::Disconnected),
                started: AtomicBool::new(false),
                filter_dirty: AtomicBool::new(false),
                filter_notify: Notify::new(),
            }),
        }
    }

    /// Register a callback for an event name.
    ///
    /// The first call (for any name) starts the connection task; each new
    /// name widens the channel filter. Must be called from within a tokio
    /// runtime.
    pub fn on(&self, event: &str, callback: impl Fn(&str) + Send + Sync + 'static) {
        let new_name = self.shared.registry.register(event, Arc::new(callback));
        if new_name {
            self.shared.mark_filter_dirty();
        }

        let has_transport = self.shared.config.websocket_url.is_some()
            || self.shared.config.poll_base_url.is_some();
        if has_transport && !self.shared.started.swap(true, Ordering::SeqCst) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(run(shared));
        }
    }

    /// Register a listener for a final (non-reconnecting) push close.
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.shared.close_listeners.lock().push(Arc::new(callback));
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// The id of the most recently dispatched message.
    #[must_use]
    pub fn last_seen(&self) -> MessageId {
        self.shared.last_seen()
    }
}

/// Connection task: pick a transport, run it, and handle push reconnects.
async fn run(shared: Arc<Shared>) {
    loop {
        shared.set_state(ConnectionState::Connecting);

        let stream = match &shared.config.websocket_url {
            Some(url) => match WsStream::connect(url, shared.config.connect_timeout).await {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(error = %e, "Push transport unavailable");
                    None
                }
            },
            None => None,
        };

        match stream {
            Some(stream) => {
                run_push(&shared, stream).await;
                if !after_push_closed(&shared) {
                    return;
                }
                tokio::time::sleep(shared.config.reconnect_delay).await;
            }
            None => {
                // Long-poll fallback is permanent for this dispatcher.
                match &shared.config.poll_base_url {
                    Some(base) => {
                        let backend = HttpPoller::new(base.clone());
                        run_poll(&shared, &backend).await;
                    }
                    None => {
                        error!("No usable transport configured");
                        shared.set_state(ConnectionState::Disconnected);
                    }
                }
                return;
            }
        }
    }
}

/// Decide what happens after the push connection ends. Returns `true` to
/// reconnect.
fn after_push_closed(shared: &Shared) -> bool {
    if shared.config.auto_reconnect {
        warn!("Lost push connection, reconnecting");
        // The new connection must resend the whole filter.
        shared.filter_dirty.store(true, Ordering::Release);
        shared.set_state(ConnectionState::Reconnecting);
        true
    } else {
        shared.set_state(ConnectionState::Disconnected);
        shared.fire_close();
        false
    }
}

/// Drive one push connection until it closes.
///
/// On open the recorded last-seen id is announced with `start-msg`; filter
/// updates are debounced so that a burst of `on` calls produces a single
/// `set-filter` carrying every registered name.
async fn run_push<S: PushStream>(shared: &Shared, mut stream: S) {
    let start = json!({"command": "start-msg", "start": shared.last_seen()}).to_string();
    if stream.send(start).await.is_err() {
        return;
    }
    shared.set_state(ConnectionState::Ready);

    loop {
        if shared.filter_dirty.swap(false, Ordering::AcqRel) {
            tokio::time::sleep(shared.config.filter_debounce).await;
            // Snapshot after the debounce window so registrations that
            // landed during it ride along in the same update.
            shared.filter_dirty.store(false, Ordering::Release);
            let filter = shared.registry.channel_names();
            if !filter.is_empty() {
                let command = json!({"command": "set-filter", "filter": filter}).to_string();
                if stream.send(command).await.is_err() {
                    return;
                }
            }
            continue;
        }

        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Ok(Some(text)) => shared.handle_frame(&text),
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "Push connection error");
                        return;
                    }
                }
            }
            _ = shared.filter_notify.notified() => {
                // Loop back; the dirty flag drives the actual send.
            }
        }
    }
}

/// Drive the long-poll loop forever.
///
/// One request is outstanding at a time. A 504 re-polls immediately; a
/// transport failure backs off by `retry_delay`; a filter change aborts the
/// in-flight request and restarts with the new channel set.
async fn run_poll<B: PollBackend>(shared: &Shared, backend: &B) {
    shared.set_state(ConnectionState::Ready);

    loop {
        let filter = shared.registry.channel_names();
        if filter.is_empty() {
            shared.filter_notify.notified().await;
            continue;
        }
        shared.filter_dirty.store(false, Ordering::Release);
        let channels = filter.join("|");

        tokio::select! {
            reply = backend.poll(&channels, shared.last_seen()) => {
                match reply {
                    Ok(PollReply::Message(message)) => {
                        shared.last_seen.store(message.id, Ordering::Release);
                        shared.registry.dispatch(&message.channel, &message.payload);
                    }
                    Ok(PollReply::TimedOut) => {
                        // Expected outcome of a quiet hold; go straight back.
                    }
                    Err(e) => {
                        warn!(error = %e, "Long poll failed");
                        tokio::time::sleep(shared.config.retry_delay).await;
                    }
                }
            }
            _ = shared.filter_notify.notified() => {
                debug!("Filter changed, restarting poll");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_protocol::Message;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    use crate::traits::ClientError;

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            filter_debounce: Duration::from_millis(10),
            retry_delay: Duration::from_millis(10),
            ..DispatcherConfig::default()
        }
    }

    /// In-memory push stream: records sent frames, feeds scripted incoming
    /// frames, closes when the incoming sender is dropped.
    struct MockStream {
        sent: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<String>,
    }

    fn mock_stream() -> (
        MockStream,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        (
            MockStream {
                sent: sent_tx,
                incoming: incoming_rx,
            },
            sent_rx,
            incoming_tx,
        )
    }

    #[async_trait]
    impl PushStream for MockStream {
        async fn send(&mut self, text: String) -> Result<(), ClientError> {
            self.sent
                .send(text)
                .map_err(|e| ClientError::SendFailed(e.to_string()))
        }

        async fn next(&mut self) -> Result<Option<String>, ClientError> {
            Ok(self.incoming.recv().await)
        }

        async fn close(&mut self) {}
    }

    fn filter_of(frame: &str) -> HashSet<String> {
        let value: serde_json::Value = serde_json::from_str(frame).unwrap();
        assert_eq!(value["command"], "set-filter");
        value["filter"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    fn names(entries: &[&str]) -> HashSet<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_push_sends_start_then_one_coalesced_filter() {
        let dispatcher = EventDispatcher::new(test_config());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            dispatcher.on("alpha", move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        dispatcher.on("beta", |_| {});

        let (stream, mut sent, incoming) = mock_stream();
        let shared = Arc::clone(&dispatcher.shared);
        let push = tokio::spawn(async move { run_push(&shared, stream).await });

        let start = sent.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&start).unwrap(),
            serde_json::json!({"command": "start-msg", "start": 0})
        );

        // Both names registered before the connection: exactly one update.
        let filter = sent.recv().await.unwrap();
        assert_eq!(filter_of(&filter), names(&["alpha", "beta"]));

        // Deliver a message and confirm dispatch + last-seen tracking.
        let delivery = serde_json::to_string(&Message::new(9, "alpha", "payload")).unwrap();
        incoming.send(delivery).unwrap();
        drop(incoming);
        push.await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.last_seen(), 9);
        assert!(sent.try_recv().is_err(), "no extra filter updates expected");
    }

    #[tokio::test]
    async fn test_late_registration_sends_second_filter() {
        let dispatcher = EventDispatcher::new(test_config());
        dispatcher.on("alpha", |_| {});

        let (stream, mut sent, incoming) = mock_stream();
        let shared = Arc::clone(&dispatcher.shared);
        let push = tokio::spawn(async move { run_push(&shared, stream).await });

        sent.recv().await.unwrap(); // start-msg
        assert_eq!(filter_of(&sent.recv().await.unwrap()), names(&["alpha"]));

        dispatcher.on("gamma", |_| {});
        let updated = sent.recv().await.unwrap();
        assert_eq!(filter_of(&updated), names(&["alpha", "gamma"]));

        drop(incoming);
        push.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_announces_updated_last_seen() {
        let dispatcher = EventDispatcher::new(DispatcherConfig {
            auto_reconnect: true,
            ..test_config()
        });
        dispatcher.on("alpha", |_| {});

        let (stream, mut sent, incoming) = mock_stream();
        let shared = Arc::clone(&dispatcher.shared);
        let push = tokio::spawn(async move { run_push(&shared, stream).await });

        sent.recv().await.unwrap(); // start-msg
        sent.recv().await.unwrap(); // set-filter
        incoming
            .send(serde_json::to_string(&Message::new(42, "alpha", "x")).unwrap())
            .unwrap();
        drop(incoming); // connection lost
        push.await.unwrap();

        assert!(after_push_closed(&dispatcher.shared));
        assert_eq!(dispatcher.state(), ConnectionState::Reconnecting);

        // The next connection replays state from the new baseline.
        let (stream, mut sent, incoming) = mock_stream();
        let shared = Arc::clone(&dispatcher.shared);
        let push = tokio::spawn(async move { run_push(&shared, stream).await });

        let start = sent.recv().await.unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&start).unwrap(),
            serde_json::json!({"command": "start-msg", "start": 42})
        );
        assert_eq!(filter_of(&sent.recv().await.unwrap()), names(&["alpha"]));

        drop(incoming);
        push.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_listener_fires_when_not_reconnecting() {
        let dispatcher = EventDispatcher::new(test_config());
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let closed = Arc::clone(&closed);
            dispatcher.on_close(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(!after_push_closed(&dispatcher.shared));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);
    }

    /// Scripted poll backend: hands out replies in order, records calls,
    /// then hangs forever.
    struct MockBackend {
        replies: Mutex<Vec<Result<PollReply, ClientError>>>,
        calls: Mutex<Vec<(String, MessageId)>>,
    }

    impl MockBackend {
        fn new(replies: Vec<Result<PollReply, ClientError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PollBackend for MockBackend {
        async fn poll(&self, channels: &str, last: MessageId) -> Result<PollReply, ClientError> {
            self.calls.lock().push((channels.to_string(), last));
            let next = {
                let mut replies = self.replies.lock();
                if replies.is_empty() {
                    None
                } else {
                    Some(replies.remove(0))
                }
            };
            match next {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test]
    async fn test_poll_loop_timeout_then_delivery() {
        let dispatcher = EventDispatcher::new(test_config());
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = Arc::clone(&fired);
            dispatcher.on("alpha", move |payload| {
                assert_eq!(payload, "hello");
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let backend = Arc::new(MockBackend::new(vec![
            Ok(PollReply::TimedOut),
            Ok(PollReply::Message(Message::new(7, "alpha", "hello"))),
        ]));

        let shared = Arc::clone(&dispatcher.shared);
        let poller = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { run_poll(&shared, &*backend).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        poller.abort();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.last_seen(), 7);

        let calls = backend.calls.lock().clone();
        assert!(calls.len() >= 3);
        // 504 re-polls with the same baseline; a delivery advances it.
        assert_eq!(calls[0], ("alpha".to_string(), 0));
        assert_eq!(calls[1], ("alpha".to_string(), 0));
        assert_eq!(calls[2], ("alpha".to_string(), 7));
    }

    #[tokio::test]
    async fn test_poll_restarts_with_new_filter() {
        let dispatcher = EventDispatcher::new(test_config());
        dispatcher.on("alpha", |_| {});

        let backend = Arc::new(MockBackend::new(Vec::new())); // hangs immediately
        let shared = Arc::clone(&dispatcher.shared);
        let poller = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { run_poll(&shared, &*backend).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.on("beta", |_| {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        poller.abort();

        let calls = backend.calls.lock().clone();
        assert!(calls.len() >= 2);
        assert_eq!(calls[0].0, "alpha");
        let last: HashSet<String> = calls
            .last()
            .unwrap()
            .0
            .split('|')
            .map(str::to_string)
            .collect();
        assert_eq!(last, names(&["alpha", "beta"]));
    }

    #[tokio::test]
    async fn test_poll_error_backs_off() {
        let dispatcher = EventDispatcher::new(test_config());
        dispatcher.on("alpha", |_| {});

        let backend = Arc::new(MockBackend::new(vec![Err(ClientError::RequestFailed(
            "boom".into(),
        ))]));
        let shared = Arc::clone(&dispatcher.shared);
        let poller = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { run_poll(&shared, &*backend).await })
        };

        // One failed call, then the retry delay holds the loop back before
        // the next (hanging) call.
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(backend.calls.lock().len(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.calls.lock().len(), 2);
        poller.abort();
    }
}
