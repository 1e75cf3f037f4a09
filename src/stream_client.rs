//! `StreamClient` — a reusable low-level stream client with heartbeat,
//! bounded reconnection and network-awareness (spec §4.1).
//!
//! Shaped after the teacher's `relay::relay_loop` (connect, split into
//! sink/stream, drive a `tokio::select!` over inbound frames / outbound
//! commands / heartbeat tick) and `cli::client::DaemonClient` (connect with
//! a bounded timeout, read until the frame you want). Where the teacher's
//! relay loop reconnects unconditionally with exponential backoff, this
//! client implements the spec's linear-backoff-with-ceiling policy and
//! bounds the attempt count, logging through `tracing` exactly as the
//! teacher's modules do rather than taking a boxed "sink" parameter.

use crate::config::{now_ms, Callback, HeartbeatMessageFn};
use crate::envelope::Envelope;
use crate::error::StreamHubError;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// `{DISCONNECTED → CONNECTING → OPEN → CLOSING → DISCONNECTED}` (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
}

impl ReadyState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ReadyState::Connecting,
            2 => ReadyState::Open,
            3 => ReadyState::Closing,
            _ => ReadyState::Disconnected,
        }
    }
}

/// A `send()` payload — a string is sent verbatim, a JSON map is serialized.
#[derive(Debug, Clone)]
pub enum SendPayload {
    Text(String),
    Json(serde_json::Value),
}

impl SendPayload {
    fn into_text(self) -> String {
        match self {
            SendPayload::Text(s) => s,
            SendPayload::Json(v) => v.to_string(),
        }
    }
}

impl From<&str> for SendPayload {
    fn from(s: &str) -> Self {
        SendPayload::Text(s.to_string())
    }
}

impl From<serde_json::Value> for SendPayload {
    fn from(v: serde_json::Value) -> Self {
        SendPayload::Json(v)
    }
}

/// Invoked once the transport reaches OPEN.
pub type OpenHook = Arc<dyn Fn() + Send + Sync>;
/// Invoked when the transport closes with `(close code if known, time since
/// open)`. Only called for transport-initiated closes, never for an
/// explicit `disconnect()` — `SharedHost`'s fast-close circuit breaker
/// (spec §4.2) relies on that distinction.
pub type CloseHook = Arc<dyn Fn(Option<u16>, Duration) + Send + Sync>;
/// Invoked for every successfully parsed inbound envelope, before per-type
/// dispatch. `SharedHost` uses this to see every frame regardless of its own
/// subscriptions — it needs to cache-and-rebroadcast by type, which ordinary
/// `on(type, cb)` dispatch cannot give it without subscribing to every type
/// tabs might ever use.
pub type MessageHook = Arc<dyn Fn(&Envelope) + Send + Sync>;
/// Invoked whenever the live reconnect-attempt count changes — on every
/// scheduled reconnect and on the reset to 0 once a connection reaches OPEN.
/// Lets an owning coordinator (e.g. `Hub::connection_quality`) mirror the
/// count without polling [`StreamClient::reconnect_attempts`].
pub type ReconnectAttemptHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Tunables for a [`StreamClient`] — the reusable subset of `HubConfig` this
/// component actually needs (it has no notion of connection mode or
/// identity; those belong to the facade layer).
#[derive(Clone)]
pub struct StreamClientOptions {
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    pub auto_reconnect: bool,
    pub heartbeat_message: HeartbeatMessageFn,
    pub enable_network_listener: bool,
    /// Lets an owning coordinator (e.g. `SharedHost`) observe connection
    /// lifecycle without polling `ready_state()`.
    pub on_open: Option<OpenHook>,
    pub on_close: Option<CloseHook>,
    pub on_message: Option<MessageHook>,
    pub on_reconnect_attempt: Option<ReconnectAttemptHook>,
}

impl Default for StreamClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(25_000),
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(3_000),
            reconnect_delay_max: Duration::from_millis(10_000),
            auto_reconnect: true,
            heartbeat_message: Arc::new(|| Envelope::heartbeat(now_ms())),
            enable_network_listener: true,
            on_open: None,
            on_close: None,
            on_message: None,
            on_reconnect_attempt: None,
        }
    }
}

type Subscriptions = HashMap<String, Vec<(String, Callback)>>;

enum Command {
    Connect(Option<String>),
    Disconnect,
    Send(String),
    NetworkOnline,
    NetworkOffline,
}

struct Shared {
    ready_state: AtomicU8,
    manual_close: AtomicBool,
    subscriptions: StdMutex<Subscriptions>,
    /// Mirrors `driver_loop`'s local `attempts` counter so an owner (e.g.
    /// `Hub::connection_quality`) can observe it without a channel round
    /// trip. Reset to 0 whenever a connection reaches OPEN.
    reconnect_attempts: AtomicU32,
}

impl Shared {
    fn set_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }
}

/// A single full-duplex text-stream session: heartbeat, bounded
/// reconnection, typed callback dispatch, network-online awareness.
///
/// Cheaply cloneable — all clones share the same underlying connection and
/// subscriptions.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl StreamClient {
    /// Spawns the driver task and returns a handle to it. The driver sits
    /// idle (`DISCONNECTED`) until [`StreamClient::connect`] is called.
    pub fn new(options: StreamClientOptions) -> Self {
        let shared = Arc::new(Shared {
            ready_state: AtomicU8::new(ReadyState::Disconnected as u8),
            manual_close: AtomicBool::new(false),
            subscriptions: StdMutex::new(HashMap::new()),
            reconnect_attempts: AtomicU32::new(0),
        });
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(driver_loop(shared.clone(), rx, options));

        Self {
            shared,
            commands: tx,
        }
    }

    /// Opens the stream; idempotent if already OPEN or CONNECTING. `url` may
    /// be omitted to reconnect to the last-used URL.
    pub fn connect(&self, url: Option<String>) {
        let current = self.shared.state();
        if current == ReadyState::Open || current == ReadyState::Connecting {
            trace!(?current, "connect() is a no-op — already open or connecting");
            return;
        }
        self.shared.manual_close.store(false, Ordering::SeqCst);
        self.shared.set_state(ReadyState::Connecting);
        let _ = self.commands.send(Command::Connect(url));
    }

    /// Marks manualClose, closes the stream, cancels heartbeat and any
    /// pending reconnect. Does not clear subscriptions.
    pub fn disconnect(&self) {
        self.shared.manual_close.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Accepts a string or JSON map; maps are serialized as JSON. Fails with
    /// `SendUnavailable` if the stream is not OPEN.
    pub fn send(&self, payload: impl Into<SendPayload>) -> Result<(), StreamHubError> {
        if self.shared.state() != ReadyState::Open {
            warn!("send() called while not OPEN — dropping payload");
            return Err(StreamHubError::SendUnavailable);
        }
        let _ = self.commands.send(Command::Send(payload.into().into_text()));
        Ok(())
    }

    /// Registers a subscription, returning its callback id (used for
    /// targeted `off`). Fails with `InvalidSubscription` if `type` is empty.
    pub fn on(&self, r#type: impl Into<String>, callback: Callback) -> Result<String, StreamHubError> {
        let r#type = r#type.into();
        if r#type.is_empty() {
            warn!("on() called with an empty type — rejecting subscription");
            return Err(StreamHubError::InvalidSubscription("type is empty".to_string()));
        }
        let id = Uuid::new_v4().to_string();
        let mut subs = self.shared.subscriptions.lock().expect("subscriptions lock poisoned");
        subs.entry(r#type).or_default().push((id.clone(), callback));
        Ok(id)
    }

    /// Removes the subscription with `callback_id`, or all subscriptions
    /// for `type` if `callback_id` is `None`.
    pub fn off(&self, r#type: &str, callback_id: Option<&str>) {
        let mut subs = self.shared.subscriptions.lock().expect("subscriptions lock poisoned");
        match callback_id {
            Some(id) => {
                if let Some(list) = subs.get_mut(r#type) {
                    list.retain(|(cb_id, _)| cb_id != id);
                }
            }
            None => {
                subs.remove(r#type);
            }
        }
    }

    pub fn clear_subscriptions(&self) {
        self.shared.subscriptions.lock().expect("subscriptions lock poisoned").clear();
    }

    pub fn is_open(&self) -> bool {
        self.shared.state() == ReadyState::Open
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    /// Current position in the reconnect backoff series — 0 while connected
    /// or idle, the attempt number while a reconnect is pending or in
    /// flight. Resets to 0 once a connection reaches OPEN (spec §4.1 "On
    /// success, resets attempts to 0").
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Signals a network-online transition: cancels any pending backoff and
    /// reconnects immediately if not already OPEN (spec §4.1).
    pub fn notify_network_online(&self) {
        let _ = self.commands.send(Command::NetworkOnline);
    }

    /// Signals a network-offline transition: cancels any pending reconnect.
    pub fn notify_network_offline(&self) {
        let _ = self.commands.send(Command::NetworkOffline);
    }
}

/// Dispatches `envelope` to every callback registered for its type, in
/// insertion order, each inside its own failure boundary.
fn dispatch(shared: &Shared, envelope: &Envelope) {
    let callbacks: Vec<Callback> = {
        let subs = shared.subscriptions.lock().expect("subscriptions lock poisoned");
        match subs.get(&envelope.r#type) {
            Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        }
    };
    for callback in callbacks {
        invoke_callback_safely(&callback, &envelope.data, envelope);
    }
}

/// Runs `callback` inside a panic boundary so one bad subscriber cannot take
/// down dispatch to the others (spec §4.1 "each callback runs inside a
/// failure boundary").
pub(crate) fn invoke_callback_safely(callback: &Callback, data: &serde_json::Value, envelope: &Envelope) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        callback(data, envelope);
    }));
    if result.is_err() {
        warn!(r#type = %envelope.r#type, "subscriber callback panicked — isolated, dispatch continues");
    }
}

/// The driver task: owns the actual transport, the heartbeat timer and the
/// reconnect loop. Runs for the lifetime of the [`StreamClient`] handle.
///
/// Two nested loops: the outer `'sessions` loop waits for an explicit
/// `connect()` (or a network-online signal once a URL is known), then the
/// inner loop repeatedly calls [`run_connection`] for that URL, applying the
/// backoff policy between attempts, until the session ends in a manual
/// close or an exhausted/disabled reconnect policy sends control back out
/// to `'sessions`.
async fn driver_loop(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>, options: StreamClientOptions) {
    let mut last_url: Option<String> = None;

    'sessions: loop {
        let url = match await_connect_trigger(&mut commands, &last_url).await {
            Some(url) => url,
            None => return, // handle dropped — shut the driver down
        };
        last_url = Some(url.clone());
        let mut attempts: u32 = 0;

        loop {
            match run_connection(&shared, &url, &mut commands, &options).await {
                ConnectionOutcome::ManualClose => {
                    shared.set_state(ReadyState::Disconnected);
                    continue 'sessions;
                }
                ConnectionOutcome::ShouldReconnect { reached_open, .. } => {
                    shared.set_state(ReadyState::Disconnected);
                    if !options.auto_reconnect {
                        continue 'sessions;
                    }
                    attempts = next_attempt(attempts, reached_open);
                    shared.reconnect_attempts.store(attempts, Ordering::SeqCst);
                    if let Some(hook) = &options.on_reconnect_attempt {
                        hook(attempts);
                    }
                    if attempts > options.max_reconnect_attempts {
                        warn!(attempts, "reconnect attempts exhausted — giving up until a fresh trigger");
                        continue 'sessions;
                    }
                    let delay = (options.reconnect_delay * attempts).min(options.reconnect_delay_max);
                    debug!(attempt = attempts, delay_ms = delay.as_millis(), "scheduling reconnect");
                    match wait_for_reconnect(&shared, &mut commands, delay).await {
                        WaitOutcome::TimedOut => {}
                        WaitOutcome::ResetAndProceed => attempts = 0,
                        WaitOutcome::Cancelled => continue 'sessions,
                    }
                    shared.reconnect_attempts.store(attempts, Ordering::SeqCst);
                    if let Some(hook) = &options.on_reconnect_attempt {
                        hook(attempts);
                    }
                    shared.set_state(ReadyState::Connecting);
                }
            }
        }
    }
}

/// Waits while idle for a `Connect` command, or — if a prior URL is known —
/// a `NetworkOnline` signal, which reconnects immediately (spec §4.1
/// "network awareness"). Returns `None` once the command channel closes.
async fn await_connect_trigger(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    last_url: &Option<String>,
) -> Option<String> {
    loop {
        match commands.recv().await {
            Some(Command::Connect(u)) => {
                let target = u.or_else(|| last_url.clone());
                match target {
                    Some(target) => return Some(target),
                    None => warn!("connect() called with no URL and no prior URL to reuse"),
                }
            }
            Some(Command::NetworkOnline) => {
                if let Some(url) = last_url {
                    return Some(url.clone());
                }
            }
            Some(_) => continue,
            None => return None,
        }
    }
}

/// Advances the reconnect-attempt counter for the next backoff computation.
/// A connection that reached OPEN — however briefly — counts as a successful
/// connect; the series restarts from attempt 1, matching the teacher's
/// `relay/mod.rs` resetting `backoff_secs` to its floor on every successful
/// connect (spec §4.1 "On success, resets attempts to 0"). One that never
/// got past the handshake keeps accumulating toward `maxReconnectAttempts`.
fn next_attempt(prev: u32, reached_open: bool) -> u32 {
    if reached_open {
        1
    } else {
        prev + 1
    }
}

enum WaitOutcome {
    TimedOut,
    /// A network-online signal arrived — reset the attempt counter and
    /// reconnect immediately (spec §4.1).
    ResetAndProceed,
    /// A manual disconnect or network-offline signal cancelled the pending
    /// reconnect.
    Cancelled,
}

/// Sleeps for `delay`, but reacts early to `Disconnect`, `NetworkOffline`
/// (both cancel) and `NetworkOnline` (resets the backoff and proceeds now).
async fn wait_for_reconnect(
    shared: &Arc<Shared>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    delay: Duration,
) -> WaitOutcome {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return WaitOutcome::TimedOut,
            cmd = commands.recv() => match cmd {
                Some(Command::Disconnect) => {
                    shared.manual_close.store(true, Ordering::SeqCst);
                    return WaitOutcome::Cancelled;
                }
                Some(Command::NetworkOffline) => return WaitOutcome::Cancelled,
                Some(Command::NetworkOnline) | Some(Command::Connect(_)) => return WaitOutcome::ResetAndProceed,
                Some(_) => continue,
                None => return WaitOutcome::Cancelled,
            }
        }
    }
}

enum ConnectionOutcome {
    ManualClose,
    /// `reached_open` distinguishes "never got past the initial handshake"
    /// (the backoff series continues) from "was OPEN at some point before
    /// this close" (the backoff series resets — spec §4.1 "On success,
    /// resets attempts to 0").
    ShouldReconnect { reached_open: bool, opened: Instant },
}

/// Runs one connection attempt end to end: connect, authenticate nothing
/// (auth lives in the URL per spec §6), then drive the select loop until
/// the stream closes or a manual disconnect arrives.
async fn run_connection(
    shared: &Arc<Shared>,
    url: &str,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    options: &StreamClientOptions,
) -> ConnectionOutcome {
    let opened_at = Instant::now();
    let connected = tokio_tungstenite::connect_async(url).await;
    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::error!(err = %e, url, "transport error connecting");
            return ConnectionOutcome::ShouldReconnect { reached_open: false, opened: opened_at };
        }
    };
    shared.set_state(ReadyState::Open);
    if shared.reconnect_attempts.swap(0, Ordering::SeqCst) != 0 {
        if let Some(hook) = &options.on_reconnect_attempt {
            hook(0);
        }
    }
    debug!(url, "stream open");
    if let Some(hook) = &options.on_open {
        hook();
    }

    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = tokio::time::interval(options.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // first tick fires immediately; consume it

    let fire_close_hook = |code: Option<u16>| {
        if let Some(hook) = &options.on_close {
            hook(code, opened_at.elapsed());
        }
    };

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Disconnect) => {
                        shared.set_state(ReadyState::Closing);
                        let _ = sink.send(Message::Close(None)).await;
                        return ConnectionOutcome::ManualClose;
                    }
                    Some(Command::Send(text)) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::error!(err = %e, "transport error sending");
                            fire_close_hook(None);
                            return ConnectionOutcome::ShouldReconnect { reached_open: true, opened: opened_at };
                        }
                    }
                    Some(Command::Connect(_)) => {
                        trace!("connect() while already open — no-op");
                    }
                    Some(Command::NetworkOffline) => {
                        debug!("network offline — awaiting online signal (no active reconnect to cancel while open)");
                    }
                    Some(Command::NetworkOnline) => {
                        trace!("network online — already connected, nothing to do");
                    }
                    None => {
                        shared.set_state(ReadyState::Closing);
                        return ConnectionOutcome::ManualClose;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if shared.state() != ReadyState::Open {
                    continue; // CLOSING — heartbeat tick is a no-op
                }
                let envelope = (options.heartbeat_message)();
                if let Err(e) = sink.send(Message::Text(envelope.to_json_string())).await {
                    tracing::error!(err = %e, "heartbeat send failed");
                    fire_close_hook(None);
                    return ConnectionOutcome::ShouldReconnect { reached_open: true, opened: opened_at };
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match Envelope::from_json_str(&text) {
                            Ok(Some(envelope)) => {
                                if let Some(hook) = &options.on_message {
                                    hook(&envelope);
                                }
                                dispatch(shared, &envelope);
                            }
                            Ok(None) => { /* missing/non-string type — silent drop */ }
                            Err(e) => warn!(err = %e, "malformed inbound frame dropped"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        debug!(?code, "stream closed by peer");
                        fire_close_hook(code);
                        return ConnectionOutcome::ShouldReconnect { reached_open: true, opened: opened_at };
                    }
                    None => {
                        debug!("stream closed by peer");
                        fire_close_hook(None);
                        return ConnectionOutcome::ShouldReconnect { reached_open: true, opened: opened_at };
                    }
                    Some(Ok(_)) => { /* binary/pong frames are not part of this protocol */ }
                    Some(Err(e)) => {
                        tracing::error!(err = %e, "transport error on read");
                        fire_close_hook(None);
                        return ConnectionOutcome::ShouldReconnect { reached_open: true, opened: opened_at };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_unavailable_when_not_open() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let client = StreamClient::new(StreamClientOptions::default());
            let result = client.send("hello");
            assert!(matches!(result, Err(StreamHubError::SendUnavailable)));
        });
    }

    #[test]
    fn on_rejects_empty_type() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let client = StreamClient::new(StreamClientOptions::default());
            let result = client.on("", Arc::new(|_, _| {}));
            assert!(matches!(result, Err(StreamHubError::InvalidSubscription(_))));
        });
    }

    #[tokio::test]
    async fn on_off_round_trips_subscription_state() {
        let client = StreamClient::new(StreamClientOptions::default());
        let id = client.on("UNREAD", Arc::new(|_, _| {})).unwrap();
        {
            let subs = client.shared.subscriptions.lock().unwrap();
            assert_eq!(subs.get("UNREAD").map(|l| l.len()), Some(1));
        }
        client.off("UNREAD", Some(&id));
        {
            let subs = client.shared.subscriptions.lock().unwrap();
            assert_eq!(subs.get("UNREAD").map(|l| l.len()), Some(0));
        }
    }

    #[tokio::test]
    async fn clear_subscriptions_removes_everything() {
        let client = StreamClient::new(StreamClientOptions::default());
        client.on("A", Arc::new(|_, _| {})).unwrap();
        client.on("B", Arc::new(|_, _| {})).unwrap();
        client.clear_subscriptions();
        let subs = client.shared.subscriptions.lock().unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let client = StreamClient::new(StreamClientOptions::default());
        assert_eq!(client.ready_state(), ReadyState::Disconnected);
        assert!(!client.is_open());
    }

    #[test]
    fn next_attempt_resets_after_reaching_open() {
        assert_eq!(next_attempt(7, true), 1);
    }

    #[test]
    fn next_attempt_accumulates_when_never_opened() {
        assert_eq!(next_attempt(7, false), 8);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_stop_dispatch() {
        use std::sync::atomic::{AtomicUsize, Ordering as O};
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let shared = Arc::new(Shared {
            ready_state: AtomicU8::new(ReadyState::Open as u8),
            manual_close: AtomicBool::new(false),
            subscriptions: StdMutex::new(HashMap::new()),
            reconnect_attempts: AtomicU32::new(0),
        });
        {
            let mut subs = shared.subscriptions.lock().unwrap();
            subs.entry("X".to_string()).or_default().push((
                "a".to_string(),
                Arc::new(|_: &serde_json::Value, _: &Envelope| panic!("boom")) as Callback,
            ));
            subs.entry("X".to_string()).or_default().push((
                "b".to_string(),
                Arc::new(move |_: &serde_json::Value, _: &Envelope| {
                    hits2.fetch_add(1, O::SeqCst);
                }) as Callback,
            ));
        }
        let envelope = Envelope::new("X", serde_json::Value::Null);
        dispatch(&shared, &envelope);
        assert_eq!(hits.load(O::SeqCst), 1);
    }
}
