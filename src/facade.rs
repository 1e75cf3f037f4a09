//! `Hub` — the single uniform entry point that owns configuration and the
//! current session identity, picks a connection mode, and wires up a
//! [`StreamClient`] or [`SharedClient`] accordingly (spec §4.4).
//!
//! Modeled on the teacher's `AppContext` (`daemon/src/lib.rs`): one struct
//! holding every piece of shared state an embedding application needs,
//! constructed once and threaded through rather than reached for as a bare
//! global in tests. Per spec §9's "implementers must decide whether to
//! expose it as an instance handle... or retain the singleton form," both
//! are offered: [`Hub`] is the instance type tests use directly, and
//! [`facade`] is a process-wide default instance for callers that want the
//! classic module-global singleton.

use crate::config::{Callback, HubConfig, PartialHubConfig, SubscriptionEntry};
use crate::error::StreamHubError;
use crate::identity::SessionIdentity;
use crate::shared::client::{SharedClient, SharedClientHooks};
use crate::shared::host::{self, SharedHostHandle};
use crate::shared::protocol::TabInitConfig;
use crate::stream_client::{StreamClient, StreamClientOptions};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tracing::warn;

/// Deterministic mode selection, resolved (never `Auto`) — spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Shared,
    Visibility,
    Direct,
}

/// Injectable capability predicates (spec §4.4, §9 "expose capability
/// probes as injectable predicates to keep tests deterministic"). There is
/// no browser to query for `SharedWorker`/`navigator.onLine` support in
/// this runtime, so both default to "supported" and tests override them to
/// exercise degradation paths deterministically.
#[derive(Clone)]
pub struct CapabilityProbes {
    pub shared_supported: Arc<dyn Fn() -> bool + Send + Sync>,
    pub visibility_supported: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl Default for CapabilityProbes {
    fn default() -> Self {
        Self {
            shared_supported: Arc::new(|| true),
            visibility_supported: Arc::new(|| true),
        }
    }
}

/// Lifecycle hooks mirroring `onConnected`/`onDisconnected`/`onError`/
/// `onAuthConflict` (spec §4.3) at the Facade's uniform surface — the same
/// four hooks fire regardless of which mode is actually driving the
/// connection underneath.
#[derive(Clone, Default)]
pub struct HubHooks {
    pub on_connected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_disconnected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str, Option<&str>) + Send + Sync>>,
    pub on_auth_conflict: Option<Arc<dyn Fn(&str, &str, &str) + Send + Sync>>,
}

/// A snapshot of connection health for embedding UIs — not named in
/// spec.md itself, but a natural extension of the teacher's
/// `connectivity::monitor` `QualitySnapshot` pattern (SPEC_FULL §2).
#[derive(Debug, Clone)]
pub struct ConnectionQuality {
    pub mode: Option<Mode>,
    pub connected: bool,
    pub reconnect_attempts: u32,
}

enum Connection {
    None,
    Direct(StreamClient),
    Visibility(StreamClient),
    Shared(SharedClient),
}

impl Connection {
    fn is_some(&self) -> bool {
        !matches!(self, Connection::None)
    }
}

struct StagedCallback {
    hub_id: String,
    r#type: String,
    callback: Callback,
}

struct HubState {
    config: HubConfig,
    identity: Option<SessionIdentity>,
    resolved_mode: Option<Mode>,
    connection: Connection,
    capability: CapabilityProbes,
    hooks: HubHooks,
    /// Every callback ever registered against this `Hub`, Hub-minted ids.
    /// Replayed into the live connection on every `start()` — this is the
    /// durable source of truth; `live` below is ephemeral per-connection
    /// bookkeeping cleared on `stop()`.
    staged: Vec<StagedCallback>,
    /// `type -> [(hub_id, underlying_id)]` for the currently live
    /// connection, so `unregister_callback` can translate a Hub-level id
    /// into whatever id the underlying `StreamClient`/`SharedClient`
    /// minted when `register_callback` forwarded it.
    live: HashMap<String, Vec<(String, String)>>,
}

/// A single, robust, authenticated message-stream connection — one per
/// embedding application, or one per test for isolation.
pub struct Hub {
    state: RwLock<HubState>,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<std::sync::atomic::AtomicU32>,
    shared_registry: Arc<StdMutex<HashMap<String, SharedHostHandle>>>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HubState {
                config: HubConfig::default(),
                identity: None,
                resolved_mode: None,
                connection: Connection::None,
                capability: CapabilityProbes::default(),
                hooks: HubHooks::default(),
                staged: Vec::new(),
                live: HashMap::new(),
            }),
            connected: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(std::sync::atomic::AtomicU32::new(0)),
            shared_registry: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Merges a partial config update (spec §4.4 `setConfig`). `callbacks`
    /// is a recognized option here too — supplying it has the same effect
    /// as calling `set_callbacks` with the same list.
    pub fn set_config(&self, partial: PartialHubConfig) {
        let mut state = self.state.write().expect("hub state lock poisoned");
        let callbacks = partial.callbacks.clone();
        state.config.merge_partial(partial);
        if let Some(entries) = callbacks {
            unregister_all_live(&mut state);
            state.staged.clear();
            for entry in entries {
                stage_and_forward(&mut state, entry.r#type, entry.callback);
            }
        }
    }

    /// Overrides the default always-supported capability probes — for
    /// tests exercising mode degradation.
    pub fn set_capability_probes(&self, probes: CapabilityProbes) {
        self.state.write().expect("hub state lock poisoned").capability = probes;
    }

    pub fn set_hooks(&self, hooks: HubHooks) {
        self.state.write().expect("hub state lock poisoned").hooks = hooks;
    }

    /// Replaces the staged callback list wholesale (spec §4.4
    /// `setCallbacks`). Forwards immediately to the live connection, if any.
    pub fn set_callbacks(&self, entries: Vec<SubscriptionEntry>) {
        let mut state = self.state.write().expect("hub state lock poisoned");
        unregister_all_live(&mut state);
        state.staged.clear();
        for entry in entries {
            stage_and_forward(&mut state, entry.r#type, entry.callback);
        }
    }

    /// Registers one subscription — staged if not yet connected, forwarded
    /// immediately (and staged for future reconnects) otherwise.
    pub fn register_callback(&self, r#type: impl Into<String>, callback: Callback) -> Result<String, StreamHubError> {
        let r#type = r#type.into();
        if r#type.is_empty() {
            return Err(StreamHubError::InvalidSubscription("type is empty".to_string()));
        }
        let mut state = self.state.write().expect("hub state lock poisoned");
        Ok(stage_and_forward(&mut state, r#type, callback))
    }

    /// Removes the subscription with `callback_id`, or all subscriptions
    /// for `type` if `callback_id` is `None` (spec §4.4 `unregisterCallback`).
    pub fn unregister_callback(&self, r#type: &str, callback_id: Option<&str>) {
        let mut state = self.state.write().expect("hub state lock poisoned");
        match callback_id {
            Some(hub_id) => {
                state.staged.retain(|c| !(c.r#type == r#type && c.hub_id == hub_id));
                if let Some(live) = state.live.get_mut(r#type) {
                    if let Some(pos) = live.iter().position(|(id, _)| id == hub_id) {
                        let (_, underlying_id) = live.remove(pos);
                        forward_unregister(&state.connection, r#type, Some(&underlying_id));
                    }
                }
            }
            None => {
                state.staged.retain(|c| c.r#type != r#type);
                if state.live.remove(r#type).is_some() {
                    forward_unregister(&state.connection, r#type, None);
                }
            }
        }
    }

    /// Validates config, selects a mode, tears down any prior connection
    /// whose identity differs, stands up the chosen component, and replays
    /// staged subscriptions (spec §4.4 `start`).
    ///
    /// Double `start()` with the same identity — and no `forceNewOnStart`
    /// — is a no-op (spec §9 Open Question, adopted explicitly).
    pub fn start(&self, user_id: impl Into<String>, credential: impl Into<String>) -> Result<(), StreamHubError> {
        let user_id = user_id.into();
        let credential = credential.into();
        let mut state = self.state.write().expect("hub state lock poisoned");

        let Some(base_url) = state.config.url.clone() else {
            return Err(StreamHubError::ConfigMissing("url".to_string()));
        };
        if user_id.is_empty() || credential.is_empty() {
            return Err(StreamHubError::ConfigMissing("userId/credential".to_string()));
        }
        let identity = SessionIdentity::new(base_url.clone(), user_id, credential);

        let unchanged = state.identity.as_ref() == Some(&identity) && state.connection.is_some();
        if unchanged && !state.config.force_new_on_start {
            return Ok(());
        }

        teardown_connection(&mut state);
        self.connected.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        state.identity = Some(identity.clone());

        let mode = resolve_mode(
            state.config.connection_mode,
            &state.capability,
            state.config.enable_visibility_management,
        );
        self.stand_up(&mut state, mode, identity);
        replay_staged(&mut state);
        Ok(())
    }

    /// Builds and installs the connection for `mode`, wiring hooks that
    /// update `self.connected`, forward the embedder's `HubHooks`, and —
    /// for `Shared` mode — watch for a `HostUnavailable` signal (spec §7):
    /// no `WORKER_READY` within 5s of `TAB_INIT`.
    ///
    /// Full automatic one-way degrade-and-restart (spec §4.4) would need a
    /// self-referential handle back into this `Hub`, which the public API
    /// doesn't assume callers hold as an `Arc`. Instead `HostUnavailable`
    /// is surfaced through `on_error` with an explanation; the embedder is
    /// expected to react by calling `start()` again with
    /// `connectionMode: Visibility` — see DESIGN.md.
    fn stand_up(&self, state: &mut HubState, mode: Mode, identity: SessionIdentity) {
        state.resolved_mode = Some(mode);
        let hooks = state.hooks.clone();
        match mode {
            Mode::Shared => {
                let host_handle = self.get_or_create_host(&identity.base_url);
                let config = tab_init_config(&state.config);
                let shared_hooks = self.shared_hooks(hooks);
                let client = SharedClient::start(
                    host_handle,
                    identity,
                    true,
                    config,
                    state.config.shared_idle_timeout,
                    shared_hooks,
                );
                state.connection = Connection::Shared(client);
            }
            Mode::Visibility | Mode::Direct => {
                let options = stream_options(&state.config, self.connected.clone(), self.reconnect_attempts.clone(), hooks);
                let stream = StreamClient::new(options);
                stream.connect(Some(identity.stream_url()));
                state.connection = if mode == Mode::Visibility {
                    Connection::Visibility(stream)
                } else {
                    Connection::Direct(stream)
                };
            }
        }
    }

    fn shared_hooks(&self, hooks: HubHooks) -> SharedClientHooks {
        let connected = self.connected.clone();
        let connected_close = connected.clone();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
        let ready_tx = Arc::new(StdMutex::new(Some(ready_tx)));
        let ready_tx_for_error = ready_tx.clone();

        let on_error_for_timeout = hooks.on_error.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(Duration::from_secs(5), ready_rx).await.is_err() {
                warn!("no WORKER_READY within 5s of TAB_INIT — shared host unavailable");
                if let Some(hook) = on_error_for_timeout {
                    hook("shared host unavailable", Some("restart with connectionMode: Visibility to recover"));
                }
            }
        });

        SharedClientHooks {
            on_ready: Some(Arc::new(move || {
                if let Some(tx) = ready_tx.lock().expect("ready_tx lock poisoned").take() {
                    let _ = tx.send(());
                }
            })),
            on_connected: Some(Arc::new({
                let connected = connected.clone();
                let user_hook = hooks.on_connected.clone();
                move || {
                    connected.store(true, Ordering::SeqCst);
                    if let Some(hook) = &user_hook {
                        hook();
                    }
                }
            })),
            on_disconnected: Some(Arc::new({
                let user_hook = hooks.on_disconnected.clone();
                move || {
                    connected_close.store(false, Ordering::SeqCst);
                    if let Some(hook) = &user_hook {
                        hook();
                    }
                }
            })),
            on_error: Some(Arc::new({
                let user_hook = hooks.on_error.clone();
                move |message: &str, detail: Option<&str>| {
                    if let Some(tx) = ready_tx_for_error.lock().expect("ready_tx lock poisoned").take() {
                        let _ = tx.send(());
                    }
                    if let Some(hook) = &user_hook {
                        hook(message, detail);
                    }
                }
            })),
            on_auth_conflict: Some(Arc::new(move |current_user_id: &str, new_user_id: &str, explanation: &str| {
                if let Some(hook) = &hooks.on_auth_conflict {
                    hook(current_user_id, new_user_id, explanation);
                }
            })),
            on_reconnect_attempt: Some(Arc::new({
                let reconnect_attempts = self.reconnect_attempts.clone();
                move |attempts| {
                    reconnect_attempts.store(attempts, Ordering::SeqCst);
                }
            })),
        }
    }

    fn get_or_create_host(&self, base_url: &str) -> SharedHostHandle {
        let mut registry = self.shared_registry.lock().expect("shared host registry lock poisoned");
        registry.entry(base_url.to_string()).or_insert_with(host::spawn).clone()
    }

    /// Tears down the current connection — this tab only, in shared mode
    /// (spec §4.4 `stop`).
    pub fn stop(&self) {
        let mut state = self.state.write().expect("hub state lock poisoned");
        teardown_connection(&mut state);
        self.connected.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
    }

    pub fn send(&self, data: serde_json::Value) {
        let state = self.state.read().expect("hub state lock poisoned");
        match &state.connection {
            Connection::None => warn!("send() called with no active connection"),
            Connection::Direct(s) | Connection::Visibility(s) => {
                let _ = s.send(data);
            }
            Connection::Shared(c) => c.send(data),
        }
    }

    pub fn is_connected(&self) -> bool {
        let state = self.state.read().expect("hub state lock poisoned");
        match &state.connection {
            Connection::None => false,
            Connection::Direct(s) | Connection::Visibility(s) => s.is_open(),
            Connection::Shared(_) => self.connected.load(Ordering::SeqCst),
        }
    }

    pub fn current_mode(&self) -> Option<Mode> {
        self.state.read().expect("hub state lock poisoned").resolved_mode
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.state.read().expect("hub state lock poisoned").identity.as_ref().map(|i| i.user_id.clone())
    }

    pub fn current_credential(&self) -> Option<String> {
        self.state.read().expect("hub state lock poisoned").identity.as_ref().map(|i| i.credential.clone())
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        let state = self.state.read().expect("hub state lock poisoned");
        ConnectionQuality {
            mode: state.resolved_mode,
            connected: self.is_connected(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
        }
    }

    /// Reports a visibility transition on the owning tab — only meaningful
    /// in `Shared` mode, a no-op otherwise (spec §4.3 visibility hook).
    pub fn notify_visibility(&self, is_visible: bool) {
        let state = self.state.read().expect("hub state lock poisoned");
        if let Connection::Shared(client) = &state.connection {
            client.notify_visibility(is_visible);
        }
    }

    pub fn notify_network_online(&self) {
        let state = self.state.read().expect("hub state lock poisoned");
        match &state.connection {
            Connection::Direct(s) | Connection::Visibility(s) => s.notify_network_online(),
            Connection::Shared(c) => c.notify_network_online(),
            Connection::None => {}
        }
    }
}

fn resolve_mode(requested: crate::config::ConnectionMode, probes: &CapabilityProbes, enable_visibility: bool) -> Mode {
    use crate::config::ConnectionMode as CM;
    match requested {
        CM::Auto => {
            if (probes.shared_supported)() {
                Mode::Shared
            } else if enable_visibility && (probes.visibility_supported)() {
                Mode::Visibility
            } else {
                Mode::Direct
            }
        }
        CM::Shared => {
            if (probes.shared_supported)() {
                Mode::Shared
            } else if enable_visibility && (probes.visibility_supported)() {
                warn!("shared mode unsupported — degrading to visibility");
                Mode::Visibility
            } else {
                warn!("shared mode unsupported — degrading to direct");
                Mode::Direct
            }
        }
        CM::Visibility => {
            if (probes.visibility_supported)() {
                Mode::Visibility
            } else {
                warn!("visibility mode unsupported — degrading to direct");
                Mode::Direct
            }
        }
        CM::Direct => Mode::Direct,
    }
}

fn tab_init_config(config: &HubConfig) -> TabInitConfig {
    TabInitConfig {
        heartbeat_interval: config.heartbeat_interval,
        max_reconnect_attempts: config.max_reconnect_attempts,
        reconnect_delay: config.reconnect_delay,
        reconnect_delay_max: config.reconnect_delay_max,
        auto_reconnect: config.auto_reconnect,
        enable_network_listener: config.enable_network_listener,
    }
}

fn stream_options(
    config: &HubConfig,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<std::sync::atomic::AtomicU32>,
    hooks: HubHooks,
) -> StreamClientOptions {
    let connected_close = connected.clone();
    let on_connected = hooks.on_connected.clone();
    let on_disconnected = hooks.on_disconnected.clone();
    StreamClientOptions {
        heartbeat_interval: config.heartbeat_interval,
        max_reconnect_attempts: config.max_reconnect_attempts,
        reconnect_delay: config.reconnect_delay,
        reconnect_delay_max: config.reconnect_delay_max,
        auto_reconnect: config.auto_reconnect,
        heartbeat_message: config.heartbeat_message.clone(),
        enable_network_listener: config.enable_network_listener,
        on_open: Some(Arc::new(move || {
            connected.store(true, Ordering::SeqCst);
            if let Some(hook) = &on_connected {
                hook();
            }
        })),
        on_close: Some(Arc::new(move |_code, _elapsed| {
            connected_close.store(false, Ordering::SeqCst);
            if let Some(hook) = &on_disconnected {
                hook();
            }
        })),
        on_message: None,
        on_reconnect_attempt: Some(Arc::new(move |attempts| {
            reconnect_attempts.store(attempts, Ordering::SeqCst);
        })),
    }
}

fn teardown_connection(state: &mut HubState) {
    match std::mem::replace(&mut state.connection, Connection::None) {
        Connection::None => {}
        Connection::Direct(s) | Connection::Visibility(s) => s.disconnect(),
        Connection::Shared(c) => c.stop(),
    }
    state.live.clear();
}

/// Registers `callback` under `type`, staging it for replay and forwarding
/// to the live connection if one exists. Returns the Hub-minted id.
fn stage_and_forward(state: &mut HubState, r#type: String, callback: Callback) -> String {
    let hub_id = uuid::Uuid::new_v4().to_string();
    state.staged.push(StagedCallback {
        hub_id: hub_id.clone(),
        r#type: r#type.clone(),
        callback: callback.clone(),
    });
    if let Some(underlying_id) = forward_register(&state.connection, &r#type, callback) {
        state.live.entry(r#type).or_default().push((hub_id.clone(), underlying_id));
    }
    hub_id
}

fn forward_register(connection: &Connection, r#type: &str, callback: Callback) -> Option<String> {
    match connection {
        Connection::None => None,
        Connection::Direct(s) | Connection::Visibility(s) => s.on(r#type, callback).ok(),
        Connection::Shared(c) => c.register_callback(r#type, callback).ok(),
    }
}

fn forward_unregister(connection: &Connection, r#type: &str, underlying_id: Option<&str>) {
    match connection {
        Connection::None => {}
        Connection::Direct(s) | Connection::Visibility(s) => s.off(r#type, underlying_id),
        Connection::Shared(c) => c.unregister_callback(r#type, underlying_id),
    }
}

fn unregister_all_live(state: &mut HubState) {
    let types: Vec<String> = state.live.keys().cloned().collect();
    for r#type in types {
        forward_unregister(&state.connection, &r#type, None);
    }
    state.live.clear();
}

/// Re-forwards every staged subscription into a freshly stood-up
/// connection — called once per `start()` (spec §4.4 "replays staged
/// subscriptions").
fn replay_staged(state: &mut HubState) {
    state.live.clear();
    let staged: Vec<(String, String, Callback)> = state
        .staged
        .iter()
        .map(|c| (c.hub_id.clone(), c.r#type.clone(), c.callback.clone()))
        .collect();
    for (hub_id, r#type, callback) in staged {
        if let Some(underlying_id) = forward_register(&state.connection, &r#type, callback) {
            state.live.entry(r#type).or_default().push((hub_id, underlying_id));
        }
    }
}

/// Process-wide default `Hub`, for callers that want the classic
/// module-global singleton form (spec §9).
static DEFAULT_HUB: Lazy<Hub> = Lazy::new(Hub::new);

/// The module-global `Hub` instance (spec §9 "retain the singleton form").
/// Prefer constructing your own `Hub::new()` in tests to stay isolated.
pub fn facade() -> &'static Hub {
    &DEFAULT_HUB
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn configured_hub(url: &str) -> Hub {
        let hub = Hub::new();
        hub.set_config(PartialHubConfig {
            url: Some(url.to_string()),
            ..Default::default()
        });
        hub
    }

    #[tokio::test]
    async fn auto_mode_picks_shared_when_supported() {
        let hub = configured_hub("wss://s/ws");
        hub.start("u1", "tok").unwrap();
        assert_eq!(hub.current_mode(), Some(Mode::Shared));
        assert_eq!(hub.current_user_id(), Some("u1".to_string()));
    }

    #[tokio::test]
    async fn explicit_shared_degrades_to_direct_when_unsupported() {
        let hub = configured_hub("wss://s/ws");
        hub.set_config(PartialHubConfig {
            connection_mode: Some(crate::config::ConnectionMode::Shared),
            ..Default::default()
        });
        hub.set_capability_probes(CapabilityProbes {
            shared_supported: Arc::new(|| false),
            visibility_supported: Arc::new(|| false),
        });
        hub.start("u1", "tok").unwrap();
        assert_eq!(hub.current_mode(), Some(Mode::Direct));
    }

    #[tokio::test]
    async fn auto_mode_picks_visibility_when_shared_unsupported_and_enabled() {
        let hub = configured_hub("wss://s/ws");
        hub.set_config(PartialHubConfig {
            enable_visibility_management: Some(true),
            ..Default::default()
        });
        hub.set_capability_probes(CapabilityProbes {
            shared_supported: Arc::new(|| false),
            visibility_supported: Arc::new(|| true),
        });
        hub.start("u1", "tok").unwrap();
        assert_eq!(hub.current_mode(), Some(Mode::Visibility));
    }

    #[tokio::test]
    async fn start_without_url_is_config_missing() {
        let hub = Hub::new();
        let result = hub.start("u1", "tok");
        assert!(matches!(result, Err(StreamHubError::ConfigMissing(_))));
    }

    #[tokio::test]
    async fn start_without_user_id_is_config_missing() {
        let hub = configured_hub("wss://s/ws");
        let result = hub.start("", "tok");
        assert!(matches!(result, Err(StreamHubError::ConfigMissing(_))));
    }

    #[tokio::test]
    async fn double_start_with_same_identity_is_a_no_op() {
        let hub = configured_hub("wss://s/ws");
        hub.start("u1", "tok").unwrap();
        let mode_after_first = hub.current_mode();
        hub.start("u1", "tok").unwrap();
        assert_eq!(hub.current_mode(), mode_after_first);
    }

    #[tokio::test]
    async fn start_with_different_identity_tears_down_and_restarts() {
        let hub = configured_hub("wss://s/ws");
        hub.start("u1", "tok").unwrap();
        hub.start("u2", "tok2").unwrap();
        assert_eq!(hub.current_user_id(), Some("u2".to_string()));
    }

    #[tokio::test]
    async fn staged_callback_replays_after_start() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let hub = configured_hub("wss://s/ws");
        hub.register_callback("UNREAD", Arc::new(move |_, _| { hits2.fetch_add(1, Ordering::SeqCst); })).unwrap();
        hub.start("u1", "tok").unwrap();
        // The staged subscription is now forwarded to the live shared
        // connection; dispatch itself is exercised end to end in
        // `shared::host` tests.
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_connected_before_start() {
        let hub = configured_hub("wss://s/ws");
        assert!(!hub.is_connected());
        assert_eq!(hub.current_mode(), None);
    }

    #[tokio::test]
    async fn register_callback_rejects_empty_type() {
        let hub = configured_hub("wss://s/ws");
        let result = hub.register_callback("", Arc::new(|_, _| {}));
        assert!(matches!(result, Err(StreamHubError::InvalidSubscription(_))));
    }

    #[tokio::test]
    async fn stop_clears_connection_state() {
        let hub = configured_hub("wss://s/ws");
        hub.start("u1", "tok").unwrap();
        hub.stop();
        assert!(!hub.is_connected());
    }

    #[tokio::test]
    async fn connection_quality_reconnect_attempts_starts_and_resets_at_zero() {
        let hub = configured_hub("wss://s/ws");
        assert_eq!(hub.connection_quality().reconnect_attempts, 0);
        hub.start("u1", "tok").unwrap();
        hub.reconnect_attempts.store(7, Ordering::SeqCst);
        assert_eq!(hub.connection_quality().reconnect_attempts, 7);
        hub.stop();
        assert_eq!(hub.connection_quality().reconnect_attempts, 0);
    }
}
