//! `SharedHost` — the single task that owns the upstream stream on behalf of
//! every attached tab (spec §4.2).
//!
//! Shaped after the teacher's `ipc::event::EventBroadcaster` for the
//! "fan a typed event out to many listening contexts" shape, but dispatch
//! here goes over a per-tab `mpsc::UnboundedSender` rather than a
//! `tokio::sync::broadcast` channel: delivery must be filtered by each tab's
//! `subscribedTypes`, and a `broadcast` receiver that lags and drops a frame
//! would silently violate "exactly those tabs... receive exactly one
//! WORKER_MESSAGE" (spec §8). One `tokio::spawn`ed task drives everything
//! through a single `tokio::select!` loop, so `HostState` needs no lock —
//! only this task ever touches it (spec §5).

use crate::circuit_breaker::FastCloseBreaker;
use crate::envelope::Envelope;
use crate::identity::SessionIdentity;
use crate::shared::protocol::{HostEvent, HostMessage, TabId, TabInitConfig};
use crate::stream_client::{StreamClient, StreamClientOptions};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// spec §3 `TabRecord`.
struct TabRecord {
    port: mpsc::UnboundedSender<HostEvent>,
    is_visible: bool,
    last_seen: Instant,
    subscribed_types: HashSet<String>,
    /// `callback_id → type`, kept so `UnregisterCallback{callback_id: None}`
    /// can still find every callback id under the removed type.
    callback_index: HashMap<String, String>,
}

impl TabRecord {
    fn register_callback(&mut self, r#type: &str, callback_id: String) {
        self.subscribed_types.insert(r#type.to_string());
        self.callback_index.insert(callback_id, r#type.to_string());
    }

    fn unregister_callback(&mut self, r#type: &str, callback_id: Option<&str>) {
        match callback_id {
            Some(id) => {
                self.callback_index.remove(id);
            }
            None => {
                self.callback_index.retain(|_, t| t != r#type);
            }
        }
        let still_has_callbacks_for_type = self.callback_index.values().any(|t| t == r#type);
        if !still_has_callbacks_for_type {
            self.subscribed_types.remove(r#type);
        }
    }
}

/// Events the upstream `StreamClient`'s lifecycle hooks feed back into the
/// host's own select loop — the host cannot touch `HostState` from the
/// `StreamClient` driver task, so the hooks just forward facts in.
enum UpstreamEvent {
    Opened,
    Closed { code: Option<u16>, elapsed: Duration },
    Message(Envelope),
}

const STALE_SWEEP_INTERVAL: Duration = Duration::from_millis(15_000);
const STALE_THRESHOLD: Duration = Duration::from_millis(45_000);

/// Owns every attached tab plus the upstream connection for one identity.
/// Lives exactly as long as spec §3's lifecycle rule: at least one tab
/// attached, or the idle deadline not yet elapsed with all tabs hidden.
struct HostState {
    identity: Option<SessionIdentity>,
    stream_config: TabInitConfig,
    idle_timeout: Duration,
    tabs: HashMap<TabId, TabRecord>,
    last_message_by_type: HashMap<String, Envelope>,
    upstream: Option<StreamClient>,
    idle_deadline: Option<Instant>,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    breaker: FastCloseBreaker,
    opened_at: Option<Instant>,
    upstream_events: mpsc::UnboundedSender<UpstreamEvent>,
}

/// A handle to a running `SharedHost` task — this is what every
/// `SharedClient` holds as its "message port" to the host.
#[derive(Clone)]
pub struct SharedHostHandle {
    inbound: mpsc::UnboundedSender<HostMessage>,
}

impl SharedHostHandle {
    pub fn send(&self, message: HostMessage) {
        let _ = self.inbound.send(message);
    }
}

/// Spawns a fresh host task and returns a handle to it. One handle is shared
/// (cloned) across every tab of the same identity-class; the process-wide
/// registry that enforces "one host per identity" lives in [`crate::facade`].
pub fn spawn() -> SharedHostHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();
    let state = HostState {
        identity: None,
        stream_config: TabInitConfig::default(),
        idle_timeout: Duration::from_millis(30_000),
        tabs: HashMap::new(),
        last_message_by_type: HashMap::new(),
        upstream: None,
        idle_deadline: None,
        reconnect_attempts: 0,
        reconnect_at: None,
        breaker: FastCloseBreaker::new(Default::default()),
        opened_at: None,
        upstream_events: upstream_tx,
    };
    tokio::spawn(run(state, rx, upstream_rx));
    SharedHostHandle { inbound: tx }
}

async fn run(
    mut state: HostState,
    mut inbound: mpsc::UnboundedReceiver<HostMessage>,
    mut upstream_events: mpsc::UnboundedReceiver<UpstreamEvent>,
) {
    let mut stale_sweep = tokio::time::interval(STALE_SWEEP_INTERVAL);
    stale_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let idle_wait = async {
            match state.idle_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => futures_util::future::pending().await,
            }
        };
        let reconnect_wait = async {
            match state.reconnect_at {
                Some(at) => tokio::time::sleep_until(at.into()).await,
                None => futures_util::future::pending().await,
            }
        };

        tokio::select! {
            msg = inbound.recv() => {
                match msg {
                    Some(msg) => {
                        if handle_tab_message(&mut state, msg) {
                            debug!("TAB_FORCE_SHUTDOWN — terminating shared host");
                            return;
                        }
                    }
                    None => {
                        debug!("all tab handles dropped — shutting host down");
                        return;
                    }
                }
            }
            evt = upstream_events.recv() => {
                if let Some(evt) = evt {
                    handle_upstream_event(&mut state, evt);
                }
            }
            _ = idle_wait => {
                debug!("idle deadline elapsed — closing upstream");
                if let Some(upstream) = &state.upstream {
                    upstream.disconnect();
                }
                state.idle_deadline = None;
            }
            _ = reconnect_wait => {
                state.reconnect_at = None;
                attempt_reconnect(&mut state);
            }
            _ = stale_sweep.tick() => {
                reap_stale_tabs(&mut state);
            }
        }

        if state.tabs.is_empty() && state.idle_deadline.is_none() {
            arm_idle_timer(&mut state);
        }
    }
}

/// Returns `true` when this message means the host task itself should exit
/// (`TAB_FORCE_SHUTDOWN`).
fn handle_tab_message(state: &mut HostState, msg: HostMessage) -> bool {
    match msg {
        HostMessage::Init { tab_id, identity, is_visible, config, idle_timeout, port } => {
            on_tab_init(state, tab_id, identity, is_visible, config, idle_timeout, port);
        }
        HostMessage::Disconnect { tab_id } => {
            state.tabs.remove(&tab_id);
            if !any_tab_visible(state) {
                arm_idle_timer(state);
            }
        }
        HostMessage::Send { tab_id, data } => {
            touch(state, &tab_id);
            match &state.upstream {
                Some(upstream) if upstream.is_open() => {
                    let _ = upstream.send(data);
                }
                _ => warn!(tab_id = %tab_id, "TAB_SEND dropped — upstream not open"),
            }
        }
        HostMessage::Visibility { tab_id, is_visible } => {
            touch(state, &tab_id);
            if let Some(tab) = state.tabs.get_mut(&tab_id) {
                tab.is_visible = is_visible;
            }
            if is_visible {
                state.idle_deadline = None;
                ensure_upstream(state);
            } else if !any_tab_visible(state) {
                arm_idle_timer(state);
            }
        }
        HostMessage::RegisterCallback { tab_id, r#type, callback_id } => {
            touch(state, &tab_id);
            let cached = state.last_message_by_type.get(&r#type).cloned();
            if let Some(tab) = state.tabs.get_mut(&tab_id) {
                tab.register_callback(&r#type, callback_id);
                if let Some(envelope) = cached {
                    let _ = tab.port.send(HostEvent::Message(envelope));
                }
            }
        }
        HostMessage::UnregisterCallback { tab_id, r#type, callback_id } => {
            touch(state, &tab_id);
            if let Some(tab) = state.tabs.get_mut(&tab_id) {
                tab.unregister_callback(&r#type, callback_id.as_deref());
            }
        }
        HostMessage::Ping { tab_id } => {
            if let Some(tab) = state.tabs.get_mut(&tab_id) {
                tab.last_seen = Instant::now();
                let _ = tab.port.send(HostEvent::Pong);
            } else {
                notify_tab_not_found(state, &tab_id);
            }
        }
        HostMessage::ForceReset { tab_id: _, reason } => {
            force_reset(state, reason);
        }
        HostMessage::ForceShutdown { tab_id: _, reason } => {
            force_reset(state, reason);
            state.tabs.clear();
            return true;
        }
        HostMessage::NetworkOnline { tab_id } => {
            touch(state, &tab_id);
            if state.reconnect_attempts != 0 {
                state.reconnect_attempts = 0;
                broadcast(state, HostEvent::ReconnectAttempt(0));
            }
            state.reconnect_at = None;
            if any_tab_visible(state) {
                ensure_upstream(state);
            }
        }
    }
    false
}

fn touch(state: &mut HostState, tab_id: &TabId) {
    if let Some(tab) = state.tabs.get_mut(tab_id) {
        tab.last_seen = Instant::now();
    }
}

/// Sends `event` to every attached tab's port.
fn broadcast(state: &HostState, event: HostEvent) {
    for tab in state.tabs.values() {
        let _ = tab.port.send(event.clone());
    }
}

fn any_tab_visible(state: &HostState) -> bool {
    state.tabs.values().any(|t| t.is_visible)
}

#[allow(clippy::too_many_arguments)]
fn on_tab_init(
    state: &mut HostState,
    tab_id: TabId,
    identity: SessionIdentity,
    is_visible: bool,
    config: TabInitConfig,
    idle_timeout: Duration,
    port: mpsc::UnboundedSender<HostEvent>,
) {
    let _ = port.send(HostEvent::Ready);

    let identity_changed = state.identity.as_ref().is_some_and(|current| *current != identity);
    if identity_changed {
        let current_user_id = state.identity.as_ref().expect("checked above").user_id.clone();
        let new_user_id = identity.user_id.clone();
        let explanation = format!("identity changed from {current_user_id} to {new_user_id}");
        broadcast(state, HostEvent::AuthConflict { current_user_id, new_user_id, explanation });
        teardown_upstream(state);
        state.last_message_by_type.clear();
        state.breaker.reset();
        state.reconnect_attempts = 0;
        broadcast(state, HostEvent::ReconnectAttempt(0));
    }
    if state.identity.is_none() || identity_changed {
        state.identity = Some(identity);
        state.stream_config = config;
        state.idle_timeout = idle_timeout;
    }

    state.tabs.insert(tab_id, TabRecord {
        port,
        is_visible,
        last_seen: Instant::now(),
        subscribed_types: HashSet::new(),
        callback_index: HashMap::new(),
    });
    if is_visible {
        state.idle_deadline = None;
        ensure_upstream(state);
    } else if !any_tab_visible(state) {
        arm_idle_timer(state);
    }
}

fn force_reset(state: &mut HostState, reason: Option<String>) {
    info!(?reason, "force reset — dropping upstream and identity");
    teardown_upstream(state);
    state.identity = None;
    state.last_message_by_type.clear();
    state.breaker.reset();
    state.reconnect_attempts = 0;
    state.reconnect_at = None;
    broadcast(state, HostEvent::Disconnected);
    broadcast(state, HostEvent::ReconnectAttempt(0));
}

fn teardown_upstream(state: &mut HostState) {
    if let Some(upstream) = state.upstream.take() {
        upstream.disconnect();
    }
    state.opened_at = None;
}

/// Builds (if absent) and connects the upstream `StreamClient`, but only if
/// the reconnect gate is open: identity known, ≥1 visible tab, not
/// circuit-suspended (spec §4.2 "Reconnect gating").
fn ensure_upstream(state: &mut HostState) {
    let Some(identity) = state.identity.clone() else { return };
    if !any_tab_visible(state) || state.breaker.is_suspended() {
        return;
    }
    if state.upstream.is_none() {
        state.upstream = Some(build_upstream(state));
    }
    if let Some(upstream) = &state.upstream {
        upstream.connect(Some(identity.stream_url()));
    }
}

fn build_upstream(state: &HostState) -> StreamClient {
    let events = state.upstream_events.clone();
    let events_close = events.clone();
    let events_message = events.clone();
    let cfg = &state.stream_config;
    StreamClient::new(StreamClientOptions {
        heartbeat_interval: cfg.heartbeat_interval,
        max_reconnect_attempts: cfg.max_reconnect_attempts,
        reconnect_delay: cfg.reconnect_delay,
        reconnect_delay_max: cfg.reconnect_delay_max,
        // The host drives its own gated backoff (spec §3 HostState.reconnect);
        // the StreamClient only needs to make single connection attempts.
        auto_reconnect: false,
        enable_network_listener: cfg.enable_network_listener,
        on_open: Some(std::sync::Arc::new(move || {
            let _ = events.send(UpstreamEvent::Opened);
        })),
        on_close: Some(std::sync::Arc::new(move |code, elapsed| {
            let _ = events_close.send(UpstreamEvent::Closed { code, elapsed });
        })),
        on_message: Some(std::sync::Arc::new(move |envelope: &Envelope| {
            let _ = events_message.send(UpstreamEvent::Message(envelope.clone()));
        })),
        ..Default::default()
    })
}

fn handle_upstream_event(state: &mut HostState, event: UpstreamEvent) {
    match event {
        UpstreamEvent::Opened => {
            state.opened_at = Some(Instant::now());
            if state.reconnect_attempts != 0 {
                state.reconnect_attempts = 0;
                broadcast(state, HostEvent::ReconnectAttempt(0));
            }
            broadcast(state, HostEvent::Connected);
        }
        UpstreamEvent::Closed { code, elapsed } => {
            broadcast(state, HostEvent::Disconnected);
            let opened_at = state.opened_at.take().unwrap_or_else(|| Instant::now() - elapsed);
            if state.breaker.record_close(opened_at, code) {
                warn!("fast-close circuit tripped — suspending reconnects for 60s");
                broadcast(state, HostEvent::Error {
                    message: "server is closing the connection cleanly and quickly".to_string(),
                    detail: Some("probable token or policy rejection".to_string()),
                });
                // Re-arm the reconnect wait at the suspension deadline so a
                // continuously-visible tab resumes on its own once the
                // breaker clears, rather than waiting for an external
                // visibility/network-online nudge — `ensure_upstream` still
                // gates on `breaker.is_suspended()` at fire time.
                state.reconnect_at = state.breaker.suspended_until();
                return;
            }
            schedule_reconnect(state);
        }
        UpstreamEvent::Message(envelope) => {
            state.last_message_by_type.insert(envelope.r#type.clone(), envelope.clone());
            for tab in state.tabs.values() {
                if tab.subscribed_types.contains(&envelope.r#type) {
                    let _ = tab.port.send(HostEvent::Message(envelope.clone()));
                }
            }
        }
    }
}

fn schedule_reconnect(state: &mut HostState) {
    if state.tabs.is_empty() || !any_tab_visible(state) || state.breaker.is_suspended() {
        return;
    }
    state.reconnect_attempts += 1;
    broadcast(state, HostEvent::ReconnectAttempt(state.reconnect_attempts));
    if state.reconnect_attempts > state.stream_config.max_reconnect_attempts {
        warn!(attempts = state.reconnect_attempts, "reconnect attempts exhausted");
        state.reconnect_at = None;
        return;
    }
    let delay = (state.stream_config.reconnect_delay * state.reconnect_attempts)
        .min(state.stream_config.reconnect_delay_max);
    state.reconnect_at = Some(Instant::now() + delay);
}

fn attempt_reconnect(state: &mut HostState) {
    ensure_upstream(state);
}

fn arm_idle_timer(state: &mut HostState) {
    if state.upstream.is_some() && state.idle_deadline.is_none() {
        state.idle_deadline = Some(Instant::now() + state.idle_timeout);
    }
}

fn reap_stale_tabs(state: &mut HostState) {
    let now = Instant::now();
    let stale: Vec<TabId> = state
        .tabs
        .iter()
        .filter(|(_, tab)| now.duration_since(tab.last_seen) > STALE_THRESHOLD)
        .map(|(id, _)| id.clone())
        .collect();
    for id in stale {
        debug!(tab_id = %id, "reaping stale tab");
        state.tabs.remove(&id);
    }
    if !any_tab_visible(state) {
        arm_idle_timer(state);
    }
}

fn notify_tab_not_found(state: &HostState, tab_id: &TabId) {
    // The tab has no record here, so there is no port to deliver
    // `WORKER_TAB_NOT_FOUND` on directly. `SharedClient`'s own liveness
    // heartbeat (spec §4.3) detects the same condition from its side — a
    // `TAB_PING` that goes unanswered by `WORKER_PONG` for two intervals —
    // and reinitializes proactively, so the wire message this logs is
    // informational rather than the client's only signal.
    let _ = state;
    warn!(tab_id = %tab_id, "TAB_PING from unknown tab — host cannot reply, relying on client-side pong staleness detection");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ident(user: &str) -> SessionIdentity {
        SessionIdentity::new("wss://s/ws", user, "tok")
    }

    #[tokio::test]
    async fn init_then_register_callback_replays_cache() {
        let handle = spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.send(HostMessage::Init {
            tab_id: "t1".into(),
            identity: ident("u1"),
            is_visible: false,
            config: TabInitConfig::default(),
            idle_timeout: Duration::from_millis(30_000),
            port: tx,
        });
        assert!(matches!(rx.recv().await, Some(HostEvent::Ready)));
    }

    #[test]
    fn tab_record_tracks_subscribed_types_as_union_of_callback_index() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut tab = TabRecord {
            port: tx,
            is_visible: true,
            last_seen: Instant::now(),
            subscribed_types: HashSet::new(),
            callback_index: HashMap::new(),
        };
        tab.register_callback("UNREAD", "cb1".to_string());
        tab.register_callback("UNREAD", "cb2".to_string());
        assert_eq!(tab.subscribed_types.len(), 1);
        tab.unregister_callback("UNREAD", Some("cb1"));
        assert!(tab.subscribed_types.contains("UNREAD"));
        tab.unregister_callback("UNREAD", Some("cb2"));
        assert!(!tab.subscribed_types.contains("UNREAD"));
    }

    fn bare_state() -> HostState {
        let (upstream_tx, _upstream_rx) = mpsc::unbounded_channel();
        HostState {
            identity: None,
            stream_config: TabInitConfig::default(),
            idle_timeout: Duration::from_millis(30_000),
            tabs: HashMap::new(),
            last_message_by_type: HashMap::new(),
            upstream: None,
            idle_deadline: None,
            reconnect_attempts: 0,
            reconnect_at: None,
            breaker: FastCloseBreaker::new(Default::default()),
            opened_at: None,
            upstream_events: upstream_tx,
        }
    }

    fn tab(is_visible: bool, last_seen: Instant) -> TabRecord {
        let (tx, _rx) = mpsc::unbounded_channel();
        TabRecord {
            port: tx,
            is_visible,
            last_seen,
            subscribed_types: HashSet::new(),
            callback_index: HashMap::new(),
        }
    }

    #[test]
    fn arm_idle_timer_is_a_no_op_without_an_upstream() {
        let mut state = bare_state();
        state.tabs.insert("t1".into(), tab(false, Instant::now()));
        arm_idle_timer(&mut state);
        assert!(state.idle_deadline.is_none());
    }

    #[tokio::test]
    async fn arm_idle_timer_sets_a_deadline_once_upstream_exists() {
        let mut state = bare_state();
        state.upstream = Some(crate::stream_client::StreamClient::new(Default::default()));
        state.tabs.insert("t1".into(), tab(false, Instant::now()));
        arm_idle_timer(&mut state);
        assert!(state.idle_deadline.is_some());
        assert!(state.idle_deadline.unwrap() >= Instant::now());
    }

    #[tokio::test]
    async fn visible_tab_transition_cancels_the_idle_deadline() {
        let mut state = bare_state();
        state.upstream = Some(crate::stream_client::StreamClient::new(Default::default()));
        state.idle_deadline = Some(Instant::now() + Duration::from_millis(30_000));
        state.tabs.insert("t1".into(), tab(true, Instant::now()));
        handle_tab_message(&mut state, HostMessage::Visibility { tab_id: "t1".into(), is_visible: true });
        assert!(state.idle_deadline.is_none());
    }

    #[test]
    fn stale_sweep_reaps_only_tabs_past_the_threshold() {
        let mut state = bare_state();
        state.tabs.insert("fresh".into(), tab(true, Instant::now()));
        state.tabs.insert("stale".into(), tab(false, Instant::now() - STALE_THRESHOLD - Duration::from_millis(1)));
        reap_stale_tabs(&mut state);
        assert!(state.tabs.contains_key("fresh"));
        assert!(!state.tabs.contains_key("stale"));
    }

    #[tokio::test]
    async fn stale_sweep_arms_idle_timer_once_the_last_visible_tab_is_reaped() {
        let mut state = bare_state();
        state.upstream = Some(crate::stream_client::StreamClient::new(Default::default()));
        state.tabs.insert("stale".into(), tab(true, Instant::now() - STALE_THRESHOLD - Duration::from_millis(1)));
        reap_stale_tabs(&mut state);
        assert!(state.tabs.is_empty());
        assert!(state.idle_deadline.is_some());
    }

    #[test]
    fn schedule_reconnect_resets_after_a_healthy_open() {
        let mut state = bare_state();
        state.tabs.insert("t1".into(), tab(true, Instant::now()));
        state.reconnect_attempts = 4;
        handle_upstream_event(&mut state, UpstreamEvent::Opened);
        assert_eq!(state.reconnect_attempts, 0);
    }

    #[test]
    fn fast_close_trip_rearms_reconnect_at_the_suspension_deadline() {
        let mut state = bare_state();
        state.tabs.insert("t1".into(), tab(true, Instant::now()));
        let opened = Instant::now();
        for _ in 0..3 {
            handle_upstream_event(&mut state, UpstreamEvent::Closed { code: Some(1000), elapsed: opened.elapsed() });
        }
        assert!(state.breaker.is_suspended());
        assert!(state.reconnect_at.is_some(), "a still-visible tab must get a wake-up scheduled at the suspension deadline");
        assert_eq!(state.reconnect_at, state.breaker.suspended_until());
    }

    #[test]
    fn non_fast_close_falls_through_to_ordinary_schedule_reconnect() {
        let mut state = bare_state();
        state.tabs.insert("t1".into(), tab(true, Instant::now()));
        let opened = Instant::now() - Duration::from_secs(10);
        handle_upstream_event(&mut state, UpstreamEvent::Closed { code: Some(1000), elapsed: opened.elapsed() });
        assert!(!state.breaker.is_suspended());
        assert_eq!(state.reconnect_attempts, 1);
        assert!(state.reconnect_at.is_some());
    }
}
