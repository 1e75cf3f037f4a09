//! `SharedClient` — the per-tab proxy that attaches to a [`SharedHostHandle`]
//! and mirrors local subscription state to it (spec §4.3).
//!
//! The in-process analogue of the teacher's `cli::client::DaemonClient`
//! (`cli/client.rs`): same "connect, then drive a background task that reads
//! events and dispatches to callers" shape, generalized here from "one RPC
//! call then drop" to "persistent subscription session" since a tab stays
//! attached for as long as it runs.

use crate::config::Callback;
use crate::envelope::Envelope;
use crate::error::StreamHubError;
use crate::identity::SessionIdentity;
use crate::shared::host::SharedHostHandle;
use crate::shared::protocol::{HostEvent, HostMessage, TabInitConfig};
use crate::stream_client::invoke_callback_safely;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

type Subscriptions = HashMap<String, Vec<(String, Callback)>>;

/// Lifecycle hooks an owner sets before `start()` (spec §4.3).
#[derive(Clone, Default)]
pub struct SharedClientHooks {
    /// Fires on `WORKER_READY` — the host's acknowledgment that `TAB_INIT`
    /// was received and this tab is attached. Not part of spec §4.3's
    /// public hook list, but the facade layer uses it to detect a
    /// `HostUnavailable` condition (no ready within a bounded time).
    pub on_ready: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_connected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_disconnected: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&str, Option<&str>) + Send + Sync>>,
    pub on_auth_conflict: Option<Arc<dyn Fn(&str, &str, &str) + Send + Sync>>,
    /// Fires on every `WORKER_RECONNECT_ATTEMPT`, mirroring the host's live
    /// reconnect-attempt count (reset to 0 on reconnect).
    pub on_reconnect_attempt: Option<Arc<dyn Fn(u32) + Send + Sync>>,
}

struct Inner {
    tab_id: String,
    host: SharedHostHandle,
    /// Kept so a reinit (visibility-regain, or a missed-pong reinit) can
    /// resend `TAB_INIT` on the exact same channel the event loop is
    /// already reading from, rather than standing up a fresh port the
    /// running `event_loop` task would never see.
    port: mpsc::UnboundedSender<HostEvent>,
    subscriptions: StdMutex<Subscriptions>,
    started: AtomicBool,
    is_visible: AtomicBool,
    /// Mirrors the last `WORKER_CONNECTED`/`WORKER_DISCONNECTED` seen —
    /// used by the visibility hook to detect "previously recorded as
    /// disconnected" (spec §4.3).
    connected: AtomicBool,
    identity: SessionIdentity,
    config: TabInitConfig,
    idle_timeout: Duration,
    /// Updated every time a `WORKER_PONG` arrives; the heartbeat loop uses
    /// staleness here as its signal that the host may have reaped this tab
    /// (spec §4.3 "Liveness heartbeat").
    last_pong: StdMutex<Instant>,
}

const PING_INTERVAL: Duration = Duration::from_millis(10_000);
/// More than two missed heartbeats without a pong is treated as "this tab
/// may have been reaped by the host's stale-tab sweep" — reinitializing is
/// cheap and idempotent on the host side, so a false positive just costs one
/// extra `TAB_INIT`.
const PONG_STALE_THRESHOLD: Duration = Duration::from_millis(PING_INTERVAL.as_millis() as u64 * 2);

/// One tab's handle onto a shared host. Cheaply cloneable; clones share
/// subscription state and the channel to the host.
#[derive(Clone)]
pub struct SharedClient {
    inner: Arc<Inner>,
}

impl SharedClient {
    /// Attaches to `host`, sending `TAB_INIT`. The host's replies are driven
    /// by a background task for the lifetime of this handle (spec §4.3
    /// "open a port; send TAB_INIT"), alongside a liveness-heartbeat task
    /// that sends `TAB_PING` every 10s.
    pub fn start(
        host: SharedHostHandle,
        identity: SessionIdentity,
        is_visible: bool,
        config: TabInitConfig,
        idle_timeout: Duration,
        hooks: SharedClientHooks,
    ) -> Self {
        let tab_id = Uuid::new_v4().to_string();
        let (port_tx, port_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            tab_id: tab_id.clone(),
            host: host.clone(),
            port: port_tx.clone(),
            subscriptions: StdMutex::new(HashMap::new()),
            started: AtomicBool::new(true),
            is_visible: AtomicBool::new(is_visible),
            connected: AtomicBool::new(false),
            identity: identity.clone(),
            config: config.clone(),
            idle_timeout,
            last_pong: StdMutex::new(Instant::now()),
        });

        host.send(HostMessage::Init {
            tab_id: tab_id.clone(),
            identity,
            is_visible,
            config,
            idle_timeout,
            port: port_tx,
        });

        let client = Self { inner: inner.clone() };
        tokio::spawn(event_loop(inner.clone(), port_rx, hooks));
        tokio::spawn(heartbeat_loop(inner));
        client
    }

    /// Sends `TAB_DISCONNECT` and marks this handle stopped. Idempotent —
    /// the spec's "page teardown" hook (hide-terminal / beforeunload) is
    /// just this call made best-effort by the owning `Hub` on its own
    /// teardown path, since there is no page-lifecycle event in this
    /// runtime.
    pub fn stop(&self) {
        if self.inner.started.swap(false, Ordering::SeqCst) {
            self.inner.host.send(HostMessage::Disconnect { tab_id: self.inner.tab_id.clone() });
        }
    }

    /// Sends `TAB_FORCE_SHUTDOWN`, then stops locally.
    pub fn force_shutdown(&self, reason: Option<String>) {
        self.inner.host.send(HostMessage::ForceShutdown { tab_id: self.inner.tab_id.clone(), reason });
        self.stop();
    }

    pub fn send(&self, data: Value) {
        self.inner.host.send(HostMessage::Send { tab_id: self.inner.tab_id.clone(), data });
    }

    /// Notifies the host of a visibility transition. If this tab was
    /// recorded as disconnected and is now becoming visible, first resends
    /// `TAB_INIT` plus every locally-known subscription — covers the case
    /// where the host reaped this tab while it was hidden (spec §4.3).
    pub fn notify_visibility(&self, is_visible: bool) {
        self.inner.is_visible.store(is_visible, Ordering::SeqCst);
        if is_visible && !self.inner.connected.load(Ordering::SeqCst) {
            resend_init(&self.inner);
        }
        self.inner.host.send(HostMessage::Visibility { tab_id: self.inner.tab_id.clone(), is_visible });
    }

    pub fn notify_network_online(&self) {
        self.inner.host.send(HostMessage::NetworkOnline { tab_id: self.inner.tab_id.clone() });
    }

    /// Registers a callback locally and forwards `TAB_REGISTER_CALLBACK`.
    pub fn register_callback(&self, r#type: impl Into<String>, callback: Callback) -> Result<String, StreamHubError> {
        let r#type = r#type.into();
        if r#type.is_empty() {
            return Err(StreamHubError::InvalidSubscription("type is empty".to_string()));
        }
        let callback_id = Uuid::new_v4().to_string();
        {
            let mut subs = self.inner.subscriptions.lock().expect("subscriptions lock poisoned");
            subs.entry(r#type.clone()).or_default().push((callback_id.clone(), callback));
        }
        self.inner.host.send(HostMessage::RegisterCallback {
            tab_id: self.inner.tab_id.clone(),
            r#type,
            callback_id: callback_id.clone(),
        });
        Ok(callback_id)
    }

    pub fn unregister_callback(&self, r#type: &str, callback_id: Option<&str>) {
        {
            let mut subs = self.inner.subscriptions.lock().expect("subscriptions lock poisoned");
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
        self.inner.host.send(HostMessage::UnregisterCallback {
            tab_id: self.inner.tab_id.clone(),
            r#type: r#type.to_string(),
            callback_id: callback_id.map(str::to_string),
        });
    }
}

/// Reconstruction after a host-side reap (spec §4.3 `WORKER_TAB_NOT_FOUND`
/// handling, and the visibility-regain case). Resends `TAB_INIT` on the
/// same port the running `event_loop` task already reads from, then
/// re-registers every locally-known subscription under the same tab id.
fn resend_init(inner: &Inner) {
    inner.host.send(HostMessage::Init {
        tab_id: inner.tab_id.clone(),
        identity: inner.identity.clone(),
        is_visible: inner.is_visible.load(Ordering::SeqCst),
        config: inner.config.clone(),
        idle_timeout: inner.idle_timeout,
        port: inner.port.clone(),
    });
    let subs = inner.subscriptions.lock().expect("subscriptions lock poisoned");
    for (r#type, entries) in subs.iter() {
        for (callback_id, _) in entries {
            inner.host.send(HostMessage::RegisterCallback {
                tab_id: inner.tab_id.clone(),
                r#type: r#type.clone(),
                callback_id: callback_id.clone(),
            });
        }
    }
}

/// Sends `TAB_PING` every 10s (spec §4.3 "Liveness heartbeat"). If two
/// ping intervals pass with no `WORKER_PONG` in reply, this tab may have
/// been reaped by the host's stale sweep, so it reinitializes proactively.
async fn heartbeat_loop(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(PING_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !inner.started.load(Ordering::SeqCst) {
            return;
        }
        inner.host.send(HostMessage::Ping { tab_id: inner.tab_id.clone() });
        let stale = {
            let last_pong = inner.last_pong.lock().expect("last_pong lock poisoned");
            last_pong.elapsed() > PONG_STALE_THRESHOLD
        };
        if stale {
            warn!(tab_id = %inner.tab_id, "no WORKER_PONG within threshold — reinitializing in case the host reaped this tab");
            resend_init(&inner);
        }
    }
}

async fn event_loop(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<HostEvent>, hooks: SharedClientHooks) {
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::Ready => {
                if let Some(hook) = &hooks.on_ready {
                    hook();
                }
            }
            HostEvent::Connected => {
                inner.connected.store(true, Ordering::SeqCst);
                if let Some(hook) = &hooks.on_connected {
                    hook();
                }
            }
            HostEvent::Disconnected => {
                inner.connected.store(false, Ordering::SeqCst);
                if let Some(hook) = &hooks.on_disconnected {
                    hook();
                }
            }
            HostEvent::Message(envelope) => dispatch(&inner, &envelope),
            HostEvent::Error { message, detail } => {
                if let Some(hook) = &hooks.on_error {
                    hook(&message, detail.as_deref());
                }
            }
            HostEvent::AuthConflict { current_user_id, new_user_id, explanation } => {
                if let Some(hook) = &hooks.on_auth_conflict {
                    hook(&current_user_id, &new_user_id, &explanation);
                }
            }
            HostEvent::Pong => {
                *inner.last_pong.lock().expect("last_pong lock poisoned") = Instant::now();
            }
            HostEvent::TabNotFound => {
                warn!(tab_id = %inner.tab_id, "host does not recognize this tab — reinitializing");
                resend_init(&inner);
                if let Some(hook) = &hooks.on_error {
                    hook("tab not found on host", Some("reinitialize required"));
                }
            }
            HostEvent::ReconnectAttempt(attempts) => {
                if let Some(hook) = &hooks.on_reconnect_attempt {
                    hook(attempts);
                }
            }
        }
    }
}

fn dispatch(inner: &Inner, envelope: &Envelope) {
    let callbacks: Vec<Callback> = {
        let subs = inner.subscriptions.lock().expect("subscriptions lock poisoned");
        match subs.get(&envelope.r#type) {
            Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        }
    };
    for callback in callbacks {
        invoke_callback_safely(&callback, &envelope.data, envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::host;

    #[tokio::test]
    async fn register_callback_rejects_empty_type() {
        let host_handle = host::spawn();
        let client = SharedClient::start(
            host_handle,
            SessionIdentity::new("wss://s/ws", "u1", "tok"),
            true,
            TabInitConfig::default(),
            Duration::from_millis(30_000),
            SharedClientHooks::default(),
        );
        let result = client.register_callback("", Arc::new(|_, _| {}));
        assert!(matches!(result, Err(StreamHubError::InvalidSubscription(_))));
    }

    #[tokio::test]
    async fn register_then_unregister_clears_local_state() {
        let host_handle = host::spawn();
        let client = SharedClient::start(
            host_handle,
            SessionIdentity::new("wss://s/ws", "u1", "tok"),
            false,
            TabInitConfig::default(),
            Duration::from_millis(30_000),
            SharedClientHooks::default(),
        );
        let id = client.register_callback("UNREAD", Arc::new(|_, _| {})).unwrap();
        {
            let subs = client.inner.subscriptions.lock().unwrap();
            assert_eq!(subs.get("UNREAD").map(|l| l.len()), Some(1));
        }
        client.unregister_callback("UNREAD", Some(&id));
        {
            let subs = client.inner.subscriptions.lock().unwrap();
            assert_eq!(subs.get("UNREAD").map(|l| l.len()), Some(0));
        }
    }
}
