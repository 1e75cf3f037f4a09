//! The tab ↔ host wire protocol (spec §3 `TabRecord`, §4.2, §6).
//!
//! A "tab" is any task holding a [`super::client::SharedClient`] handle; the
//! "host" is the single [`super::host::SharedHost`] task that owns the
//! upstream [`crate::stream_client::StreamClient`]. Every tab→host message
//! carries its own `tab_id` because all tabs share one inbound channel into
//! the host (their half of the message port of spec §6); host→tab messages
//! travel over each tab's own outbound port instead, so [`HostEvent`] carries
//! no `tab_id`.

use crate::envelope::Envelope;
use crate::identity::SessionIdentity;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

pub type TabId = String;

/// The subset of `HubConfig` a tab supplies at `TAB_INIT` to size the
/// upstream `StreamClient` the host builds for it. Only the first tab to
/// establish an identity has its config actually applied — see
/// `SharedHost`'s identity-change handling.
#[derive(Debug, Clone)]
pub struct TabInitConfig {
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    pub auto_reconnect: bool,
    pub enable_network_listener: bool,
}

impl Default for TabInitConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(25_000),
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(3_000),
            reconnect_delay_max: Duration::from_millis(10_000),
            auto_reconnect: true,
            enable_network_listener: true,
        }
    }
}

/// Tab → host messages (spec §4.2). Every variant but `Init` assumes the tab
/// is already attached.
#[derive(Debug)]
pub enum HostMessage {
    Init {
        tab_id: TabId,
        identity: SessionIdentity,
        is_visible: bool,
        config: TabInitConfig,
        idle_timeout: Duration,
        port: mpsc::UnboundedSender<HostEvent>,
    },
    Disconnect {
        tab_id: TabId,
    },
    Send {
        tab_id: TabId,
        data: Value,
    },
    Visibility {
        tab_id: TabId,
        is_visible: bool,
    },
    RegisterCallback {
        tab_id: TabId,
        r#type: String,
        callback_id: String,
    },
    UnregisterCallback {
        tab_id: TabId,
        r#type: String,
        callback_id: Option<String>,
    },
    Ping {
        tab_id: TabId,
    },
    ForceReset {
        tab_id: TabId,
        reason: Option<String>,
    },
    ForceShutdown {
        tab_id: TabId,
        reason: Option<String>,
    },
    NetworkOnline {
        tab_id: TabId,
    },
}

/// Host → tab messages (spec §4.2, §6).
#[derive(Debug, Clone)]
pub enum HostEvent {
    Ready,
    Connected,
    Disconnected,
    Message(Envelope),
    Error { message: String, detail: Option<String> },
    AuthConflict { current_user_id: String, new_user_id: String, explanation: String },
    Pong,
    TabNotFound,
    ReconnectAttempt(u32),
}
