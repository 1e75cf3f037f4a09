//! `HubConfig` — process-wide connection configuration (spec §4.4).
//!
//! Mirrors the teacher's `DaemonConfig` (`config/mod.rs`): a `Default` impl
//! carrying every documented default, plus a `merge_partial` that layers a
//! caller-supplied partial update over the current config the way
//! `Facade::setConfig` "merges configuration."

use crate::envelope::Envelope;
use std::sync::Arc;
use std::time::Duration;

/// A `(type, callback)` pair a subscriber stages before `start()`, or
/// registers directly against a live connection.
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub r#type: String,
    pub callback: Callback,
}

/// Invoked with `(data, envelope)` on every matching inbound message.
pub type Callback = Arc<dyn Fn(&serde_json::Value, &Envelope) + Send + Sync>;

/// Builds the outbound heartbeat envelope. Defaults to `Envelope::heartbeat`.
pub type HeartbeatMessageFn = Arc<dyn Fn() -> Envelope + Send + Sync>;

/// Deterministic mode selection (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Pick `Shared` if supported, else `Visibility` if enabled and
    /// supported, else `Direct`.
    #[default]
    Auto,
    Shared,
    Visibility,
    Direct,
}

/// Process-wide configuration for a [`crate::facade::Hub`].
///
/// Every field has the default documented in spec §4.4. `url` has no
/// default — it is required at `start()` time (spec §7 `ConfigMissing`).
#[derive(Clone)]
pub struct HubConfig {
    pub url: Option<String>,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    pub auto_reconnect: bool,
    pub heartbeat_message: HeartbeatMessageFn,
    pub enable_visibility_management: bool,
    pub connection_mode: ConnectionMode,
    pub shared_idle_timeout: Duration,
    pub force_new_on_start: bool,
    pub enable_network_listener: bool,
    pub callbacks: Vec<SubscriptionEntry>,
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("url", &self.url)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("reconnect_delay_max", &self.reconnect_delay_max)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("enable_visibility_management", &self.enable_visibility_management)
            .field("connection_mode", &self.connection_mode)
            .field("shared_idle_timeout", &self.shared_idle_timeout)
            .field("force_new_on_start", &self.force_new_on_start)
            .field("enable_network_listener", &self.enable_network_listener)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: None,
            heartbeat_interval: Duration::from_millis(25_000),
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_millis(3_000),
            reconnect_delay_max: Duration::from_millis(10_000),
            auto_reconnect: true,
            heartbeat_message: Arc::new(|| Envelope::heartbeat(now_ms())),
            enable_visibility_management: false,
            connection_mode: ConnectionMode::Auto,
            shared_idle_timeout: Duration::from_millis(30_000),
            force_new_on_start: false,
            enable_network_listener: true,
            callbacks: Vec::new(),
        }
    }
}

/// A partial config update, as accepted by `Hub::set_config`. Every field is
/// optional; `None` means "leave as-is."
#[derive(Default, Clone)]
pub struct PartialHubConfig {
    pub url: Option<String>,
    pub heartbeat_interval: Option<Duration>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_delay: Option<Duration>,
    pub reconnect_delay_max: Option<Duration>,
    pub auto_reconnect: Option<bool>,
    pub heartbeat_message: Option<HeartbeatMessageFn>,
    pub enable_visibility_management: Option<bool>,
    pub connection_mode: Option<ConnectionMode>,
    pub shared_idle_timeout: Option<Duration>,
    pub force_new_on_start: Option<bool>,
    pub enable_network_listener: Option<bool>,
    pub callbacks: Option<Vec<SubscriptionEntry>>,
}

impl HubConfig {
    /// Merges a partial update over `self`, matching `Facade::setConfig`'s
    /// "merges configuration" semantics (spec §4.4) — unset fields are left
    /// untouched rather than reset to default.
    pub fn merge_partial(&mut self, partial: PartialHubConfig) {
        if let Some(v) = partial.url {
            self.url = Some(v);
        }
        if let Some(v) = partial.heartbeat_interval {
            self.heartbeat_interval = v;
        }
        if let Some(v) = partial.max_reconnect_attempts {
            self.max_reconnect_attempts = v;
        }
        if let Some(v) = partial.reconnect_delay {
            self.reconnect_delay = v;
        }
        if let Some(v) = partial.reconnect_delay_max {
            self.reconnect_delay_max = v;
        }
        if let Some(v) = partial.auto_reconnect {
            self.auto_reconnect = v;
        }
        if let Some(v) = partial.heartbeat_message {
            self.heartbeat_message = v;
        }
        if let Some(v) = partial.enable_visibility_management {
            self.enable_visibility_management = v;
        }
        if let Some(v) = partial.connection_mode {
            self.connection_mode = v;
        }
        if let Some(v) = partial.shared_idle_timeout {
            self.shared_idle_timeout = v;
        }
        if let Some(v) = partial.force_new_on_start {
            self.force_new_on_start = v;
        }
        if let Some(v) = partial.enable_network_listener {
            self.enable_network_listener = v;
        }
        if let Some(v) = partial.callbacks {
            self.callbacks = v;
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(25_000));
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(3_000));
        assert_eq!(cfg.reconnect_delay_max, Duration::from_millis(10_000));
        assert!(cfg.auto_reconnect);
        assert!(!cfg.enable_visibility_management);
        assert_eq!(cfg.connection_mode, ConnectionMode::Auto);
        assert_eq!(cfg.shared_idle_timeout, Duration::from_millis(30_000));
        assert!(!cfg.force_new_on_start);
        assert!(cfg.enable_network_listener);
    }

    #[test]
    fn merge_partial_only_touches_set_fields() {
        let mut cfg = HubConfig::default();
        cfg.merge_partial(PartialHubConfig {
            max_reconnect_attempts: Some(3),
            ..Default::default()
        });
        assert_eq!(cfg.max_reconnect_attempts, 3);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.reconnect_delay, Duration::from_millis(3_000));
    }
}
