//! Typed error kinds for `streamhub`.
//!
//! Most of these are never propagated to a caller — per the spec's
//! propagation policy, callback and transport failures are logged through
//! `tracing` and swallowed so one bad subscriber or one flaky frame can't
//! take down dispatch. The enum exists so call sites that *do* need to
//! branch on failure kind (tests, `classify` helpers, the facade's mode
//! degradation) have something more structured than a string to match on.

use thiserror::Error;

/// Errors produced across the stream/host/facade stack.
#[derive(Debug, Error)]
pub enum StreamHubError {
    /// The underlying transport reported an error. Logged at `error`,
    /// triggers reconnect per policy.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// An inbound frame was not valid JSON, or a valid JSON value that does
    /// not match the envelope shape. Logged at `warn`, frame dropped.
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A subscription entry was missing its `type` or carried no callable
    /// callback. Logged at `warn`, no state change.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// `start` was called without a `url`, or without both `userId` and
    /// `credential`. Logged at `error`; `start` is a no-op.
    #[error("config missing: {0}")]
    ConfigMissing(String),

    /// `send` was called while the stream was not OPEN. Logged at `warn`,
    /// payload dropped.
    #[error("send unavailable — stream is not open")]
    SendUnavailable,

    /// The host saw a `TAB_INIT` with a different identity than the one it
    /// currently holds.
    #[error("identity conflict: current user {current_user_id:?}, new user {new_user_id:?}")]
    IdentityConflict {
        current_user_id: String,
        new_user_id: String,
    },

    /// The shared host could not be created or reported a fatal error;
    /// triggers mode degradation in the facade.
    #[error("shared host unavailable: {0}")]
    HostUnavailable(String),

    /// The server closed the stream cleanly, quickly, three times in a
    /// row — probable token/policy rejection. Reconnection is suspended.
    #[error("fast-close burst detected — reconnect suspended until {suspended_until_ms_epoch}")]
    FastCloseBurst { suspended_until_ms_epoch: i64 },

    /// Reconnect attempts reached `maxReconnectAttempts`. Logged at `warn`;
    /// no further reconnect until a fresh trigger.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
}
