//! `streamhub` — a single, robust, authenticated message-stream connection
//! shared across the async tasks ("tabs") of an application.
//!
//! Three layers, leaves first:
//!
//! - [`stream_client`] — a reusable low-level stream client with heartbeat,
//!   bounded reconnection and network-awareness.
//! - [`shared`] — a cross-task coordinator ([`shared::host::SharedHost`])
//!   that hosts a single upstream [`stream_client::StreamClient`], tracks
//!   per-task subscription state, enforces idle shutdown, and replays
//!   last-known state to late joiners, plus the per-task proxy
//!   ([`shared::client::SharedClient`]) that talks to it.
//! - [`facade`] — picks among shared, visibility-scoped and direct
//!   strategies and exposes one uniform surface ([`facade::Hub`]).
//!
//! See `SPEC_FULL.md` and `DESIGN.md` in the repository root for the full
//! design rationale.

pub mod circuit_breaker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod identity;
pub mod shared;
pub mod stream_client;

pub use config::HubConfig;
pub use envelope::Envelope;
pub use error::StreamHubError;
pub use facade::Hub;
pub use identity::SessionIdentity;
pub use stream_client::{ReadyState, StreamClient};
