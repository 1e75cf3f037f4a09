//! Cross-tab shared-connection coordination (spec §4.2, §4.3).
//!
//! [`host`] owns the single upstream `StreamClient` for one identity and
//! fans inbound envelopes out to attached tabs; [`client`] is the per-tab
//! proxy that attaches to it. [`protocol`] is the wire shape between them.

pub mod client;
pub mod host;
pub mod protocol;
