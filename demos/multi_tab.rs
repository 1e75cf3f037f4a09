//! Illustrates two independent tasks ("tabs") attaching to one shared
//! upstream connection and each receiving the same inbound messages.
//!
//! Run with: `cargo run --example multi_tab -- wss://example.invalid/stream`

use std::sync::Arc;
use std::time::Duration;
use streamhub::identity::SessionIdentity;
use streamhub::shared::client::{SharedClient, SharedClientHooks};
use streamhub::shared::host;
use streamhub::shared::protocol::TabInitConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let base_url = std::env::args().nth(1).unwrap_or_else(|| "wss://example.invalid/stream".to_string());
    let identity = SessionIdentity::new(base_url, "demo-user", "demo-token");

    // One host per identity, shared by every tab below.
    let host_handle = host::spawn();

    for tab_name in ["tab-a", "tab-b"] {
        let host_handle = host_handle.clone();
        let identity = identity.clone();
        tokio::spawn(async move {
            let hooks = SharedClientHooks {
                on_connected: Some(Arc::new({
                    let tab_name = tab_name.to_string();
                    move || println!("[{tab_name}] connected")
                })),
                on_disconnected: Some(Arc::new({
                    let tab_name = tab_name.to_string();
                    move || println!("[{tab_name}] disconnected")
                })),
                ..Default::default()
            };
            let client = SharedClient::start(
                host_handle,
                identity,
                true,
                TabInitConfig::default(),
                Duration::from_secs(30),
                hooks,
            );
            client
                .register_callback("UNREAD", Arc::new({
                    let tab_name = tab_name.to_string();
                    move |data, _envelope| println!("[{tab_name}] UNREAD: {data}")
                }))
                .expect("type is non-empty");
        });
    }

    tokio::time::sleep(Duration::from_secs(5)).await;
}
