//! Protocol layer - the JSON bridge between the UI surface and the host.
//!
//! This module provides:
//! - `envelope`: codec for the `{ type, payload }` messages on the bridge
//! - `BridgeHost` trait: handler → UI callback boundary
//!
//! The protocol layer does not know about Tauri. The runtime layer provides
//! the `BridgeHost` implementation that talks to the webview.

pub mod envelope;
pub mod host;

#[cfg(test)]
pub mod testing;

pub use host::BridgeHost;
