//! Update pipeline building blocks.
//!
//! - `feed`: release discovery against the GitHub releases API
//! - `download`: streaming download with percent progress
//! - `launcher`: detached installer handoff
//!
//! Orchestration (single install at a time, bridge envelopes) lives in
//! `runtime::update_service`.

pub mod download;
pub mod feed;
pub mod launcher;

#[cfg(test)]
pub mod testing;

pub use download::{download_to, DownloadProgress};
pub use feed::{ReleaseAsset, ReleaseFeed, ReleaseMetadata};
pub use launcher::launch_detached;
