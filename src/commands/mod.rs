//! Tauri command handlers organized by domain.
//!
//! Each submodule contains related commands and their helper functions.
//! Import specific commands via their submodule (e.g., `commands::bridge::bridge_post`).

pub mod bridge;
pub mod project_state;
pub mod worker;
