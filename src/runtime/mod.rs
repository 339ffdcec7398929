//! Runtime modules for the native host.
//!
//! The runtime domain owns processes, files and the Tauri-facing bridge:
//! message routing, tool and worker processes, project state and updates.

pub mod bridge_host;
pub mod dispatcher;
pub mod path;
pub mod project_state;
pub mod tool_runner;
pub mod update_service;
pub mod worker;
