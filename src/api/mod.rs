//! API types for frontend-backend bridge.
//!
//! This module defines stable types for Tauri commands and events,
//! isolating process and network complexity from the frontend.

pub mod types;
