//! Session integration tests.
//!
//! This module contains integration tests for the connection registry:
//! - Broadcast of accepted actions and routing of rejections
//! - Game lifecycle: start, resign, debug events, chat, stored replays
//! - Ordering under concurrent callers

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

// Session test modules
mod sessions {
    pub mod broadcast;
    pub mod concurrency;
    pub mod lifecycle;
}
