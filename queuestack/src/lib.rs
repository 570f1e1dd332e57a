//! Queuestack server library
//!
//! The binary in `main.rs` is a thin wrapper; everything here is also
//! reachable from integration tests.

pub mod admin;
pub mod config;
pub mod router;

pub use router::{create_router, AppState};
