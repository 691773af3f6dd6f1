//! # chatterbox-server
//!
//! Room-scoped realtime chat relay over WebSockets.
//!
//! The library surface exists so integration tests can build the axum
//! router against an ephemeral listener; the `chatterbox` binary is a thin
//! wrapper around [`handlers::run_server`].

pub mod config;
pub mod handlers;
pub mod metrics;
