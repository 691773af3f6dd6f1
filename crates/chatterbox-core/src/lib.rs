//! # chatterbox-core
//!
//! Connection registry and room broadcast engine for the Chatterbox relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ClientHandle** - Identity and write capability for one connection
//! - **Registry** - Room membership maps plus join/leave/broadcast
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  join/leave   ┌─────────────┐  fan-out  ┌─────────────┐
//! │   Session   │──────────────▶│  Registry   │──────────▶│   Outbox    │
//! └─────────────┘   broadcast   └─────────────┘  (queue)  └─────────────┘
//! ```
//!
//! Sessions own the sockets; the registry only ever queues events onto a
//! connection's outbox, so no registry operation awaits network I/O.

pub mod connection;
pub mod registry;

pub use connection::{ClientHandle, ConnectionId, EventReceiver};
pub use registry::{Departure, Registry, RegistryStats};
