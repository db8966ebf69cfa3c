//! Relay Hub Library
//!
//! A real-time message relay between one privileged **master** and any number
//! of **clients** over WebSockets:
//!
//! - Clients talk only to the master; their messages never reach each other
//! - The master addresses one client at a time by session ID
//! - The master sees a roster of connected clients with unread counts
//! - Typing indicators are relayed on the same paths as messages
//!
//! # Architecture
//!
//! ```text
//! WebSocket connection ──► session task (reader + writer)
//!                              │ register / dispatch / unregister
//!                              ▼
//!                          HubActor (single owner of the registry)
//!                              │ route + serialize
//!                              ▼
//!                  per-session bounded outbound queues
//! ```
//!
//! # Key Design Decisions
//!
//! - **Message passing over locks**: all registry mutation runs in the hub loop
//! - **Sender identity from the session**: `clientId` in client frames is ignored
//! - **Bounded everything**: the intake channel and outbound queues have fixed
//!   capacity; a slow peer loses events rather than stalling the hub
//!
//! # Modules
//!
//! - [`actors`] - Hub actor, registry, router and session model
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and HTTP status mapping
//! - [`observability`] - Health probes and Prometheus metrics
//! - [`protocol`] - Wire events and validation
//! - [`transport`] - WebSocket listener and session tasks

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod transport;
