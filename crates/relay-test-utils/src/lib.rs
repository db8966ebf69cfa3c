//! # Relay Test Utilities
//!
//! Shared test utilities for the Relay Hub.
//!
//! This crate provides:
//! - Server test harness (`TestRelayServer` for E2E tests)
//! - WebSocket test client (`TestWsClient`) with JSON helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRelayServer::spawn().await?;
//!     let mut master = TestWsClient::connect(&server.ws_url("master")).await?;
//!
//!     let welcome = master.expect_event("welcome").await?;
//!     assert_eq!(welcome["role"], "master");
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use server_harness::*;
pub use ws_client::*;
