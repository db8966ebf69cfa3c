//! Test server harness for E2E testing
//!
//! Provides `TestRelayServer` for spawning real relay instances in tests.

use relay_hub::actors::{HubActorHandle, HubMetrics, HubSettings};
use relay_hub::config::Config;
use relay_hub::transport::{relay_router, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Test harness for spawning a Relay Hub in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_invalid_role() -> Result<(), anyhow::Error> {
///     let server = TestRelayServer::spawn().await?;
///
///     let response = reqwest::get(format!("{}/ws?role=admin", server.url())).await?;
///
///     assert_eq!(response.status(), 400);
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    hub: HubActorHandle,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn a relay with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(HashMap::new()).await
    }

    /// Spawn a relay configured from the given environment-style variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Spawn its own hub actor
    /// - Start the WebSocket listener in the background
    pub async fn spawn_with_vars(vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let (hub, _hub_task) =
            HubActorHandle::spawn(HubSettings::from_config(&config), HubMetrics::new());

        let app = relay_router(AppState::new(hub.clone(), &config));

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let shutdown_token = hub.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown_token.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            hub,
            config,
            _handle: handle,
        })
    }

    /// Get the HTTP base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for connecting with the given role.
    pub fn ws_url(&self, role: &str) -> String {
        format!("ws://{}/ws?role={}", self.addr, role)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle to the server's hub, for status queries and shutdown.
    pub fn hub(&self) -> &HubActorHandle {
        &self.hub
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        self.hub.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestRelayServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().ip().is_loopback());
        assert!(server.addr().port() > 0);
        assert_eq!(
            server.ws_url("client"),
            format!("ws://{}/ws?role=client", server.addr())
        );

        let status = server.hub().status().await?;
        assert_eq!(status.client_count, 0);
        assert!(!status.has_master);

        Ok(())
    }

    #[tokio::test]
    async fn test_server_applies_vars() -> Result<(), anyhow::Error> {
        let vars = HashMap::from([
            ("RELAY_OUTBOUND_CAPACITY".to_string(), "8".to_string()),
            ("RELAY_PRESENCE_NOTICES".to_string(), "true".to_string()),
        ]);
        let server = TestRelayServer::spawn_with_vars(vars).await?;

        assert_eq!(server.config().outbound_capacity, 8);
        assert!(server.config().presence_notices);

        Ok(())
    }

    #[tokio::test]
    async fn test_drop_stops_hub() -> Result<(), anyhow::Error> {
        let server = TestRelayServer::spawn().await?;
        let hub = server.hub().clone();

        drop(server);

        assert!(hub.is_cancelled());
        Ok(())
    }
}
