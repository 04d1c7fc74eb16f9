//! Lazily starts and caches one [`McpClient`] per named server for the
//! lifetime of a run, and tears all of them down when the run ends
//! (`spec.md` §4.4 "Lifecycle", §5 "Shared resources").

use std::{collections::HashMap, sync::Arc};

use flowctl_core::config::ConfigCatalog;
use tokio::sync::Mutex;

use crate::{
    client::McpClient,
    error::{McpError, Result},
};

/// Owns every MCP connection opened during a single workflow run.
pub struct McpServerRegistry<'a> {
    catalog: &'a ConfigCatalog,
    clients: Mutex<HashMap<String, Arc<McpClient>>>,
}

impl<'a> McpServerRegistry<'a> {
    pub fn new(catalog: &'a ConfigCatalog) -> Self {
        Self {
            catalog,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the connection for `server`, spawning it on first use.
    pub async fn get_or_start(&self, server: &str) -> Result<Arc<McpClient>> {
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(server) {
            return Ok(Arc::clone(client));
        }

        let config = self
            .catalog
            .server(server)
            .map_err(|_| McpError::UnknownServer(server.to_string()))?;
        let client = McpClient::start(server, &config).await?;
        guard.insert(server.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Stops every connection opened so far. Errors from individual servers
    /// are logged, not propagated, so one slow shutdown never blocks the rest.
    pub async fn stop_all(&self) {
        let mut guard = self.clients.lock().await;
        for (name, client) in guard.drain() {
            if let Err(err) = client.stop().await {
                tracing::warn!(server = %name, error = %err, "error stopping MCP server");
            }
        }
    }

    /// Every server currently connected, for tool-catalog assembly.
    pub async fn active(&self) -> Vec<Arc<McpClient>> {
        self.clients.lock().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_is_rejected() {
        let catalog = ConfigCatalog::default();
        let registry = McpServerRegistry::new(&catalog);
        let err = registry.get_or_start("does-not-exist").await.unwrap_err();
        assert!(matches!(err, McpError::UnknownServer(_)));
    }
}
