/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::client::LspClient;
use crate::config::ServerConfig;
use crate::session::EventBroadcaster;

/// Lazily spawns one language server per language and restarts dead ones.
pub struct ClientManager {
    servers: HashMap<String, ServerConfig>,
    root: PathBuf,
    active_clients: Mutex<HashMap<String, Arc<LspClient>>>,
    broadcaster: EventBroadcaster,
}

impl ClientManager {
    /// Creates a manager for the configured servers.
    #[must_use]
    pub fn new(
        servers: HashMap<String, ServerConfig>,
        root: PathBuf,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            servers,
            root,
            active_clients: Mutex::new(HashMap::new()),
            broadcaster,
        }
    }

    /// Whether a server is configured for `lang`.
    #[must_use]
    pub fn has_server(&self, lang: &str) -> bool {
        self.servers.contains_key(lang)
    }

    /// Gets an active client for the given language, spawning it if necessary.
    ///
    /// Returns `true` alongside the client when it was freshly spawned, so
    /// callers know previously opened documents are gone.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No LSP server is configured for the language.
    /// - The server fails to spawn.
    /// - The server fails to initialize.
    pub async fn get_client(&self, lang: &str) -> Result<(Arc<LspClient>, bool)> {
        let mut clients = self.active_clients.lock().await;

        if let Some(client) = clients.get(lang) {
            if client.is_alive() {
                return Ok((client.clone(), false));
            }
            warn!("LSP server for {} died, restarting...", lang);
            clients.remove(lang);
        }

        let server_config = self
            .servers
            .get(lang)
            .ok_or_else(|| anyhow!("No LSP server configured for language '{lang}'"))?;

        info!(
            "Spawning LSP server for {}: {} {}",
            lang,
            server_config.command,
            server_config.args.join(" ")
        );

        let mut client = LspClient::spawn(
            &server_config.command,
            &server_config.args,
            lang,
            self.broadcaster.clone(),
        )?;
        client
            .initialize(&self.root, server_config.initialization_options.clone())
            .await?;

        let client = Arc::new(client);
        clients.insert(lang.to_string(), client.clone());
        drop(clients);

        Ok((client, true))
    }

    /// The running client for `lang`, without spawning one.
    pub async fn active_client(&self, lang: &str) -> Option<Arc<LspClient>> {
        self.active_clients
            .lock()
            .await
            .get(lang)
            .filter(|c| c.is_alive())
            .cloned()
    }

    /// Shuts down all active clients.
    pub async fn shutdown_all(&self) {
        let clients: Vec<(String, Arc<LspClient>)> =
            self.active_clients.lock().await.drain().collect();

        for (lang, client) in clients {
            let Some(mut client) = Arc::into_inner(client) else {
                warn!("LSP server for {} still in use, leaving it to exit", lang);
                continue;
            };
            if client.is_alive()
                && let Err(e) = client.shutdown().await
            {
                warn!("Failed to shutdown LSP server for {}: {}", lang, e);
            }
        }
    }
}
