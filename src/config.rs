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

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::AutoSaveSettings;
use crate::protocol::OffsetEncoding;
use crate::server::StoreSettings;

/// Settings for both the editor side and the workspace side.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Debounce window before dirty regions are flushed, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Fallback for the editor's auto-save preference.
    #[serde(default = "default_true")]
    pub auto_save: bool,

    /// Unit of wire offsets: `utf-8`, `utf-16` or `utf-32`.
    #[serde(default = "default_offset_encoding")]
    pub offset_encoding: String,

    /// Directory under each project that holds shadows.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,

    /// Compare existing shadows with the real file on tracking start.
    #[serde(default = "default_true")]
    pub verify_on_start: bool,

    /// Write working copies through to disk.
    #[serde(default = "default_true")]
    pub persist_working_copies: bool,

    /// Deltas that may wait for a missing predecessor, per file.
    #[serde(default = "default_max_pending")]
    pub max_pending_deltas: usize,

    /// How long a reconcile pass waits for diagnostics, in seconds.
    #[serde(default = "default_reconcile_timeout")]
    pub reconcile_timeout_secs: u64,

    /// Explicit project list; top-level directories when absent.
    #[serde(default)]
    pub projects: Option<Vec<String>>,

    /// Server definitions keyed by language ID (e.g., "rust", "python")
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,
}

/// How to launch one language server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "rust-analyzer")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

const fn default_debounce_ms() -> u64 {
    1000
}

const fn default_true() -> bool {
    true
}

fn default_offset_encoding() -> String {
    OffsetEncoding::Utf16.as_str().to_string()
}

fn default_metadata_dir() -> String {
    ".tandem".to_string()
}

const fn default_max_pending() -> usize {
    64
}

const fn default_reconcile_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            auto_save: true,
            offset_encoding: default_offset_encoding(),
            metadata_dir: default_metadata_dir(),
            verify_on_start: true,
            persist_working_copies: true,
            max_pending_deltas: default_max_pending(),
            reconcile_timeout_secs: default_reconcile_timeout(),
            projects: None,
            server: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value has the wrong
    /// type.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("debounce_ms", default_debounce_ms())?
            .set_default("auto_save", true)?
            .set_default("offset_encoding", default_offset_encoding())?
            .set_default("metadata_dir", default_metadata_dir())?
            .set_default("verify_on_start", true)?
            .set_default("persist_working_copies", true)?
            .set_default("max_pending_deltas", 64)?
            .set_default("reconcile_timeout_secs", default_reconcile_timeout())?;

        // 2. Load from user config directory (~/.config/tandem/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("tandem").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (TANDEM_DEBOUNCE_MS, etc.)
        builder = builder.add_source(config::Environment::with_prefix("TANDEM"));

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.encoding()?;
        Ok(config)
    }

    /// Parsed `offset_encoding`.
    ///
    /// # Errors
    ///
    /// Returns an error for anything but `utf-8`, `utf-16` or `utf-32`.
    pub fn encoding(&self) -> Result<OffsetEncoding> {
        OffsetEncoding::from_name(&self.offset_encoding)
            .ok_or_else(|| anyhow!("Unknown offset_encoding '{}'", self.offset_encoding))
    }

    /// Adds a server from a `lang:command args...` CLI override.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec has no `:` or no command.
    pub fn add_server_spec(&mut self, spec: &str) -> Result<()> {
        let (lang, command_line) = spec
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid server spec '{spec}', expected lang:command"))?;
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let command = parts
            .next()
            .ok_or_else(|| anyhow!("Missing command in server spec '{spec}'"))?;

        self.server.insert(
            lang.trim().to_string(),
            ServerConfig {
                command,
                args: parts.collect(),
                initialization_options: None,
            },
        );
        Ok(())
    }

    /// Debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Reconcile timeout.
    #[must_use]
    pub const fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Settings for the working-copy store.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset_encoding` is invalid.
    pub fn store_settings(&self) -> Result<StoreSettings> {
        Ok(StoreSettings {
            encoding: self.encoding()?,
            verify_on_start: self.verify_on_start,
            persist: self.persist_working_copies,
            max_pending: self.max_pending_deltas,
        })
    }

    /// Settings for editor-side auto-save controllers.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset_encoding` is invalid.
    pub fn auto_save_settings(&self) -> Result<AutoSaveSettings> {
        Ok(AutoSaveSettings {
            delay: self.debounce(),
            encoding: self.encoding()?,
            owner_id: None,
        })
    }
}
