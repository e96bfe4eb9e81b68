// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Tandem keeps server-side working copies of documents open in an editor.
//!
//! The editor side batches keystrokes into deltas and ships them after a
//! debounce window. The workspace side applies them to shadow copies, runs
//! language servers over the shadows, and sends problems and highlights back
//! to the editing session that owns each copy.

/// Command-line interface definitions and utilities.
pub mod cli;
/// Editor side: dirty-region tracking and auto-save.
pub mod client;
/// Configuration handling for the workspace server and editor clients.
pub mod config;
/// Reconciliation engines backed by language servers.
pub mod engine;
/// Domain errors.
pub mod error;
/// Deltas, wire payloads and framing.
pub mod protocol;
/// Workspace side: working copies and the socket endpoint.
pub mod server;
/// Session management and event broadcasting.
pub mod session;
