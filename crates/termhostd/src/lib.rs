//! termhost daemon - terminal session manager and notification server
//!
//! This crate provides the core infrastructure for the termhost daemon:
//! - `pty` - Pseudo-terminal spawning behind the `PtySpawner` seam
//! - `manager` - Session lifecycle actor with crash-loop detection and recovery
//! - `server` - Unix socket server for front-end connections
//! - `config` - Daemon configuration (file + environment)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       termhostd daemon                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│     SessionManager          │   │
//! │  │ (Unix Socket)   │     │  (session state owner)      │   │
//! │  └────────┬────────┘     └───────┬──────────────▲──────┘   │
//! │           │                      │              │          │
//! │           │ connections          │ events       │ output   │
//! │           ▼                      ▼              │ / exit   │
//! │  ┌─────────────────┐     ┌──────────────┐ ┌─────┴──────┐   │
//! │  │ConnectionHandler│     │  broadcast   │ │ pty threads│   │
//! │  │  (per client)   │     │   channel    │ │ (per shell)│   │
//! │  └─────────────────┘     └──────────────┘ └────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod manager;
pub mod pty;
pub mod server;
