//! termhost Core - Shared types for supervised terminal sessions
//!
//! This crate provides the domain types shared between the daemon
//! (termhostd) and its clients: session identity, launch configuration,
//! supervision status, and platform shell resolution.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod session;
pub mod shell;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use session::{
    RecoveryStatus, SessionConfig, SessionId, SessionOptions, SessionStatus, SessionView,
    TerminalSize, DEFAULT_COLS, DEFAULT_ROWS,
};
pub use shell::{candidate_shells, detect_default_shell, fallback_shells, Platform};
