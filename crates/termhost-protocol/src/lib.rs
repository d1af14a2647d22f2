//! termhost Protocol - Wire protocol for daemon communication
//!
//! This crate provides message types and request validation for
//! communication between the terminal front end and the daemon.

pub mod message;
pub mod parse;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType, RequestKind};
pub use parse::{ParseError, Request};
pub use version::{ProtocolVersion, VersionError};
